// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output.rs - 输出定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Fenshi Authors

use std::sync::mpsc::Receiver;
use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;

pub mod draw;
pub mod encode;
pub mod protocol;

/// 实时画面的显示面
pub trait DisplaySurface {
  type Error: std::error::Error + Send + Sync + 'static;

  fn show(&mut self, frame: &RgbImage) -> Result<(), Self::Error>;

  /// 在 `wait` 时间内等待按键
  fn poll_key(&mut self, wait: Duration) -> Option<char>;

  /// 销毁显示面，释放相关资源
  fn destroy(self);
}

/// 按键来源，通常由中断信号转换而来
#[derive(Default)]
pub struct KeyReceiver {
  rx: Option<Receiver<char>>,
}

impl KeyReceiver {
  pub fn new(rx: Receiver<char>) -> Self {
    Self { rx: Some(rx) }
  }

  pub fn poll(&self, wait: Duration) -> Option<char> {
    self.rx.as_ref()?.recv_timeout(wait).ok()
  }
}

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileDisplay, SaveImageFileError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordDisplay, DirectoryRecordDisplayError};

#[derive(Error, Debug)]
pub enum DisplayError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordDisplayError(#[from] DirectoryRecordDisplayError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum DisplayWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileDisplay),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordDisplay),
}

impl FromUrl for DisplayWrapper {
  type Error = DisplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    if url.scheme() == SaveImageFileDisplay::SCHEME {
      return Ok(DisplayWrapper::SaveImageFile(
        SaveImageFileDisplay::from_url(url)?,
      ));
    }
    #[cfg(feature = "directory_record")]
    if url.scheme() == DirectoryRecordDisplay::SCHEME {
      return Ok(DisplayWrapper::DirectoryRecord(
        DirectoryRecordDisplay::from_url(url)?,
      ));
    }
    Err(DisplayError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl DisplayWrapper {
  pub fn with_keys(self, keys: KeyReceiver) -> Self {
    match self {
      #[cfg(feature = "save_image_file")]
      DisplayWrapper::SaveImageFile(display) => {
        DisplayWrapper::SaveImageFile(display.with_keys(keys))
      }
      #[cfg(feature = "directory_record")]
      DisplayWrapper::DirectoryRecord(display) => {
        DisplayWrapper::DirectoryRecord(display.with_keys(keys))
      }
    }
  }
}

impl DisplaySurface for DisplayWrapper {
  type Error = DisplayError;

  fn show(&mut self, frame: &RgbImage) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      DisplayWrapper::SaveImageFile(display) => display.show(frame).map_err(DisplayError::from),
      #[cfg(feature = "directory_record")]
      DisplayWrapper::DirectoryRecord(display) => display.show(frame).map_err(DisplayError::from),
    }
  }

  fn poll_key(&mut self, wait: Duration) -> Option<char> {
    match self {
      #[cfg(feature = "save_image_file")]
      DisplayWrapper::SaveImageFile(display) => display.poll_key(wait),
      #[cfg(feature = "directory_record")]
      DisplayWrapper::DirectoryRecord(display) => display.poll_key(wait),
    }
  }

  fn destroy(self) {
    match self {
      #[cfg(feature = "save_image_file")]
      DisplayWrapper::SaveImageFile(display) => display.destroy(),
      #[cfg(feature = "directory_record")]
      DisplayWrapper::DirectoryRecord(display) => display.destroy(),
    }
  }
}
