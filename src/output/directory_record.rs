// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录每一帧
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

use std::path::PathBuf;
use std::time::Duration;

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DisplaySurface, KeyReceiver},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordDisplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 目录结构: <root>/<年>/<月>/<日>/<时-分-秒>-<序号>.<扩展名>
pub struct DirectoryRecordDisplay {
  directory: PathBuf,
  extension: String,
  frame_counter: u16,
  keys: KeyReceiver,
}

impl FromUrlWithScheme for DirectoryRecordDisplay {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordDisplay {
  type Error = DirectoryRecordDisplayError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordDisplayError::SchemeMismatch);
    }

    let extension = uri
      .query_pairs()
      .find(|(k, _)| k == "format")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| "jpg".to_string());

    Ok(DirectoryRecordDisplay {
      directory: PathBuf::from(uri.path()),
      extension,
      frame_counter: 0,
      keys: KeyReceiver::default(),
    })
  }
}

impl DirectoryRecordDisplay {
  pub fn with_keys(mut self, keys: KeyReceiver) -> Self {
    self.keys = keys;
    self
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordDisplayError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.{}",
      now.format("%H-%M-%S"),
      self.frame_id(),
      self.extension
    )))
  }
}

impl DisplaySurface for DirectoryRecordDisplay {
  type Error = DirectoryRecordDisplayError;

  fn show(&mut self, frame: &RgbImage) -> Result<(), Self::Error> {
    let path = self.frame_path()?;
    frame.save(&path)?;
    debug!("记录帧: {}", path.display());
    Ok(())
  }

  fn poll_key(&mut self, wait: Duration) -> Option<char> {
    self.keys.poll(wait)
  }

  fn destroy(self) {
    info!(
      "关闭目录记录: {}, 共 {} 帧",
      self.directory.display(),
      self.frame_counter
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_frames_written_to_dated_folder() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::from_directory_path(dir.path()).unwrap();
    let url = url::Url::parse(&url.as_str().replacen("file", "folder", 1)).unwrap();
    let mut display = DirectoryRecordDisplay::from_url(&url).unwrap();

    display.show(&RgbImage::new(4, 4)).unwrap();
    display.show(&RgbImage::new(4, 4)).unwrap();

    let now = Utc::now();
    let day = dir
      .path()
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    let count = std::fs::read_dir(&day).unwrap().count();
    assert_eq!(count, 2);
    display.destroy();
  }

  #[test]
  fn test_format_query() {
    let url = url::Url::parse("folder:///tmp/frames?format=png").unwrap();
    let display = DirectoryRecordDisplay::from_url(&url).unwrap();
    assert_eq!(display.extension, "png");
    assert_eq!(display.directory, PathBuf::from("/tmp/frames/"));
  }
}
