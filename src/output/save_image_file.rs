// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output/save_image_file.rs - 以单个图像文件作为显示面
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{DisplaySurface, KeyReceiver},
};

/// 每一帧覆盖写入同一个文件，外部查看器可以轮询刷新
pub struct SaveImageFileDisplay {
  path: PathBuf,
  keys: KeyReceiver,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileDisplay {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileDisplay {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl SaveImageFileDisplay {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      keys: KeyReceiver::default(),
    }
  }

  pub fn with_keys(mut self, keys: KeyReceiver) -> Self {
    self.keys = keys;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl DisplaySurface for SaveImageFileDisplay {
  type Error = SaveImageFileError;

  fn show(&mut self, frame: &RgbImage) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    frame.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path.display());
    Ok(())
  }

  fn poll_key(&mut self, wait: Duration) -> Option<char> {
    self.keys.poll(wait)
  }

  fn destroy(self) {
    info!("关闭图像显示: {}", self.path.display());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_url() {
    let url = Url::parse("image:///tmp/fenshi/live.jpg").unwrap();
    let display = SaveImageFileDisplay::from_url(&url).unwrap();
    assert_eq!(display.path(), Path::new("/tmp/fenshi/live.jpg"));

    let url = Url::parse("folder:///tmp/fenshi").unwrap();
    assert!(SaveImageFileDisplay::from_url(&url).is_err());
  }

  #[test]
  fn test_show_overwrites_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("live.png");
    let mut display = SaveImageFileDisplay::new(&path);

    display.show(&RgbImage::new(8, 8)).unwrap();
    display.show(&RgbImage::new(4, 4)).unwrap();

    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (4, 4));
  }

  #[test]
  fn test_poll_without_keys() {
    let mut display = SaveImageFileDisplay::new("live.png");
    assert_eq!(display.poll_key(Duration::from_millis(1)), None);
  }

  #[test]
  fn test_poll_forwards_keys() {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut display = SaveImageFileDisplay::new("live.png").with_keys(KeyReceiver::new(rx));
    tx.send('q').unwrap();
    assert_eq!(display.poll_key(Duration::from_millis(1)), Some('q'));
  }
}
