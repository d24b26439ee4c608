// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/input.rs - 图像与摄像头输入
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

use std::path::Path;

use image::RgbImage;
use tracing::debug;

use crate::error::PipelineError;

#[cfg(feature = "v4l_camera")]
mod v4l_camera;
#[cfg(feature = "v4l_camera")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError, V4lCameraOpener};

pub const DEFAULT_CAMERA_INDEX: u32 = 0;
/// 请求的采集分辨率，设备不支持时以设备实际格式为准
pub const CAMERA_RESOLUTION: (u32, u32) = (1280, 720);

/// 读取并解码单张图片
///
/// 文件不存在时返回 `SourceNotFound`，无法解码时视为推理失败。
pub fn load_image(path: impl AsRef<Path>) -> Result<RgbImage, PipelineError> {
  let path = path.as_ref();
  if !path.is_file() {
    return Err(PipelineError::SourceNotFound(path.display().to_string()));
  }

  let image = image::open(path)
    .map_err(|e| PipelineError::InferenceFailure(format!("cannot decode {}: {}", path.display(), e)))?
    .to_rgb8();
  debug!(
    "读取图像: {}, 尺寸: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(image)
}

/// 已打开的摄像头，由实时会话独占
pub trait Camera {
  type Error: std::error::Error + Send + Sync + 'static;

  fn read_frame(&mut self) -> Result<RgbImage, Self::Error>;

  fn release(self);
}

pub trait CameraOpener {
  type Camera: Camera;
  type Error: std::error::Error + Send + Sync + 'static;

  /// `resolution` 只是提示，打开失败才返回错误
  fn open(&self, index: u32, resolution: (u32, u32)) -> Result<Self::Camera, Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_missing_source() {
    let err = load_image("/tmp/fenshi-missing-source.jpg").unwrap_err();
    assert_eq!(
      err.to_string(),
      "Image file not found: /tmp/fenshi-missing-source.jpg"
    );
  }

  #[test]
  fn test_directory_is_not_a_source() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      load_image(dir.path()),
      Err(PipelineError::SourceNotFound(_))
    ));
  }

  #[test]
  fn test_undecodable_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.jpg");
    std::fs::write(&path, b"not a jpeg").unwrap();
    assert!(matches!(
      load_image(&path),
      Err(PipelineError::InferenceFailure(_))
    ));
  }

  #[test]
  fn test_load_png() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaf.png");
    RgbImage::from_pixel(6, 3, image::Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let image = load_image(&path).unwrap();
    assert_eq!(image.dimensions(), (6, 3));
    assert_eq!(*image.get_pixel(5, 2), image::Rgb([10, 20, 30]));
  }
}
