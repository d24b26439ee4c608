// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/input/v4l_camera.rs - V4L 摄像头
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

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC, Format};

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{Camera, CameraOpener},
};

const BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("Short frame: expected {expected} bytes, got {actual}")]
  ShortFrame { expected: usize, actual: usize },
}

/// 按编号或 `v4l:///dev/videoN` 打开摄像头
#[derive(Debug, Clone, Default)]
pub struct V4lCameraOpener {
  device_path: Option<PathBuf>,
}

impl FromUrlWithScheme for V4lCameraOpener {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCameraOpener {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemeMismatch);
    }

    let device_path = match url.path() {
      "" | "/" => None,
      path => Some(PathBuf::from(path)),
    };
    Ok(Self { device_path })
  }
}

impl CameraOpener for V4lCameraOpener {
  type Camera = V4lCamera;
  type Error = V4lCameraError;

  fn open(&self, index: u32, resolution: (u32, u32)) -> Result<V4lCamera, V4lCameraError> {
    let path = self
      .device_path
      .clone()
      .unwrap_or_else(|| PathBuf::from(format!("/dev/video{}", index)));
    let device = Device::with_path(&path)?;

    let (width, height) = resolution;
    let requested = Format::new(width, height, FourCC::new(b"MJPG"));
    let format = match device.set_format(&requested) {
      Ok(format) => format,
      Err(e) => {
        warn!("无法设置采集格式 {}x{} MJPG: {}，使用设备当前格式", width, height, e);
        device.format()?
      }
    };
    info!(
      "打开摄像头: {}, 格式: {}x{} {}",
      path.display(),
      format.width,
      format.height,
      format.fourcc
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
    Ok(V4lCamera {
      path,
      format,
      stream,
      _device: device,
    })
  }
}

pub struct V4lCamera {
  path: PathBuf,
  format: Format,
  stream: Stream<'static>,
  _device: Device,
}

impl Camera for V4lCamera {
  type Error = V4lCameraError;

  fn read_frame(&mut self) -> Result<RgbImage, V4lCameraError> {
    let (buf, meta) = self.stream.next()?;
    let used = (meta.bytesused as usize).min(buf.len());
    let data = if used == 0 { buf } else { &buf[..used] };
    decode_frame(&self.format, data)
  }

  fn release(self) {
    info!("释放摄像头: {}", self.path.display());
  }
}

fn decode_frame(format: &Format, data: &[u8]) -> Result<RgbImage, V4lCameraError> {
  let (width, height) = (format.width, format.height);
  match &format.fourcc.repr {
    b"MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8()),
    b"YUYV" => yuyv_to_rgb(data, width, height),
    b"RGB3" => {
      let expected = (width * height * 3) as usize;
      if data.len() < expected {
        return Err(V4lCameraError::ShortFrame {
          expected,
          actual: data.len(),
        });
      }
      RgbImage::from_raw(width, height, data[..expected].to_vec()).ok_or(
        V4lCameraError::ShortFrame {
          expected,
          actual: data.len(),
        },
      )
    }
    _ => Err(V4lCameraError::UnsupportedPixelFormat(
      format.fourcc.to_string(),
    )),
  }
}

/// YUYV 4:2:2 转 RGB（BT.601）
fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, V4lCameraError> {
  let expected = (width * height * 2) as usize;
  if data.len() < expected {
    return Err(V4lCameraError::ShortFrame {
      expected,
      actual: data.len(),
    });
  }

  let mut rgb = Vec::with_capacity((width * height * 3) as usize);
  for chunk in data[..expected].chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    rgb.extend_from_slice(&yuv_pixel(y0, u, v));
    rgb.extend_from_slice(&yuv_pixel(y1, u, v));
  }

  RgbImage::from_raw(width, height, rgb).ok_or(V4lCameraError::ShortFrame {
    expected,
    actual: data.len(),
  })
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
  let c = y as i32 - 16;
  let d = u as i32 - 128;
  let e = v as i32 - 128;
  let clamp = |x: i32| x.clamp(0, 255) as u8;
  [
    clamp((298 * c + 409 * e + 128) >> 8),
    clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
    clamp((298 * c + 516 * d + 128) >> 8),
  ]
}
