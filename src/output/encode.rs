// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output/encode.rs - 标注图像编码为 data URI
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

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use tracing::debug;

use crate::{detection::DetectionRecord, error::PipelineError, output::draw::Draw};

pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";
const DEFAULT_JPEG_QUALITY: u8 = 95;

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
  if image.width() == 0 || image.height() == 0 {
    return Err(PipelineError::EncodeFailure(format!(
      "empty frame {}x{}",
      image.width(),
      image.height()
    )));
  }

  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
    .encode_image(image)
    .map_err(PipelineError::encode)?;
  Ok(buffer)
}

pub fn to_data_uri(jpeg: &[u8]) -> String {
  format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(jpeg))
}

/// 绘制检测结果并输出 JPEG data URI
pub struct ArtifactEncoder {
  draw: Draw,
  quality: u8,
}

impl Default for ArtifactEncoder {
  fn default() -> Self {
    Self::new(Draw::default())
  }
}

impl ArtifactEncoder {
  pub fn new(draw: Draw) -> Self {
    Self {
      draw,
      quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn with_quality(mut self, quality: u8) -> Self {
    self.quality = quality;
    self
  }

  pub fn encode(
    &self,
    image: &RgbImage,
    records: &[DetectionRecord],
  ) -> Result<String, PipelineError> {
    let annotated = self.draw.annotate(image, records);
    let jpeg = encode_jpeg(&annotated, self.quality)?;
    debug!("标注图像 JPEG 大小: {} 字节", jpeg.len());
    Ok(to_data_uri(&jpeg))
  }
}
