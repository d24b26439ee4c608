// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/error.rs - 推理流水线错误定义
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

use thiserror::Error;

/// 推理流水线中所有可能的失败
///
/// 消息文本会原样写入 ErrorResult 的 `error` 字段，
/// 已有的调用方依赖这些英文文本，修改前请确认兼容性。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
  #[error("Image file not found: {0}")]
  SourceNotFound(String),
  #[error("Model not found at {0}")]
  ModelNotFound(String),
  #[error("Inference failed: {0}")]
  InferenceFailure(String),
  #[error("Failed to encode annotated image: {0}")]
  EncodeFailure(String),
  #[error("Could not open camera: {0}")]
  DeviceUnavailable(String),
  #[error("Failed to read frame: {0}")]
  FrameReadFailure(String),
}

impl PipelineError {
  pub fn inference(err: impl std::fmt::Display) -> Self {
    PipelineError::InferenceFailure(err.to_string())
  }

  pub fn encode(err: impl std::fmt::Display) -> Self {
    PipelineError::EncodeFailure(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_source_not_found_message() {
    let err = PipelineError::SourceNotFound("/tmp/missing.jpg".to_string());
    assert_eq!(err.to_string(), "Image file not found: /tmp/missing.jpg");
  }

  #[test]
  fn test_model_not_found_message() {
    let err = PipelineError::ModelNotFound("weights/best.pt".to_string());
    assert_eq!(err.to_string(), "Model not found at weights/best.pt");
  }
}
