// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/infer.rs - 推理执行与计时
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

use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  config::InferenceConfig,
  error::PipelineError,
  model::{DetectParams, DetectResult, Detector},
};

#[derive(Debug, Clone)]
pub struct Inference {
  pub result: DetectResult,
  pub elapsed: Duration,
}

impl Inference {
  /// 推理耗时（秒），保留三位小数
  pub fn elapsed_seconds(&self) -> f64 {
    (self.elapsed.as_secs_f64() * 1000.0).round() / 1000.0
  }
}

/// 调用一次检测器，不重试
pub fn run_inference<D: Detector>(
  detector: &D,
  image: &RgbImage,
  config: &InferenceConfig,
) -> Result<Inference, PipelineError> {
  let params = DetectParams::from(config);
  debug!(
    "置信度阈值: 请求 {} / 实际 {}, IoU: {}, 推理尺寸: {}",
    config.confidence, params.confidence, params.iou, params.image_size
  );

  let now = Instant::now();
  let result = detector
    .infer(image, &params)
    .map_err(PipelineError::inference)?;
  let elapsed = now.elapsed();
  info!("推理完成，耗时: {:.2?}, 检测数: {}", elapsed, result.len());

  Ok(Inference { result, elapsed })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use std::cell::Cell;

  #[derive(Debug, thiserror::Error)]
  #[error("npu fault")]
  struct Fault;

  struct Recording {
    seen: Cell<Option<DetectParams>>,
    fail: bool,
  }

  impl Detector for Recording {
    type Error = Fault;

    fn infer(&self, _: &RgbImage, params: &DetectParams) -> Result<DetectResult, Fault> {
      self.seen.set(Some(*params));
      if self.fail {
        return Err(Fault);
      }
      Ok(DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.5,
        bbox: [0.0, 0.0, 1.0, 1.0],
      }]))
    }

    fn class_name(&self, _: u32) -> Option<&str> {
      Some("whitefly")
    }
  }

  #[test]
  fn test_one_shot_params_reach_detector() {
    let detector = Recording {
      seen: Cell::new(None),
      fail: false,
    };
    let image = RgbImage::new(4, 4);

    let inference = run_inference(&detector, &image, &InferenceConfig::one_shot()).unwrap();
    assert_eq!(inference.result.len(), 1);
    assert_eq!(
      detector.seen.get(),
      Some(DetectParams {
        confidence: 0.05,
        iou: 0.45,
        image_size: 1280,
        max_det: 300,
      })
    );
  }

  #[test]
  fn test_detector_failure_is_inference_failure() {
    let detector = Recording {
      seen: Cell::new(None),
      fail: true,
    };
    let err = run_inference(&detector, &RgbImage::new(2, 2), &InferenceConfig::live()).unwrap_err();
    assert_eq!(err, PipelineError::InferenceFailure("npu fault".to_string()));
  }

  #[test]
  fn test_elapsed_rounded_to_millis() {
    let inference = Inference {
      result: DetectResult::default(),
      elapsed: Duration::from_micros(123_456),
    };
    assert_eq!(inference.elapsed_seconds(), 0.123);
  }
}
