// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/detection.rs - 检测结果规范化
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

use serde::{Deserialize, Serialize};

use crate::{
  error::PipelineError,
  model::{DetectItem, DetectResult, Detector},
};

const CONFIDENCE_DECIMALS: i32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  pub class_name: String,
  pub confidence: f64,
  pub bbox: [i64; 4], // [x1, y1, x2, y2]
}

fn round_to(value: f64, decimals: i32) -> f64 {
  let factor = 10f64.powi(decimals);
  (value * factor).round_ties_even() / factor
}

fn normalize_item<D: Detector>(
  detector: &D,
  item: &DetectItem,
) -> Result<DetectionRecord, PipelineError> {
  let class_name = detector.class_name(item.class_id).ok_or_else(|| {
    PipelineError::InferenceFailure(format!("no class name for index {}", item.class_id))
  })?;

  let score = item.score as f64;
  if !(0.0..=1.0).contains(&score) {
    return Err(PipelineError::InferenceFailure(format!(
      "confidence {} out of range",
      item.score
    )));
  }

  if item.bbox.iter().any(|v| !v.is_finite()) {
    return Err(PipelineError::InferenceFailure(format!(
      "non-finite bounding box {:?}",
      item.bbox
    )));
  }

  // 不裁剪到图像范围，越界坐标原样保留
  let bbox = item.bbox.map(|v| (v as f64).round_ties_even() as i64);

  Ok(DetectionRecord {
    class_name: class_name.to_string(),
    confidence: round_to(score, CONFIDENCE_DECIMALS),
    bbox,
  })
}

/// 保持检测器原始顺序，不排序、不去重
pub fn normalize<D: Detector>(
  detector: &D,
  result: &DetectResult,
) -> Result<Vec<DetectionRecord>, PipelineError> {
  result
    .items
    .iter()
    .map(|item| normalize_item(detector, item))
    .collect()
}
