// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/model.rs - 检测模型能力定义
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

use crate::config::InferenceConfig;

/// 单次前向推理的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
  pub confidence: f32,
  pub iou: f32,
  pub image_size: u32,
  pub max_det: usize,
}

impl From<&InferenceConfig> for DetectParams {
  fn from(config: &InferenceConfig) -> Self {
    Self {
      confidence: config.effective_confidence(),
      iou: config.iou,
      image_size: config.image_size,
      max_det: config.max_detections,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 检测器能力：输入图像，输出带类别的检测框
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, image: &RgbImage, params: &DetectParams) -> Result<DetectResult, Self::Error>;

  fn class_name(&self, class_id: u32) -> Option<&str>;
}

/// 从权重文件加载检测器
pub trait DetectorLoader {
  type Detector: Detector;
  type Error: std::error::Error + Send + Sync + 'static;

  /// `image_size` 为模型输入边长，检测器以该尺寸预处理每一帧
  fn load(&self, path: &Path, image_size: u32) -> Result<Self::Detector, Self::Error>;
}

mod labels;
pub use self::labels::{COCO_CLASSES, Labels, LabelsError};

pub mod nms;

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Error, Yolo26Loader};
