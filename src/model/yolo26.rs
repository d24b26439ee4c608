// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/model/yolo26.rs - RKNPU 上的 YOLO26 检测器
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
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::model::{
  DetectItem, DetectParams, DetectResult, Detector, DetectorLoader, Labels, nms::nms,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_STRIDES: [u32; 3] = [8, 16, 32];

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("输出张量不完整: 检测头 {0}")]
  MalformedOutput(usize),
  #[error("输入尺寸 {0} 不是最大步长 32 的整数倍")]
  InvalidInputSize(u32),
  #[error("模型按 {model} 加载, 请求尺寸为 {requested}")]
  InputSizeMismatch { model: u32, requested: u32 },
}

impl Yolo26Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolo26Loader {
  flags: InitFlags,
  labels: Labels,
}

impl Default for Yolo26Loader {
  fn default() -> Self {
    Self {
      flags: InitFlags::default(),
      labels: Labels::coco(),
    }
  }
}

impl Yolo26Loader {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }
}

impl DetectorLoader for Yolo26Loader {
  type Detector = Yolo26;
  type Error = Yolo26Error;

  /// `image_size` 必须与导出 RKNN 模型时的 imgsz 一致
  fn load(&self, path: &Path, image_size: u32) -> Result<Yolo26, Yolo26Error> {
    let max_stride = YOLO26_STRIDES[YOLO26_STRIDES.len() - 1];
    if image_size == 0 || image_size % max_stride != 0 {
      error!("输入尺寸无效: {}", image_size);
      return Err(Yolo26Error::InvalidInputSize(image_size));
    }

    info!("加载模型文件: {}, 输入尺寸 {}", path.display(), image_size);
    let model_data = std::fs::read(path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成");
    Ok(Yolo26 {
      context,
      input_size: image_size,
      labels: self.labels.clone(),
    })
  }
}

pub struct Yolo26 {
  context: Context,
  input_size: u32,
  labels: Labels,
}

/// 根据张量大小区分回归输出和分类输出，返回 (reg, cls)
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  spatial: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  let reg_expected = 4 * spatial;
  let is_cls = |t: &[f32]| !t.is_empty() && t.len() % spatial == 0;

  if tensor1.len() == reg_expected && is_cls(tensor2) {
    Some((tensor1, tensor2))
  } else if tensor2.len() == reg_expected && is_cls(tensor1) {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

impl Yolo26 {
  fn preprocess(&self, image: &RgbImage) -> Vec<u8> {
    image::imageops::resize(
      image,
      self.input_size,
      self.input_size,
      image::imageops::FilterType::Triangle,
    )
    .into_raw()
  }

  /// 解码三个检测头，坐标为模型输入空间的像素坐标
  fn decode(&self, output: &rknpu::Output, confidence: f32) -> Result<Vec<DetectItem>, Yolo26Error> {
    let input = self.input_size as f32;
    let mut items = Vec::new();

    for (head_idx, stride) in YOLO26_STRIDES.iter().enumerate() {
      let map_size = (self.input_size / stride) as usize;
      let spatial = map_size * map_size;
      let stride = *stride as f32;

      let tensor1 = output.get_f32(head_idx * 2)?;
      let tensor2 = output.get_f32(head_idx * 2 + 1)?;
      let (reg, cls) = match_reg_cls_tensors(tensor1, tensor2, spatial)
        .ok_or(Yolo26Error::MalformedOutput(head_idx))?;
      let class_num = cls.len() / spatial;

      for h in 0..map_size {
        for w in 0..map_size {
          let idx = h * map_size + w;

          let (score, class_id) = {
            let mut max_logit = f32::MIN;
            let mut cls_idx = 0usize;
            for c in 0..class_num {
              let logit = cls[c * spatial + idx];
              if logit > max_logit {
                max_logit = logit;
                cls_idx = c;
              }
            }
            (sigmoid(max_logit), cls_idx as u32)
          };

          if score < confidence {
            continue;
          }

          let grid_x = (w as f32) + 0.5;
          let grid_y = (h as f32) + 0.5;

          items.push(DetectItem {
            class_id,
            score,
            bbox: [
              ((grid_x - reg[idx]) * stride).clamp(0.0, input),
              ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input),
              ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input),
              ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input),
            ],
          });
        }
      }
    }

    Ok(items)
  }
}

impl Detector for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, image: &RgbImage, params: &DetectParams) -> Result<DetectResult, Yolo26Error> {
    if params.image_size != self.input_size {
      error!(
        "RKNN 模型输入尺寸为 {}, 请求尺寸 {}",
        self.input_size, params.image_size
      );
      return Err(Yolo26Error::InputSizeMismatch {
        model: self.input_size,
        requested: params.image_size,
      });
    }

    debug!("设置模型输入");
    let input = self.preprocess(image);
    self
      .context
      .set_input(0, &input, TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;
    let output = self.context.get_outputs()?;

    let scale_x = image.width() as f32 / self.input_size as f32;
    let scale_y = image.height() as f32 / self.input_size as f32;
    let items = self
      .decode(&output, params.confidence)?
      .into_iter()
      .map(|mut item| {
        item.bbox = [
          item.bbox[0] * scale_x,
          item.bbox[1] * scale_y,
          item.bbox[2] * scale_x,
          item.bbox[3] * scale_y,
        ];
        item
      })
      .collect();

    let items = nms(items, params.iou, params.max_det);
    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }

  fn class_name(&self, class_id: u32) -> Option<&str> {
    self.labels.get(class_id)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
