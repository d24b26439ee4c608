// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/task.rs - 单次推理任务
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
use std::time::Instant;

use tracing::{error, info, warn};

use crate::{
  config::{AppConfig, ConfigError, InferenceConfig},
  detection::normalize,
  error::PipelineError,
  infer::run_inference,
  input::load_image,
  model::{DetectorLoader, Labels},
  output::{
    draw::Draw,
    encode::ArtifactEncoder,
    protocol::{ErrorResult, InferenceResult, Response},
  },
  resolve::resolve_model,
};

/// 单张图片推理：解析权重、加载模型、推理、编码标注图
///
/// 任何失败都转换为错误响应，调用方总能得到恰好一个 [`Response`]。
pub struct OneShotTask<L> {
  loader: L,
  config: InferenceConfig,
  encoder: ArtifactEncoder,
}

impl<L: DetectorLoader> OneShotTask<L> {
  pub fn new(loader: L, config: InferenceConfig) -> Self {
    Self {
      loader,
      config,
      encoder: ArtifactEncoder::default(),
    }
  }

  pub fn with_encoder(mut self, encoder: ArtifactEncoder) -> Self {
    self.encoder = encoder;
    self
  }

  fn try_run(&self, source: &Path, model: &Path) -> Result<InferenceResult, PipelineError> {
    if !source.is_file() {
      return Err(PipelineError::SourceNotFound(source.display().to_string()));
    }

    let reference = resolve_model(model)?;

    let now = Instant::now();
    let detector = self
      .loader
      .load(&reference.path, self.config.image_size)
      .map_err(PipelineError::inference)?;
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());

    let image = load_image(source)?;
    let inference = run_inference(&detector, &image, &self.config)?;
    let detections = normalize(&detector, &inference.result)?;
    let annotated_image = self.encoder.encode(&image, &detections)?;

    Ok(InferenceResult::new(
      source.display().to_string(),
      annotated_image,
      detections,
      inference.elapsed_seconds(),
    ))
  }

  pub fn run(&self, source: impl AsRef<Path>, model: impl AsRef<Path>) -> Response {
    let source: PathBuf = source.as_ref().to_path_buf();
    info!("开始单次推理: {}", source.display());

    let result = self.try_run(&source, model.as_ref());
    match &result {
      Ok(result) => info!("推理成功，目标数: {}", result.object_count),
      Err(e) => error!("推理失败: {}", e),
    }
    Response::from(result)
  }
}

/// 命令行的一次预测请求，未给出的项取配置中的值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictRequest {
  pub source: PathBuf,
  pub model: Option<PathBuf>,
  pub confidence: Option<f32>,
  pub labels: Option<PathBuf>,
}

fn error_response(error: String) -> Response {
  Response::Error(ErrorResult { error })
}

/// 组装一次预测的响应
///
/// 配置或类别文件读取失败同样得到错误响应，模型不会被加载。
/// `make_loader` 接收类别表，返回实际使用的加载器。
pub fn predict_response<L, F>(
  request: &PredictRequest,
  config: Result<AppConfig, ConfigError>,
  make_loader: F,
) -> Response
where
  L: DetectorLoader,
  F: FnOnce(Labels) -> L,
{
  let config = match config {
    Ok(config) => config,
    Err(e) => {
      error!("配置文件加载失败: {}", e);
      return error_response(format!("Failed to load config: {}", e));
    }
  };

  let labels = match &request.labels {
    Some(path) => match Labels::from_file(path) {
      Ok(labels) => labels,
      Err(e) => {
        error!("无法读取类别文件 {}: {}", path.display(), e);
        return error_response(format!("Failed to load labels: {}", e));
      }
    },
    None => Labels::coco(),
  };

  let draw = Draw::from_font_option(config.label_font.as_deref()).unwrap_or_else(|e| {
    warn!("字体加载失败，使用内置点阵字体: {}", e);
    Draw::default()
  });

  let inference = match request.confidence {
    Some(conf) => config.one_shot.with_confidence(conf),
    None => config.one_shot,
  };
  let model = request
    .model
    .clone()
    .unwrap_or_else(|| config.training.best_model());

  info!("图片: {}", request.source.display());
  info!("模型: {}", model.display());

  OneShotTask::new(make_loader(labels), inference)
    .with_encoder(ArtifactEncoder::new(draw))
    .run(&request.source, &model)
}
