// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/config.rs - 配置管理
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::train::TrainingConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 单次推理参数
///
/// `confidence` 为调用方请求的置信度阈值；`confidence_cap` 存在时，
/// 实际阈值不会高于该上限，用于在小目标密集场景下优先召回。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
  pub confidence: f32,
  pub confidence_cap: Option<f32>,
  pub iou: f32,
  pub image_size: u32,
  /// 单张图片最多保留的检测数
  #[serde(default = "default_max_detections")]
  pub max_detections: usize,
}

fn default_max_detections() -> usize {
  300
}

impl InferenceConfig {
  /// 单张图片推理：低阈值 + 大分辨率
  pub fn one_shot() -> Self {
    Self {
      confidence: 0.15,
      confidence_cap: Some(0.05),
      iou: 0.45,
      image_size: 1280,
      max_detections: default_max_detections(),
    }
  }

  /// 实时摄像头推理
  pub fn live() -> Self {
    Self {
      confidence: 0.25,
      confidence_cap: None,
      iou: 0.7,
      image_size: 640,
      max_detections: default_max_detections(),
    }
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  /// 传给检测器的实际置信度阈值
  pub fn effective_confidence(&self) -> f32 {
    match self.confidence_cap {
      Some(cap) => self.confidence.min(cap),
      None => self.confidence,
    }
  }
}

/// 外部运行时的兼容性设置，在启动时显式传入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeEnv {
  /// 允许重复加载 OpenMP 运行时（KMP_DUPLICATE_LIB_OK）
  pub allow_duplicate_openmp: bool,
}

impl Default for RuntimeEnv {
  fn default() -> Self {
    Self {
      allow_duplicate_openmp: true,
    }
  }
}

impl RuntimeEnv {
  pub fn vars(&self) -> Vec<(&'static str, &'static str)> {
    let mut vars = Vec::new();
    if self.allow_duplicate_openmp {
      vars.push(("KMP_DUPLICATE_LIB_OK", "TRUE"));
    }
    vars
  }

  pub fn apply(&self, command: &mut std::process::Command) {
    for (key, value) in self.vars() {
      command.env(key, value);
    }
  }
}

/// 日志级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Error,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogLevel::Error => "error",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub one_shot: InferenceConfig,
  pub live: InferenceConfig,
  pub training: TrainingConfig,
  pub runtime: RuntimeEnv,
  pub log_level: LogLevel,
  /// 标签字体（TTF），未设置时使用内置点阵字体
  pub label_font: Option<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      one_shot: InferenceConfig::one_shot(),
      live: InferenceConfig::live(),
      training: TrainingConfig::default(),
      runtime: RuntimeEnv::default(),
      log_level: LogLevel::default(),
      label_font: None,
    }
  }
}

impl AppConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config = serde_json::from_str(&content)?;
    info!("已加载配置文件: {}", path.as_ref().display());
    Ok(config)
  }

  /// 有配置文件时加载，否则使用默认值
  pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load(path),
      None => Ok(Self::default()),
    }
  }
}
