// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/bin/predict.rs - 单张图片推理
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use fenshi::{
  config::AppConfig,
  logging::init_logging,
  model::Yolo26Loader,
  output::protocol::deliver,
  task::{PredictRequest, predict_response},
};

/// 单张图片推理，结果以 JSON 输出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测图片
  #[arg(long, value_name = "SOURCE")]
  pub source: PathBuf,
  /// RKNN 模型，默认为训练导出的 best.rknn（`fenshi-train export` 生成）
  #[arg(long, value_name = "MODEL")]
  pub model: Option<PathBuf>,
  /// 请求的置信度阈值（默认 0.15，实际阈值不高于配置的上限）
  #[arg(long, value_name = "CONF")]
  pub conf: Option<f32>,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 类别名称文件，每行一个
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// 响应通道: stdout: / file:///path / unix:///path，不可用时回退到 stdout
  #[arg(long, value_name = "CHANNEL", default_value = "stdout:")]
  pub channel: Url,
}

fn main() -> Result<()> {
  let args = Args::parse();

  let config = AppConfig::load_or_default(args.config.as_deref());
  init_logging(
    config
      .as_ref()
      .map(|config| config.log_level)
      .unwrap_or_default(),
  );

  let request = PredictRequest {
    source: args.source,
    model: args.model,
    confidence: args.conf,
    labels: args.labels,
  };
  let response = predict_response(&request, config, |labels| {
    Yolo26Loader::default().labels(labels)
  });

  deliver(&args.channel, &response, std::io::stdout().lock())?;
  Ok(())
}
