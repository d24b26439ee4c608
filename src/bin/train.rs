// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/bin/train.rs - 训练与断点续训
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
use clap::{Parser, Subcommand};
use tracing::info;

use fenshi::{
  config::AppConfig,
  logging::init_logging,
  train::{YoloCli, export, resume, train},
};

#[derive(Subcommand, Debug)]
pub enum Action {
  /// 从基础模型开始训练，完成后验证 best.pt 并导出 best.rknn
  Train {
    /// 数据集描述文件
    #[arg(long, value_name = "DATA")]
    data: Option<PathBuf>,
    /// 训练轮数
    #[arg(long, value_name = "EPOCHS")]
    epochs: Option<u32>,
  },
  /// 从 last.pt 继续训练
  Resume,
  /// 把权重导出为 RKNN 模型，默认导出 best.pt
  Export {
    /// 待导出的 .pt 权重
    #[arg(long, value_name = "WEIGHTS")]
    weights: Option<PathBuf>,
    /// RKNN 目标平台，例如 rk3588
    #[arg(long, value_name = "PLATFORM")]
    platform: Option<String>,
  },
}

/// 训练编排
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub action: Action,
  /// JSON 配置文件
  #[arg(long, global = true, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 训练器可执行文件
  #[arg(long, global = true, value_name = "TRAINER", default_value = "yolo")]
  pub trainer: String,
}

fn main() -> Result<()> {
  let args = Args::parse();
  let mut config = AppConfig::load_or_default(args.config.as_deref())?;
  init_logging(config.log_level);

  let trainer = YoloCli::new(config.runtime.clone()).with_program(&args.trainer);

  match args.action {
    Action::Train { data, epochs } => {
      if let Some(data) = data {
        config.training.data = data;
      }
      if let Some(epochs) = epochs {
        config.training.epochs = epochs;
      }
      let model = train(&trainer, &config.training)?;
      info!("可部署模型: {}", model.display());
    }
    Action::Resume => {
      resume(&trainer, &config.training)?;
      info!("续训完成: {}", config.training.weights_dir().display());
    }
    Action::Export { weights, platform } => {
      if let Some(platform) = platform {
        config.training.export_platform = platform;
      }
      let weights = weights.unwrap_or_else(|| config.training.best_weights());
      let model = export(&trainer, &config.training, &weights)?;
      info!("可部署模型: {}", model.display());
    }
  }

  Ok(())
}
