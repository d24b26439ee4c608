// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/bin/live_camera.rs - 摄像头实时检测
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
use tracing::{info, warn};
use url::Url;

use fenshi::{
  FromUrl,
  config::AppConfig,
  input::V4lCameraOpener,
  live::{LiveSession, interrupt_keys},
  logging::init_logging,
  model::{DetectorLoader, Labels, Yolo26Loader},
  output::{DisplayWrapper, draw::Draw},
  resolve::resolve_model,
};

/// 摄像头实时检测，按 Ctrl-C 退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型，默认为训练导出的 best.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Option<PathBuf>,
  /// 置信度阈值（默认 0.25）
  #[arg(long, value_name = "CONF")]
  pub conf: Option<f32>,
  /// 摄像头编号
  #[arg(long, value_name = "CAMERA", default_value_t = 0)]
  pub camera: u32,
  /// 指定设备，例如 v4l:///dev/video2，优先于编号
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<Url>,
  /// 显示面: image:///path.jpg 或 folder:///dir
  #[arg(long, value_name = "DISPLAY", default_value = "image:///tmp/fenshi-live.jpg")]
  pub display: Url,
  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 类别名称文件，每行一个
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
}

fn main() -> Result<()> {
  let args = Args::parse();
  let config = AppConfig::load_or_default(args.config.as_deref())?;
  init_logging(config.log_level);

  let labels = match &args.labels {
    Some(path) => Labels::from_file(path)?,
    None => Labels::coco(),
  };
  let draw = Draw::from_font_option(config.label_font.as_deref())?;

  let model = args
    .model
    .clone()
    .unwrap_or_else(|| config.training.best_model());
  let inference = match args.conf {
    Some(conf) => config.live.with_confidence(conf),
    None => config.live,
  };

  let reference = resolve_model(&model)?;
  let detector = Yolo26Loader::default()
    .labels(labels)
    .load(&reference.path, inference.image_size)?;

  let opener = match &args.device {
    Some(url) => V4lCameraOpener::from_url(url)?,
    None => V4lCameraOpener::default(),
  };
  let display = DisplayWrapper::from_url(&args.display)?.with_keys(interrupt_keys()?);
  info!("显示面: {}", args.display);

  let report = LiveSession::new(inference)
    .with_draw(draw)
    .with_camera_index(args.camera)
    .with_frame_number(args.frame_number)
    .run(&opener, &detector, display);

  if report.is_clean() {
    info!("实时检测结束，共 {} 帧", report.frames);
  } else {
    warn!(
      "实时检测异常结束: {:?}, 共 {} 帧",
      report.end, report.frames
    );
  }
  Ok(())
}
