// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/train.rs - 训练编排
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

//! 训练与断点续训
//!
//! 训练本身由外部训练器完成，这里只负责组装参数、检查断点和转发输出。
//! 训练得到的 `.pt` 权重需要导出为 RKNN 模型才能在 NPU 上推理。

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::RuntimeEnv;

#[derive(Error, Debug)]
pub enum TrainError {
  #[error("Checkpoint not found at {0}")]
  CheckpointMissing(String),
  #[error("Failed to start trainer '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },
  #[error("Trainer failed: {0}")]
  TrainerFailed(String),
  #[error("Exported model not found in {0}")]
  ExportMissing(String),
  #[error("Failed to deploy exported model: {0}")]
  Deploy(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
  pub data: PathBuf,
  pub base_model: PathBuf,
  pub epochs: u32,
  pub image_size: u32,
  pub project: PathBuf,
  pub name: String,
  pub exist_ok: bool,
  pub workers: u32,
  /// RKNN 目标平台
  pub export_platform: String,
}

impl Default for TrainingConfig {
  fn default() -> Self {
    Self {
      data: PathBuf::from("data/data.yaml"),
      base_model: PathBuf::from("yolov8n.pt"),
      epochs: 50,
      image_size: 640,
      project: PathBuf::from("runs/detect"),
      name: "train_v8n".to_string(),
      exist_ok: true,
      workers: 0,
      export_platform: "rk3588".to_string(),
    }
  }
}

impl TrainingConfig {
  /// `<project>/<name>/weights`
  pub fn weights_dir(&self) -> PathBuf {
    self.project.join(&self.name).join("weights")
  }

  pub fn best_weights(&self) -> PathBuf {
    self.weights_dir().join("best.pt")
  }

  pub fn last_weights(&self) -> PathBuf {
    self.weights_dir().join("last.pt")
  }

  /// 导出后可直接部署的 RKNN 模型
  pub fn best_model(&self) -> PathBuf {
    self.best_weights().with_extension(RKNN_EXTENSION)
  }
}

const RKNN_EXTENSION: &str = "rknn";

#[derive(Debug, Clone, PartialEq)]
pub enum TrainJob {
  Train(TrainingConfig),
  Resume {
    checkpoint: PathBuf,
  },
  Validate {
    weights: PathBuf,
    data: PathBuf,
    image_size: u32,
  },
  Export {
    weights: PathBuf,
    platform: String,
    image_size: u32,
  },
}

/// 外部训练器
pub trait Trainer {
  fn run(&self, job: &TrainJob) -> Result<(), TrainError>;
}

/// 通过 `yolo` 命令行训练
#[derive(Debug, Clone)]
pub struct YoloCli {
  program: String,
  runtime: RuntimeEnv,
}

impl Default for YoloCli {
  fn default() -> Self {
    Self::new(RuntimeEnv::default())
  }
}

fn py_bool(value: bool) -> &'static str {
  if value { "True" } else { "False" }
}

impl YoloCli {
  pub fn new(runtime: RuntimeEnv) -> Self {
    Self {
      program: "yolo".to_string(),
      runtime,
    }
  }

  pub fn with_program(mut self, program: impl Into<String>) -> Self {
    self.program = program.into();
    self
  }

  pub fn command(&self, job: &TrainJob) -> Command {
    let mut command = Command::new(&self.program);

    match job {
      TrainJob::Train(config) => {
        command.args(["detect", "train"]).args([
          format!("data={}", config.data.display()),
          format!("model={}", config.base_model.display()),
          format!("epochs={}", config.epochs),
          format!("imgsz={}", config.image_size),
          format!("project={}", config.project.display()),
          format!("name={}", config.name),
          format!("exist_ok={}", py_bool(config.exist_ok)),
          format!("workers={}", config.workers),
        ]);
      }
      TrainJob::Resume { checkpoint } => {
        command
          .args(["detect", "train", "resume"])
          .arg(format!("model={}", checkpoint.display()));
      }
      TrainJob::Validate {
        weights,
        data,
        image_size,
      } => {
        command.args(["detect", "val"]).args([
          format!("model={}", weights.display()),
          format!("data={}", data.display()),
          format!("imgsz={}", image_size),
        ]);
      }
      TrainJob::Export {
        weights,
        platform,
        image_size,
      } => {
        command.arg("export").args([
          format!("model={}", weights.display()),
          format!("format={}", RKNN_EXTENSION),
          format!("name={}", platform),
          format!("imgsz={}", image_size),
        ]);
      }
    }

    self.runtime.apply(&mut command);
    command
  }
}

fn forward_lines(stream: impl Read, prefix: &'static str) {
  for line in BufReader::new(stream).lines().map_while(Result::ok) {
    info!("[{}] {}", prefix, line);
  }
}

impl Trainer for YoloCli {
  fn run(&self, job: &TrainJob) -> Result<(), TrainError> {
    let mut command = self.command(job);
    debug!("执行训练命令: {:?}", command);

    let mut child = command
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|source| TrainError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    let stderr = child
      .stderr
      .take()
      .map(|stderr| thread::spawn(move || forward_lines(stderr, "trainer")));
    if let Some(stdout) = child.stdout.take() {
      forward_lines(stdout, "trainer");
    }
    if let Some(handle) = stderr {
      let _ = handle.join();
    }

    let status = child.wait().map_err(|source| TrainError::Spawn {
      program: self.program.clone(),
      source,
    })?;
    if !status.success() {
      error!("训练器退出异常: {}", status);
      return Err(TrainError::TrainerFailed(status.to_string()));
    }
    Ok(())
  }
}

/// 训练后用最优权重做一次验证并导出，返回可部署的 RKNN 模型路径
pub fn train<T: Trainer>(trainer: &T, config: &TrainingConfig) -> Result<PathBuf, TrainError> {
  info!(
    "开始训练: 数据 {}, 基础模型 {}, {} 轮",
    config.data.display(),
    config.base_model.display(),
    config.epochs
  );
  trainer.run(&TrainJob::Train(config.clone()))?;

  let best = config.best_weights();
  info!("训练完成，验证权重: {}", best.display());
  trainer.run(&TrainJob::Validate {
    weights: best.clone(),
    data: config.data.clone(),
    image_size: config.image_size,
  })?;

  export(trainer, config, &best)
}

/// `<dir>/<stem>_rknn_model/` 下按文件名排序的第一个 `.rknn`
fn find_exported(weights: &Path) -> Result<PathBuf, TrainError> {
  let stem = weights
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_default();
  let dir = weights
    .parent()
    .unwrap_or_else(|| Path::new("."))
    .join(format!("{}_{}_model", stem, RKNN_EXTENSION));
  let missing = || TrainError::ExportMissing(dir.display().to_string());

  let mut models: Vec<PathBuf> = std::fs::read_dir(&dir)
    .map_err(|_| missing())?
    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
    .filter(|path| path.extension().is_some_and(|ext| ext == RKNN_EXTENSION))
    .collect();
  models.sort();
  models.into_iter().next().ok_or_else(missing)
}

/// 把 `.pt` 权重导出为 RKNN 模型，并放到权重旁边（`best.pt` → `best.rknn`）
pub fn export<T: Trainer>(
  trainer: &T,
  config: &TrainingConfig,
  weights: &Path,
) -> Result<PathBuf, TrainError> {
  if !weights.is_file() {
    error!("找不到待导出的权重: {}", weights.display());
    return Err(TrainError::CheckpointMissing(weights.display().to_string()));
  }

  info!(
    "导出 RKNN 模型: {}, 平台 {}",
    weights.display(),
    config.export_platform
  );
  trainer.run(&TrainJob::Export {
    weights: weights.to_path_buf(),
    platform: config.export_platform.clone(),
    image_size: config.image_size,
  })?;

  let exported = find_exported(weights)?;
  let target = weights.with_extension(RKNN_EXTENSION);
  std::fs::copy(&exported, &target)?;
  info!("RKNN 模型: {}", target.display());
  Ok(target)
}

/// 从 `last.pt` 继续训练，断点不存在时不启动训练器
pub fn resume<T: Trainer>(trainer: &T, config: &TrainingConfig) -> Result<(), TrainError> {
  let checkpoint = config.last_weights();
  if !has_checkpoint(config) {
    error!("找不到断点文件: {}", checkpoint.display());
    return Err(TrainError::CheckpointMissing(
      checkpoint.display().to_string(),
    ));
  }

  info!("从断点继续训练: {}", checkpoint.display());
  trainer.run(&TrainJob::Resume { checkpoint })
}

/// 断点是否存在
pub fn has_checkpoint(config: &TrainingConfig) -> bool {
  config.last_weights().is_file()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::ffi::OsStr;

  #[derive(Default)]
  struct Recording {
    jobs: RefCell<Vec<TrainJob>>,
    // 像真实训练器一样写出权重和导出目录
    writes_outputs: bool,
  }

  impl Recording {
    fn writing() -> Self {
      Self {
        writes_outputs: true,
        ..Default::default()
      }
    }
  }

  impl Trainer for Recording {
    fn run(&self, job: &TrainJob) -> Result<(), TrainError> {
      self.jobs.borrow_mut().push(job.clone());
      if !self.writes_outputs {
        return Ok(());
      }
      match job {
        TrainJob::Train(config) => {
          std::fs::create_dir_all(config.weights_dir())?;
          std::fs::write(config.best_weights(), b"best")?;
          std::fs::write(config.last_weights(), b"last")?;
        }
        TrainJob::Export {
          weights, platform, ..
        } => {
          let stem = weights.file_stem().unwrap().to_string_lossy().into_owned();
          let dir = weights.with_file_name(format!("{}_rknn_model", stem));
          std::fs::create_dir_all(&dir)?;
          std::fs::write(dir.join(format!("{}-{}.rknn", stem, platform)), b"rknn")?;
          std::fs::write(dir.join("metadata.yaml"), b"imgsz: 640")?;
        }
        _ => {}
      }
      Ok(())
    }
  }

  fn config_in(dir: &Path) -> TrainingConfig {
    TrainingConfig {
      project: dir.to_path_buf(),
      ..Default::default()
    }
  }

  fn args(command: &Command) -> Vec<String> {
    command
      .get_args()
      .map(|arg| arg.to_string_lossy().into_owned())
      .collect()
  }

  #[test]
  fn test_default_paths() {
    let config = TrainingConfig::default();
    assert_eq!(
      config.best_weights(),
      PathBuf::from("runs/detect/train_v8n/weights/best.pt")
    );
    assert_eq!(
      config.last_weights(),
      PathBuf::from("runs/detect/train_v8n/weights/last.pt")
    );
    assert_eq!(
      config.best_model(),
      PathBuf::from("runs/detect/train_v8n/weights/best.rknn")
    );
  }

  #[test]
  fn test_train_command_carries_hyperparameters() {
    let command = YoloCli::default().command(&TrainJob::Train(TrainingConfig::default()));

    assert_eq!(command.get_program(), OsStr::new("yolo"));
    assert_eq!(
      args(&command),
      vec![
        "detect",
        "train",
        "data=data/data.yaml",
        "model=yolov8n.pt",
        "epochs=50",
        "imgsz=640",
        "project=runs/detect",
        "name=train_v8n",
        "exist_ok=True",
        "workers=0",
      ]
    );
    let envs: Vec<_> = command.get_envs().collect();
    assert_eq!(
      envs,
      vec![(OsStr::new("KMP_DUPLICATE_LIB_OK"), Some(OsStr::new("TRUE")))]
    );
  }

  #[test]
  fn test_resume_and_val_commands() {
    let cli = YoloCli::new(RuntimeEnv {
      allow_duplicate_openmp: false,
    });

    let command = cli.command(&TrainJob::Resume {
      checkpoint: PathBuf::from("w/last.pt"),
    });
    assert_eq!(args(&command), vec!["detect", "train", "resume", "model=w/last.pt"]);
    assert_eq!(command.get_envs().count(), 0);

    let command = cli.command(&TrainJob::Validate {
      weights: PathBuf::from("w/best.pt"),
      data: PathBuf::from("d.yaml"),
      image_size: 640,
    });
    assert_eq!(
      args(&command),
      vec!["detect", "val", "model=w/best.pt", "data=d.yaml", "imgsz=640"]
    );

    let command = cli.command(&TrainJob::Export {
      weights: PathBuf::from("w/best.pt"),
      platform: "rk3588".to_string(),
      image_size: 1280,
    });
    assert_eq!(
      args(&command),
      vec![
        "export",
        "model=w/best.pt",
        "format=rknn",
        "name=rk3588",
        "imgsz=1280"
      ]
    );
  }

  #[test]
  fn test_train_validates_then_exports_best() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let trainer = Recording::writing();

    let model = train(&trainer, &config).unwrap();
    assert_eq!(model, config.best_model());
    assert_eq!(std::fs::read(&model).unwrap(), b"rknn");

    let jobs = trainer.jobs.borrow();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0], TrainJob::Train(config.clone()));
    assert_eq!(
      jobs[1],
      TrainJob::Validate {
        weights: config.best_weights(),
        data: config.data.clone(),
        image_size: 640,
      }
    );
    assert_eq!(
      jobs[2],
      TrainJob::Export {
        weights: config.best_weights(),
        platform: "rk3588".to_string(),
        image_size: 640,
      }
    );
  }

  #[test]
  fn test_export_last_weights() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(config.weights_dir()).unwrap();
    std::fs::write(config.last_weights(), b"last").unwrap();

    let model = export(&Recording::writing(), &config, &config.last_weights()).unwrap();
    assert_eq!(model, config.weights_dir().join("last.rknn"));
    assert!(model.is_file());
  }

  #[test]
  fn test_export_without_output_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(config.weights_dir()).unwrap();
    std::fs::write(config.best_weights(), b"best").unwrap();

    let trainer = Recording::default();
    let err = export(&trainer, &config, &config.best_weights()).unwrap_err();
    assert!(matches!(err, TrainError::ExportMissing(_)));
    assert_eq!(trainer.jobs.borrow().len(), 1);
    assert!(!config.best_model().exists());
  }

  #[test]
  fn test_export_missing_weights_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let trainer = Recording::writing();

    let err = export(&trainer, &config, &config.best_weights()).unwrap_err();
    assert!(matches!(err, TrainError::CheckpointMissing(_)));
    assert!(trainer.jobs.borrow().is_empty());
  }

  #[test]
  fn test_resume_without_checkpoint_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let trainer = Recording::default();

    let err = resume(&trainer, &config).unwrap_err();
    assert!(matches!(err, TrainError::CheckpointMissing(_)));
    assert!(trainer.jobs.borrow().is_empty());
    assert!(!has_checkpoint(&config));
  }

  #[test]
  fn test_resume_from_last() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(config.weights_dir()).unwrap();
    std::fs::write(config.last_weights(), b"ckpt").unwrap();
    assert!(has_checkpoint(&config));

    let trainer = Recording::default();
    resume(&trainer, &config).unwrap();
    assert_eq!(
      trainer.jobs.borrow()[0],
      TrainJob::Resume {
        checkpoint: config.last_weights()
      }
    );
  }

  #[test]
  fn test_missing_program_is_spawn_error() {
    let cli = YoloCli::default().with_program("/nonexistent/fenshi-yolo");
    let err = cli
      .run(&TrainJob::Train(TrainingConfig::default()))
      .unwrap_err();
    assert!(matches!(err, TrainError::Spawn { .. }));
  }

  #[cfg(unix)]
  #[test]
  fn test_exit_status() {
    let job = TrainJob::Train(TrainingConfig::default());
    assert!(YoloCli::default().with_program("echo").run(&job).is_ok());
    assert!(matches!(
      YoloCli::default().with_program("false").run(&job),
      Err(TrainError::TrainerFailed(_))
    ));
  }
}
