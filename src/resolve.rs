// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/resolve.rs - 模型权重解析
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

use tracing::{info, warn};

use crate::error::PipelineError;

/// 最优权重文件名标记
pub const BEST_MARKER: &str = "best";
/// 最新权重文件名标记
pub const LAST_MARKER: &str = "last";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  Primary,
  Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReference {
  pub path: PathBuf,
  pub state: Resolution,
}

/// 训练早期可能只有 last 权重，best 尚未生成
fn fallback_path(requested: &Path) -> Option<PathBuf> {
  let name = requested.file_name()?.to_str()?;
  if !name.contains(BEST_MARKER) {
    return None;
  }
  Some(requested.with_file_name(name.replace(BEST_MARKER, LAST_MARKER)))
}

/// 解析实际使用的权重文件
pub fn resolve_model(requested: impl AsRef<Path>) -> Result<ModelReference, PipelineError> {
  let requested = requested.as_ref();

  if requested.exists() {
    info!("使用模型权重: {}", requested.display());
    return Ok(ModelReference {
      path: requested.to_path_buf(),
      state: Resolution::Primary,
    });
  }

  if let Some(fallback) = fallback_path(requested)
    && fallback.exists()
  {
    warn!(
      "模型权重 {} 不存在, 回退到 {}",
      requested.display(),
      fallback.display()
    );
    return Ok(ModelReference {
      path: fallback,
      state: Resolution::Fallback,
    });
  }

  Err(PipelineError::ModelNotFound(
    requested.display().to_string(),
  ))
}
