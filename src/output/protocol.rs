// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output/protocol.rs - 推理响应的组装与分帧输出
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

//! 单次推理的响应协议
//!
//! 每次调用恰好输出一个 JSON 对象：成功时为 [`InferenceResult`]，失败时为
//! [`ErrorResult`]。默认写到 stdout，并用 `__JSON_START__` / `__JSON_END__`
//! 两行包裹，调用方可以在混有依赖库输出的文本流中定位载荷。
//! 也可以通过 `file://` 或 `unix://` 通道发送一行不带分隔符的 JSON。

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, detection::DetectionRecord, error::PipelineError};

pub const JSON_START: &str = "__JSON_START__";
pub const JSON_END: &str = "__JSON_END__";

const SUCCESS_KEYS: [&str; 5] = [
  "image_path",
  "annotated_image",
  "detections",
  "inference_time",
  "object_count",
];

#[derive(Error, Debug)]
pub enum ProtocolError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("missing sentinel line {0}")]
  MissingSentinel(&'static str),
  #[error("expected exactly one JSON object between sentinels, found {0} lines")]
  PayloadLines(usize),
  #[error("payload is neither a success nor an error object: keys {0:?}")]
  MixedPayload(Vec<String>),
  #[error("unsupported response channel: {0}")]
  UnsupportedChannel(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
  pub image_path: String,
  pub annotated_image: String,
  pub detections: Vec<DetectionRecord>,
  pub inference_time: f64,
  pub object_count: usize,
}

impl InferenceResult {
  pub fn new(
    image_path: impl Into<String>,
    annotated_image: String,
    detections: Vec<DetectionRecord>,
    inference_time: f64,
  ) -> Self {
    Self {
      image_path: image_path.into(),
      annotated_image,
      object_count: detections.len(),
      detections,
      inference_time,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
  pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
  Success(InferenceResult),
  Error(ErrorResult),
}

impl From<Result<InferenceResult, PipelineError>> for Response {
  fn from(result: Result<InferenceResult, PipelineError>) -> Self {
    match result {
      Ok(result) => Response::Success(result),
      Err(err) => Response::Error(ErrorResult {
        error: err.to_string(),
      }),
    }
  }
}

impl Response {
  pub fn is_success(&self) -> bool {
    matches!(self, Response::Success(_))
  }

  pub fn to_json(&self) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(self)?)
  }

  /// 按键集合区分成功与失败，两者混合的对象视为错误
  pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
    let object: Map<String, Value> = match value {
      Value::Object(object) => object,
      other => return Err(ProtocolError::MixedPayload(vec![other.to_string()])),
    };

    let keys: Vec<String> = object.keys().cloned().collect();
    if keys.len() == 1 && object.contains_key("error") {
      return Ok(Response::Error(serde_json::from_value(Value::Object(object))?));
    }

    let is_success =
      keys.len() == SUCCESS_KEYS.len() && SUCCESS_KEYS.iter().all(|k| object.contains_key(*k));
    if is_success {
      return Ok(Response::Success(serde_json::from_value(Value::Object(
        object,
      ))?));
    }

    Err(ProtocolError::MixedPayload(keys))
  }
}

/// 写出带分隔行的响应，三行一次性写入并刷新
pub fn write_framed<W: Write>(mut out: W, response: &Response) -> Result<(), ProtocolError> {
  let payload = format!("{}\n{}\n{}\n", JSON_START, response.to_json()?, JSON_END);
  out.write_all(payload.as_bytes())?;
  out.flush()?;
  Ok(())
}

/// 从混合文本中取出分隔行之间的唯一响应
pub fn extract_response(text: &str) -> Result<Response, ProtocolError> {
  let lines: Vec<&str> = text.lines().map(|line| line.trim_end_matches('\r')).collect();

  let start = lines
    .iter()
    .rposition(|line| *line == JSON_START)
    .ok_or(ProtocolError::MissingSentinel(JSON_START))?;
  let end = lines[start + 1..]
    .iter()
    .position(|line| *line == JSON_END)
    .map(|offset| start + 1 + offset)
    .ok_or(ProtocolError::MissingSentinel(JSON_END))?;

  let payload: Vec<&str> = lines[start + 1..end]
    .iter()
    .copied()
    .filter(|line| !line.trim().is_empty())
    .collect();
  if payload.len() != 1 {
    return Err(ProtocolError::PayloadLines(payload.len()));
  }

  Response::from_value(serde_json::from_str(payload[0])?)
}

/// 响应输出通道
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseChannel {
  /// stdout，带分隔行，兼容旧调用方
  #[default]
  FramedStdout,
  /// 写入文件，一行 JSON
  File(PathBuf),
  /// 连接 Unix 套接字，发送一行 JSON
  #[cfg(unix)]
  UnixSocket(PathBuf),
}

impl FromUrl for ResponseChannel {
  type Error = ProtocolError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "stdout" => Ok(ResponseChannel::FramedStdout),
      "file" => Ok(ResponseChannel::File(PathBuf::from(url.path()))),
      #[cfg(unix)]
      "unix" => Ok(ResponseChannel::UnixSocket(PathBuf::from(url.path()))),
      other => Err(ProtocolError::UnsupportedChannel(other.to_string())),
    }
  }
}

impl ResponseChannel {
  pub fn send(&self, response: &Response) -> Result<(), ProtocolError> {
    match self {
      ResponseChannel::FramedStdout => {
        debug!("通过 stdout 输出响应");
        write_framed(std::io::stdout().lock(), response)
      }
      ResponseChannel::File(path) => {
        info!("写入响应文件: {}", path.display());
        let line = format!("{}\n", response.to_json()?);
        std::fs::write(path, line)?;
        Ok(())
      }
      #[cfg(unix)]
      ResponseChannel::UnixSocket(path) => {
        info!("通过 Unix 套接字发送响应: {}", path.display());
        let mut stream = std::os::unix::net::UnixStream::connect(path)?;
        stream.write_all(format!("{}\n", response.to_json()?).as_bytes())?;
        stream.flush()?;
        Ok(())
      }
    }
  }
}

/// 按 `channel` 发送响应
///
/// 通道无法建立或发送失败时，在 `fallback` 上写出带分隔行的错误响应，
/// 调用方仍然能收到恰好一个响应。
pub fn deliver<W: Write>(channel: &Url, response: &Response, fallback: W) -> Result<(), ProtocolError> {
  let sent = ResponseChannel::from_url(channel).and_then(|channel| channel.send(response));
  let Err(e) = sent else {
    return Ok(());
  };

  error!("响应发送失败 {}: {}", channel, e);
  let error = Response::Error(ErrorResult {
    error: format!("Failed to deliver response: {}", e),
  });
  write_framed(fallback, &error)
}
