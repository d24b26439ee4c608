// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/live.rs - 实时摄像头检测会话
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

//! 实时检测会话
//!
//! 状态机为 `Opening → Running → Closed`：打开摄像头后逐帧读取、推理、
//! 绘制并显示，每帧之后等待 1ms 检查退出键 `q`。任何失败都只结束会话，
//! 进入 `Closed` 时释放摄像头并销毁显示面。

use std::{thread, time::Duration};

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  config::InferenceConfig,
  detection::normalize,
  error::PipelineError,
  infer::run_inference,
  input::{CAMERA_RESOLUTION, Camera, CameraOpener, DEFAULT_CAMERA_INDEX},
  model::Detector,
  output::{
    DisplaySurface, KeyReceiver,
    draw::{Draw, INSTRUCTION_COLOR},
  },
};

pub const QUIT_KEY: char = 'q';
pub const QUIT_POLL: Duration = Duration::from_millis(1);
pub const INSTRUCTION_TEXT: &str = "Press 'q' to exit";
pub const INSTRUCTION_ORIGIN: (i32, i32) = (10, 30);
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Opening,
  Running,
  Closed,
}

/// 会话结束原因
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
  QuitKey,
  FrameLimit,
  Failed(PipelineError),
  DisplayFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
  pub states: Vec<SessionState>,
  pub frames: usize,
  pub end: SessionEnd,
}

impl SessionReport {
  /// 由用户主动结束（退出键或达到帧数）
  pub fn is_clean(&self) -> bool {
    matches!(self.end, SessionEnd::QuitKey | SessionEnd::FrameLimit)
  }
}

pub struct LiveSession {
  config: InferenceConfig,
  draw: Draw,
  camera_index: u32,
  resolution: (u32, u32),
  max_frames: Option<usize>,
}

impl Default for LiveSession {
  fn default() -> Self {
    Self::new(InferenceConfig::live())
  }
}

impl LiveSession {
  pub fn new(config: InferenceConfig) -> Self {
    Self {
      config,
      draw: Draw::default(),
      camera_index: DEFAULT_CAMERA_INDEX,
      resolution: CAMERA_RESOLUTION,
      max_frames: None,
    }
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_camera_index(mut self, index: u32) -> Self {
    self.camera_index = index;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.max_frames = frame_number;
    self
  }

  /// 推理并绘制一帧，原始帧不被修改
  fn render_frame<D: Detector>(
    &self,
    detector: &D,
    frame: &RgbImage,
  ) -> Result<RgbImage, PipelineError> {
    let inference = run_inference(detector, frame, &self.config)?;
    let records = normalize(detector, &inference.result)?;
    let mut annotated = self.draw.annotate(frame, &records);
    let (x, y) = INSTRUCTION_ORIGIN;
    self
      .draw
      .draw_text(&mut annotated, x, y, INSTRUCTION_TEXT, INSTRUCTION_COLOR);
    Ok(annotated)
  }

  pub fn run<O, D, S>(&self, opener: &O, detector: &D, mut display: S) -> SessionReport
  where
    O: CameraOpener,
    D: Detector,
    S: DisplaySurface,
  {
    let mut states = vec![SessionState::Opening];
    info!("打开摄像头 {}...", self.camera_index);

    let mut camera = match opener.open(self.camera_index, self.resolution) {
      Ok(camera) => camera,
      Err(e) => {
        error!("无法打开摄像头 {}: {}", self.camera_index, e);
        states.push(SessionState::Closed);
        display.destroy();
        return SessionReport {
          states,
          frames: 0,
          end: SessionEnd::Failed(PipelineError::DeviceUnavailable(e.to_string())),
        };
      }
    };

    states.push(SessionState::Running);
    info!("开始实时检测，按 '{}' 退出", QUIT_KEY);

    let mut frames = 0;
    let end = loop {
      let frame = match camera.read_frame() {
        Ok(frame) => frame,
        Err(e) => {
          error!("读取第 {} 帧失败: {}", frames + 1, e);
          break SessionEnd::Failed(PipelineError::FrameReadFailure(e.to_string()));
        }
      };

      let annotated = match self.render_frame(detector, &frame) {
        Ok(annotated) => annotated,
        Err(e) => {
          error!("第 {} 帧处理失败: {}", frames + 1, e);
          break SessionEnd::Failed(e);
        }
      };

      if let Err(e) = display.show(&annotated) {
        error!("显示失败: {}", e);
        break SessionEnd::DisplayFailure(e.to_string());
      }
      frames += 1;
      debug!("已显示第 {} 帧", frames);

      if display.poll_key(QUIT_POLL) == Some(QUIT_KEY) {
        warn!("收到退出键，退出检测循环");
        break SessionEnd::QuitKey;
      }
      if self.max_frames.is_some_and(|n| frames >= n) {
        info!("达到指定帧数 {}, 退出检测循环", frames);
        break SessionEnd::FrameLimit;
      }
    };

    states.push(SessionState::Closed);
    camera.release();
    display.destroy();
    info!("会话结束，共处理 {} 帧", frames);

    SessionReport { states, frames, end }
  }
}

/// 将中断信号转为退出键
///
/// 收到信号后若主循环 30 秒内仍未退出，则强制结束进程。
pub fn interrupt_keys() -> Result<KeyReceiver, ctrlc::Error> {
  let (tx, rx) = std::sync::mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(QUIT_KEY);
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(KeyReceiver::new(rx))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{DetectItem, DetectParams, DetectResult};
  use std::cell::RefCell;
  use std::collections::VecDeque;
  use std::rc::Rc;

  #[derive(Debug, thiserror::Error)]
  #[error("{0}")]
  struct Fault(&'static str);

  #[derive(Default)]
  struct Log {
    shown: usize,
    released: bool,
    destroyed: bool,
    last: Option<RgbImage>,
  }

  struct FakeCamera {
    remaining: usize,
    log: Rc<RefCell<Log>>,
  }

  impl Camera for FakeCamera {
    type Error = Fault;

    fn read_frame(&mut self) -> Result<RgbImage, Fault> {
      if self.remaining == 0 {
        return Err(Fault("stream ended"));
      }
      self.remaining -= 1;
      Ok(RgbImage::new(160, 120))
    }

    fn release(self) {
      self.log.borrow_mut().released = true;
    }
  }

  struct FakeOpener {
    frames: Option<usize>,
    log: Rc<RefCell<Log>>,
  }

  impl CameraOpener for FakeOpener {
    type Camera = FakeCamera;
    type Error = Fault;

    fn open(&self, index: u32, resolution: (u32, u32)) -> Result<FakeCamera, Fault> {
      assert_eq!((index, resolution), (0, (1280, 720)));
      match self.frames {
        Some(remaining) => Ok(FakeCamera {
          remaining,
          log: self.log.clone(),
        }),
        None => Err(Fault("no device")),
      }
    }
  }

  struct FakeDetector {
    fail: bool,
  }

  impl Detector for FakeDetector {
    type Error = Fault;

    fn infer(&self, _: &RgbImage, params: &DetectParams) -> Result<DetectResult, Fault> {
      assert_eq!(params.confidence, 0.25);
      if self.fail {
        return Err(Fault("npu fault"));
      }
      Ok(DetectResult::from(vec![DetectItem {
        class_id: 0,
        score: 0.8,
        bbox: [40.0, 50.0, 90.0, 100.0],
      }]))
    }

    fn class_name(&self, _: u32) -> Option<&str> {
      Some("whitefly")
    }
  }

  struct FakeDisplay {
    keys: VecDeque<Option<char>>,
    log: Rc<RefCell<Log>>,
  }

  impl DisplaySurface for FakeDisplay {
    type Error = Fault;

    fn show(&mut self, frame: &RgbImage) -> Result<(), Fault> {
      let mut log = self.log.borrow_mut();
      log.shown += 1;
      log.last = Some(frame.clone());
      Ok(())
    }

    fn poll_key(&mut self, wait: Duration) -> Option<char> {
      assert_eq!(wait, QUIT_POLL);
      self.keys.pop_front().flatten()
    }

    fn destroy(self) {
      self.log.borrow_mut().destroyed = true;
    }
  }

  fn fixture(frames: Option<usize>, keys: Vec<Option<char>>) -> (FakeOpener, FakeDisplay, Rc<RefCell<Log>>) {
    let log = Rc::new(RefCell::new(Log::default()));
    let opener = FakeOpener {
      frames,
      log: log.clone(),
    };
    let display = FakeDisplay {
      keys: keys.into(),
      log: log.clone(),
    };
    (opener, display, log)
  }

  #[test]
  fn test_unavailable_camera_skips_running() {
    let (opener, display, log) = fixture(None, vec![]);
    let report = LiveSession::default().run(&opener, &FakeDetector { fail: false }, display);

    assert_eq!(
      report.states,
      vec![SessionState::Opening, SessionState::Closed]
    );
    assert_eq!(report.frames, 0);
    assert!(matches!(
      report.end,
      SessionEnd::Failed(PipelineError::DeviceUnavailable(_))
    ));
    assert!(log.borrow().destroyed);
    assert_eq!(log.borrow().shown, 0);
  }

  #[test]
  fn test_quit_key_closes_session() {
    let (opener, display, log) = fixture(Some(10), vec![None, None, Some('x'), Some('q')]);
    let report = LiveSession::default().run(&opener, &FakeDetector { fail: false }, display);

    assert_eq!(
      report.states,
      vec![
        SessionState::Opening,
        SessionState::Running,
        SessionState::Closed
      ]
    );
    assert_eq!(report.frames, 4);
    assert_eq!(report.end, SessionEnd::QuitKey);
    assert!(report.is_clean());
    let log = log.borrow();
    assert!(log.released && log.destroyed);
  }

  #[test]
  fn test_frame_read_failure_ends_session() {
    let (opener, display, log) = fixture(Some(2), vec![]);
    let report = LiveSession::default().run(&opener, &FakeDetector { fail: false }, display);

    assert_eq!(report.frames, 2);
    assert!(matches!(
      report.end,
      SessionEnd::Failed(PipelineError::FrameReadFailure(_))
    ));
    assert!(!report.is_clean());
    assert!(log.borrow().released);
  }

  #[test]
  fn test_inference_failure_ends_session() {
    let (opener, display, log) = fixture(Some(5), vec![]);
    let report = LiveSession::default().run(&opener, &FakeDetector { fail: true }, display);

    assert_eq!(report.frames, 0);
    assert!(matches!(
      report.end,
      SessionEnd::Failed(PipelineError::InferenceFailure(_))
    ));
    let log = log.borrow();
    assert!(log.released && log.destroyed);
  }

  #[test]
  fn test_frame_limit_and_overlay() {
    let (opener, display, log) = fixture(Some(10), vec![]);
    let report = LiveSession::default()
      .with_frame_number(Some(3))
      .run(&opener, &FakeDetector { fail: false }, display);

    assert_eq!(report.frames, 3);
    assert_eq!(report.end, SessionEnd::FrameLimit);

    let log = log.borrow();
    let last = log.last.as_ref().unwrap();
    // 检测框边缘与提示文字区域都被绘制
    assert_ne!(*last.get_pixel(40, 75), image::Rgb([0, 0, 0]));
    let overlay = (10..120)
      .flat_map(|x| (30..50).map(move |y| (x, y)))
      .any(|(x, y)| *last.get_pixel(x, y) == image::Rgb(INSTRUCTION_COLOR));
    assert!(overlay);
  }
}
