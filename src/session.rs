// 该文件是 Tanjing （探镜） 项目的一部分。
// src/session.rs - 实时会话事件循环
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 会话是控制器的唯一写者。采集线程、输入线程和 Ctrl-C 处理器
//! 都把事件送进同一个通道，主循环以 `recv_timeout` 等待，
//! 因此冻结等命令不会排在卡住的采集后面。
//! 采集线程最多积压 [`MAX_PENDING_TICKS`] 帧，超出时丢弃新帧，命令发送从不阻塞。

use std::{
  fmt::Display,
  str::FromStr,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, Sender},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  controller::AnalysisController,
  output::{Render, View},
  pipeline::Analyzer,
  snapshot::FrameSnapshot,
  source::{CaptureError, FrameSource, Tick},
  steps::Level,
  transform::{StepError, StepTransformer},
};

/// 通道中尚未处理的采集结果上限
pub const MAX_PENDING_TICKS: usize = 2;
pub const DEFAULT_TICK_BUDGET: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Freeze,
  Advance,
  Retreat,
  Unfreeze,
  SetLevel(Level),
  Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法识别的命令: {0:?}")]
pub struct ParseCommandError(String);

impl FromStr for Command {
  type Err = ParseCommandError;

  /// 单键命令，供终端输入使用
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "f" | "freeze" | "space" => Ok(Command::Freeze),
      "n" | "d" | "next" | "right" => Ok(Command::Advance),
      "p" | "a" | "prev" | "left" => Ok(Command::Retreat),
      "l" | "live" | "esc" => Ok(Command::Unfreeze),
      "1" | "pupil" => Ok(Command::SetLevel(Level::Pupil)),
      "2" | "student" => Ok(Command::SetLevel(Level::Student)),
      "q" | "quit" | "exit" => Ok(Command::Quit),
      other => Err(ParseCommandError(other.to_string())),
    }
  }
}

#[derive(Debug)]
pub enum Event {
  Tick(Result<Tick, CaptureError>),
  Command(Command),
}

pub type EventSender = Sender<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
  pub ticks: usize,
  pub skipped_ticks: usize,
  pub failed_ticks: usize,
  pub timeouts: usize,
  pub renders: usize,
  pub render_errors: usize,
}

/// 为一个快照生成指定步骤的画面；`step` 为 `None` 时是实时画面。
/// 快照不可变，可以在任意线程上调用。
pub fn build_view(
  transformer: &StepTransformer,
  snapshot: Arc<FrameSnapshot>,
  level: Level,
  step: Option<usize>,
) -> Result<View, StepError> {
  let image = match step {
    Some(step) => transformer.apply(snapshot.frame(), step, level)?,
    None => snapshot.frame().clone(),
  };
  Ok(View {
    image,
    level,
    step,
    descriptor: step.and_then(|s| level.descriptor(s)),
    snapshot,
  })
}

/// 采集线程句柄
pub struct CaptureHandle {
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
}

impl CaptureHandle {
  /// 请求停止；正在阻塞的采集完成后线程退出
  pub fn stop(&self) {
    self.stop.store(true, Ordering::Relaxed);
  }

  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().is_none_or(|h| h.is_finished())
  }

  pub fn join(mut self) {
    self.stop();
    if let Some(handle) = self.handle.take()
      && handle.join().is_err()
    {
      error!("采集线程异常退出");
    }
  }
}

pub struct Session<R> {
  analyzer: Analyzer,
  controller: AnalysisController,
  transformer: StepTransformer,
  sink: R,
  sender: EventSender,
  events: Receiver<Event>,
  pending_ticks: Arc<AtomicUsize>,
  tick_budget: Duration,
  stats: SessionStats,
}

impl<R> Session<R>
where
  R: Render,
  R::Error: Display,
{
  pub fn new(analyzer: Analyzer, level: Level, sink: R) -> Self {
    let (sender, events) = mpsc::channel();
    Self {
      analyzer,
      controller: AnalysisController::new(level),
      transformer: StepTransformer::new(),
      sink,
      sender,
      events,
      pending_ticks: Arc::new(AtomicUsize::new(0)),
      tick_budget: DEFAULT_TICK_BUDGET,
      stats: SessionStats::default(),
    }
  }

  pub fn tick_budget(mut self, budget: Duration) -> Self {
    self.tick_budget = budget;
    self
  }

  pub fn sender(&self) -> EventSender {
    self.sender.clone()
  }

  pub fn controller(&self) -> &AnalysisController {
    &self.controller
  }

  pub fn sink(&self) -> &R {
    &self.sink
  }

  pub fn stats(&self) -> &SessionStats {
    &self.stats
  }

  /// 在独立线程中驱动帧来源，结果送入事件通道
  pub fn spawn_capture<S>(&self, mut source: S) -> CaptureHandle
  where
    S: FrameSource + Send + 'static,
  {
    let sender = self.sender.clone();
    let pending = Arc::clone(&self.pending_ticks);
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = thread::spawn(move || {
      while !flag.load(Ordering::Relaxed) {
        let result = source.next_tick();
        let finished = matches!(result, Err(CaptureError::Disconnected));
        if !finished && pending.load(Ordering::Acquire) >= MAX_PENDING_TICKS {
          debug!("积压帧过多, 丢弃一帧");
          continue;
        }
        pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(Event::Tick(result)).is_err() {
          break;
        }
        if finished {
          break;
        }
      }
      debug!("采集线程退出");
    });
    CaptureHandle {
      stop,
      handle: Some(handle),
    }
  }

  /// Ctrl-C 转为 `Command::Quit`
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let sender = self.sender.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = sender.send(Event::Command(Command::Quit));
    })
  }

  /// 等待并处理一个事件；超时返回 `None`
  pub fn pump(&mut self) -> Option<Flow> {
    match self.events.recv_timeout(self.tick_budget) {
      Ok(event) => {
        if matches!(event, Event::Tick(_)) {
          let _ = self
            .pending_ticks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        Some(self.handle(event))
      }
      Err(RecvTimeoutError::Timeout) => {
        self.stats.timeouts += 1;
        if self.controller.is_live() {
          warn!("{}, 继续显示上一帧", CaptureError::Timeout);
        }
        None
      }
      Err(RecvTimeoutError::Disconnected) => {
        info!("事件通道已关闭");
        Some(Flow::Quit)
      }
    }
  }

  /// 运行到收到退出命令或所有发送端都关闭为止。
  /// 会话自己持有的发送端在此放弃，之后 [`Session::sender`] 返回的发送端不再可用。
  pub fn run(&mut self) -> SessionStats {
    drop(std::mem::replace(&mut self.sender, mpsc::channel().0));
    info!("会话开始, 级别: {}", self.controller.level());
    while self.pump() != Some(Flow::Quit) {}
    info!(
      "会话结束: {} 帧, {} 次超时, {} 次渲染",
      self.stats.ticks, self.stats.timeouts, self.stats.renders
    );
    self.stats.clone()
  }

  pub fn handle(&mut self, event: Event) -> Flow {
    match event {
      Event::Tick(Ok(tick)) => {
        if !self.controller.is_live() {
          self.stats.skipped_ticks += 1;
          return Flow::Continue;
        }
        self.stats.ticks += 1;
        let snapshot = self.analyzer.analyze(tick.frame, &tick.raw);
        self.controller.observe(Arc::new(snapshot));
        self.present();
      }
      Event::Tick(Err(CaptureError::Disconnected)) => {
        info!("帧来源已结束");
      }
      Event::Tick(Err(e)) => {
        self.stats.failed_ticks += 1;
        warn!("采集失败: {}", e);
      }
      Event::Command(command) => return self.apply(command),
    }
    Flow::Continue
  }

  fn apply(&mut self, command: Command) -> Flow {
    debug!("命令: {:?}", command);
    let before = (self.controller.mode(), self.controller.level());
    match command {
      Command::Freeze => {
        if let Err(e) = self.controller.freeze() {
          warn!("{}", e);
        }
      }
      Command::Advance => self.controller.advance(),
      Command::Retreat => self.controller.retreat(),
      Command::Unfreeze => self.controller.unfreeze(),
      Command::SetLevel(level) => self.controller.set_level(level),
      Command::Quit => return Flow::Quit,
    }
    if before != (self.controller.mode(), self.controller.level()) {
      self.present();
    }
    Flow::Continue
  }

  /// 当前应显示的画面
  pub fn current_view(&self) -> Result<Option<View>, StepError> {
    let Some(snapshot) = self.controller.displayed() else {
      return Ok(None);
    };
    build_view(
      &self.transformer,
      Arc::clone(snapshot),
      self.controller.level(),
      self.controller.step(),
    )
    .map(Some)
  }

  fn present(&mut self) {
    let view = match self.current_view() {
      Ok(Some(view)) => view,
      Ok(None) => return,
      Err(e) => {
        error!("无法生成画面: {}", e);
        return;
      }
    };
    match self.sink.render_view(&view) {
      Ok(()) => self.stats.renders += 1,
      Err(e) => {
        self.stats.render_errors += 1;
        error!("渲染失败: {}", e);
      }
    }
  }
}
