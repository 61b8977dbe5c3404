// 该文件是 Tanjing （探镜） 项目的一部分。
// src/controller.rs - 实时/分析模式状态机
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::{snapshot::FrameSnapshot, steps::Level};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
  #[error("尚无实时帧，无法冻结")]
  NoLiveFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Live,
  /// 步骤从 1 开始
  Analyse { step: usize },
}

/// 管理 LIVE / ANALYSE(step) 状态以及冻结快照。
///
/// 所有状态变更都经过 `&mut self`，由唯一的持有者（见 [`crate::session::Session`]）
/// 顺序执行。
#[derive(Debug)]
pub struct AnalysisController {
  mode: Mode,
  level: Level,
  latest: Option<Arc<FrameSnapshot>>,
  frozen: Option<Arc<FrameSnapshot>>,
}

impl AnalysisController {
  pub fn new(level: Level) -> Self {
    Self {
      mode: Mode::Live,
      level,
      latest: None,
      frozen: None,
    }
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  /// 实时模式下为 `None`
  pub fn step(&self) -> Option<usize> {
    match self.mode {
      Mode::Live => None,
      Mode::Analyse { step } => Some(step),
    }
  }

  pub fn level(&self) -> Level {
    self.level
  }

  pub fn step_count(&self) -> usize {
    self.level.step_count()
  }

  pub fn is_live(&self) -> bool {
    self.mode == Mode::Live
  }

  /// 记录最新的实时快照；分析模式下忽略
  pub fn observe(&mut self, snapshot: Arc<FrameSnapshot>) {
    if self.is_live() {
      self.latest = Some(snapshot);
    }
  }

  pub fn frozen(&self) -> Option<&Arc<FrameSnapshot>> {
    self.frozen.as_ref()
  }

  /// 当前应展示的快照：分析模式为冻结快照，实时模式为最新帧
  pub fn displayed(&self) -> Option<&Arc<FrameSnapshot>> {
    match self.mode {
      Mode::Live => self.latest.as_ref(),
      Mode::Analyse { .. } => self.frozen.as_ref(),
    }
  }

  /// LIVE → ANALYSE(1)，冻结最新实时快照并丢弃之前的冻结快照。
  /// 该快照被取走，解冻后要等下一帧到达才能再次冻结。
  /// 已在分析模式时不做任何事。
  pub fn freeze(&mut self) -> Result<(), ControllerError> {
    if !self.is_live() {
      return Ok(());
    }
    let snapshot = self.latest.take().ok_or(ControllerError::NoLiveFrame)?;
    info!(
      "冻结画面: {} 个检测结果, 进入分析模式 ({} 共 {} 步)",
      snapshot.detections().len(),
      self.level,
      self.step_count()
    );
    self.frozen = Some(snapshot);
    self.mode = Mode::Analyse { step: 1 };
    Ok(())
  }

  /// 前进一步，已在最后一步时不变
  pub fn advance(&mut self) {
    if let Mode::Analyse { step } = self.mode
      && step < self.step_count()
    {
      self.mode = Mode::Analyse { step: step + 1 };
      debug!("前进到第 {} 步", step + 1);
    }
  }

  /// 后退一步，已在第一步时不变
  pub fn retreat(&mut self) {
    if let Mode::Analyse { step } = self.mode
      && step > 1
    {
      self.mode = Mode::Analyse { step: step - 1 };
      debug!("后退到第 {} 步", step - 1);
    }
  }

  /// 回到实时模式并丢弃冻结快照
  pub fn unfreeze(&mut self) {
    if self.frozen.take().is_some() {
      info!("解除冻结, 返回实时模式");
    }
    self.mode = Mode::Live;
  }

  /// 切换学习级别；分析中的步骤被限制到新级别的范围内
  pub fn set_level(&mut self, level: Level) {
    self.level = level;
    if let Mode::Analyse { step } = self.mode {
      self.mode = Mode::Analyse {
        step: step.clamp(1, level.step_count()),
      };
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::RgbFrame, snapshot::DecodeReport};

  fn snapshot() -> Arc<FrameSnapshot> {
    Arc::new(FrameSnapshot::bare(
      RgbFrame::with_shape(4, 4),
      DecodeReport::default(),
    ))
  }

  #[test]
  fn starts_live() {
    let c = AnalysisController::new(Level::Pupil);
    assert_eq!(c.mode(), Mode::Live);
    assert_eq!(c.step(), None);
    assert!(c.displayed().is_none());
  }

  #[test]
  fn freeze_without_frame_fails() {
    let mut c = AnalysisController::new(Level::Pupil);
    assert_eq!(c.freeze(), Err(ControllerError::NoLiveFrame));
    assert_eq!(c.mode(), Mode::Live);
  }

  #[test]
  fn advance_stops_at_last_step() {
    let mut c = AnalysisController::new(Level::Pupil);
    c.observe(snapshot());
    c.freeze().unwrap();
    assert_eq!(c.step(), Some(1));
    for _ in 0..3 {
      c.advance();
    }
    assert_eq!(c.step(), Some(4));
    c.advance();
    assert_eq!(c.step(), Some(4));
  }

  #[test]
  fn retreat_stops_at_first_step() {
    let mut c = AnalysisController::new(Level::Student);
    c.observe(snapshot());
    c.freeze().unwrap();
    c.retreat();
    assert_eq!(c.mode(), Mode::Analyse { step: 1 });
    c.advance();
    c.retreat();
    assert_eq!(c.step(), Some(1));
  }

  #[test]
  fn frozen_snapshot_ignores_new_frames() {
    let mut c = AnalysisController::new(Level::Pupil);
    let first = snapshot();
    c.observe(Arc::clone(&first));
    c.freeze().unwrap();
    c.observe(snapshot());
    assert!(Arc::ptr_eq(c.displayed().unwrap(), &first));
    // 重复冻结不替换快照
    c.freeze().unwrap();
    assert!(Arc::ptr_eq(c.frozen().unwrap(), &first));
  }

  #[test]
  fn unfreeze_discards_snapshot() {
    let mut c = AnalysisController::new(Level::Pupil);
    c.observe(snapshot());
    c.freeze().unwrap();
    c.advance();
    c.unfreeze();
    assert_eq!(c.mode(), Mode::Live);
    assert!(c.frozen().is_none());
    // 实时模式下前进/后退无效
    c.advance();
    c.retreat();
    assert_eq!(c.mode(), Mode::Live);
  }

  #[test]
  fn refreeze_starts_at_step_one_with_new_snapshot() {
    let mut c = AnalysisController::new(Level::Pupil);
    c.observe(snapshot());
    c.freeze().unwrap();
    c.advance();
    c.unfreeze();
    let second = snapshot();
    c.observe(Arc::clone(&second));
    c.freeze().unwrap();
    assert_eq!(c.step(), Some(1));
    assert!(Arc::ptr_eq(c.frozen().unwrap(), &second));
  }

  #[test]
  fn refreeze_without_new_frame_fails() {
    let mut c = AnalysisController::new(Level::Pupil);
    c.observe(snapshot());
    c.freeze().unwrap();
    c.unfreeze();
    assert!(c.displayed().is_none());
    assert_eq!(c.freeze(), Err(ControllerError::NoLiveFrame));
    assert_eq!(c.mode(), Mode::Live);
  }

  #[test]
  fn level_switch_clamps_step() {
    let mut c = AnalysisController::new(Level::Student);
    c.observe(snapshot());
    c.freeze().unwrap();
    for _ in 0..7 {
      c.advance();
    }
    assert_eq!(c.step(), Some(8));
    c.set_level(Level::Pupil);
    assert_eq!(c.step(), Some(4));
  }
}
