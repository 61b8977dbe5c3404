// 该文件是 Tanjing （探镜） 项目的一部分。
// src/snapshot.rs - 冻结帧快照
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

use chrono::{DateTime, Utc};

use crate::{decoder::DecodeError, frame::RgbFrame, model::Detection};

/// 一帧解码过程的统计信息，供讲解界面展示
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
  /// 各输出张量的元素个数
  pub output_shapes: Vec<usize>,
  /// 通过候选下限的原始候选数
  pub raw_candidates: usize,
  /// 通过置信度阈值的候选数（抑制前）
  pub above_threshold: usize,
  /// 抑制后保留的检测数
  pub kept: usize,
  pub error: Option<DecodeError>,
}

/// 一帧图像及其检测结果。创建后不可变，通过 `Arc` 共享。
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
  frame: Arc<RgbFrame>,
  detections: Vec<Detection>,
  top_detections: Vec<Detection>,
  proposals: Vec<Detection>,
  captured_at: DateTime<Utc>,
  report: DecodeReport,
}

fn sort_by_confidence(dets: &mut [Detection]) {
  // 稳定排序，相同置信度保持原顺序
  dets.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
}

impl FrameSnapshot {
  /// `detections` 与 `proposals` 会被按置信度降序（稳定）排序，
  /// `top_detections` 取 `detections` 的前 `top_cap` 个。
  pub fn new(
    frame: RgbFrame,
    mut detections: Vec<Detection>,
    mut proposals: Vec<Detection>,
    top_cap: usize,
    report: DecodeReport,
  ) -> Self {
    sort_by_confidence(&mut detections);
    sort_by_confidence(&mut proposals);
    let top_detections = detections.iter().take(top_cap).cloned().collect();

    Self {
      frame: Arc::new(frame),
      detections,
      top_detections,
      proposals,
      captured_at: Utc::now(),
      report,
    }
  }

  /// 没有检测结果的快照（如解码失败时）
  pub fn bare(frame: RgbFrame, report: DecodeReport) -> Self {
    Self::new(frame, Vec::new(), Vec::new(), 0, report)
  }

  pub fn frame(&self) -> &RgbFrame {
    &self.frame
  }

  pub fn shared_frame(&self) -> Arc<RgbFrame> {
    Arc::clone(&self.frame)
  }

  /// `(width, height)`
  pub fn source_size(&self) -> (u32, u32) {
    self.frame.size()
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  pub fn top_detections(&self) -> &[Detection] {
    &self.top_detections
  }

  /// 阈值与抑制之前的原始候选（按置信度取前若干个）
  pub fn proposals(&self) -> &[Detection] {
    &self.proposals
  }

  pub fn captured_at(&self) -> DateTime<Utc> {
    self.captured_at
  }

  pub fn report(&self) -> &DecodeReport {
    &self.report
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BBox;

  fn det(confidence: f32, tag: f32) -> Detection {
    Detection::new("x", 0, confidence, BBox::new(tag, 0.0, 1.0, 1.0))
  }

  #[test]
  fn top_detections_is_sorted_prefix() {
    let snap = FrameSnapshot::new(
      RgbFrame::with_shape(4, 4),
      vec![det(0.2, 0.0), det(0.9, 1.0), det(0.5, 2.0), det(0.7, 3.0)],
      Vec::new(),
      3,
      DecodeReport::default(),
    );
    let confs: Vec<f32> = snap.detections().iter().map(Detection::confidence).collect();
    assert_eq!(confs, vec![0.9, 0.7, 0.5, 0.2]);
    assert_eq!(snap.top_detections(), &snap.detections()[..3]);
    assert_eq!(snap.source_size(), (4, 4));
  }

  #[test]
  fn top_cap_larger_than_set() {
    let snap = FrameSnapshot::new(
      RgbFrame::with_shape(2, 2),
      vec![det(0.4, 0.0)],
      Vec::new(),
      3,
      DecodeReport::default(),
    );
    assert_eq!(snap.top_detections().len(), 1);
  }

  #[test]
  fn equal_confidence_keeps_order() {
    let snap = FrameSnapshot::new(
      RgbFrame::with_shape(2, 2),
      vec![det(0.5, 0.0), det(0.5, 1.0)],
      Vec::new(),
      1,
      DecodeReport::default(),
    );
    assert_eq!(snap.top_detections()[0].bbox().x, 0.0);
  }
}
