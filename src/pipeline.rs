// 该文件是 Tanjing （探镜） 项目的一部分。
// src/pipeline.rs - 单帧分析流水线
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

use tracing::{debug, warn};

use crate::{
  decoder::Decoder,
  frame::RgbFrame,
  model::{Detection, RawAccelOutput},
  nms::suppress,
  snapshot::{DecodeReport, FrameSnapshot},
};

/// 展示给“候选框”步骤的原始候选数
pub const RAW_TOPK: usize = 20;
/// 候选框展示的默认分数下限，低于它的锚点在解码时即被丢弃
pub const PROPOSAL_FLOOR: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  /// `top_detections` 的上限
  pub top_cap: usize,
  /// 原始候选的分数下限，仅影响讲解用的候选框展示
  pub proposal_floor: f32,
  pub raw_topk: usize,
}

impl Default for AnalysisConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.55,
      iou_threshold: 0.65,
      max_detections: 10,
      top_cap: 3,
      proposal_floor: PROPOSAL_FLOOR,
      raw_topk: RAW_TOPK,
    }
  }
}

/// 把一帧 `(图像, 原始输出)` 变为快照：解码 → 阈值 → NMS。
/// 解码失败时降级为“本帧无检测”，从不向上传播错误。
pub struct Analyzer {
  decoder: Decoder,
  config: AnalysisConfig,
}

impl Analyzer {
  pub fn new(decoder: Decoder, config: AnalysisConfig) -> Self {
    Self { decoder, config }
  }

  pub fn config(&self) -> &AnalysisConfig {
    &self.config
  }

  pub fn analyze(&self, frame: RgbFrame, raw: &RawAccelOutput) -> FrameSnapshot {
    let source_size = frame.size();
    let mut report = DecodeReport {
      output_shapes: raw.shapes(),
      ..Default::default()
    };

    // 不展示候选框时只解码过阈值的锚点
    let floor = if self.config.raw_topk == 0 {
      self.config.confidence_threshold
    } else {
      self
        .config
        .proposal_floor
        .min(self.config.confidence_threshold)
    };
    let candidates = match self.decoder.decode(raw, source_size, floor) {
      Ok(candidates) => candidates,
      Err(e) => {
        warn!("解码失败，本帧不显示检测结果: {}", e);
        report.error = Some(e);
        return FrameSnapshot::bare(frame, report);
      }
    };
    report.raw_candidates = candidates.len();

    let mut proposals = candidates.clone();
    proposals.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
    proposals.truncate(self.config.raw_topk);

    let above: Vec<Detection> = candidates
      .into_iter()
      .filter(|d| d.confidence() >= self.config.confidence_threshold)
      .collect();
    report.above_threshold = above.len();

    let detections = suppress(
      above,
      self.config.iou_threshold,
      self.config.max_detections,
    );
    report.kept = detections.len();

    debug!(
      "候选 {} 个, 过阈值 {} 个, 保留 {} 个",
      report.raw_candidates, report.above_threshold, report.kept
    );

    FrameSnapshot::new(
      frame,
      detections,
      proposals,
      self.config.top_cap,
      report,
    )
  }
}
