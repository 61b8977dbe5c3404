// 该文件是 Tanjing （探镜） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use std::{cmp::Ordering, collections::BTreeMap};

use tracing::debug;

use crate::{geometry::iou, model::Detection};

/// 置信度降序，相同时保持解码顺序
fn by_rank(a: &(usize, Detection), b: &(usize, Detection)) -> Ordering {
  b.1
    .confidence()
    .total_cmp(&a.1.confidence())
    .then(a.0.cmp(&b.0))
}

/// 按类别独立执行贪心 NMS，合并后按置信度全局排序并截断到 `max_detections`。
///
/// 与已保留框的 IoU **严格大于** `iou_threshold` 的候选被抑制，
/// IoU 恰好等于阈值的候选保留。置信度相同的候选按输入顺序处理。
pub fn suppress(
  candidates: Vec<Detection>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<Detection> {
  let total = candidates.len();

  let mut by_class: BTreeMap<u32, Vec<(usize, Detection)>> = BTreeMap::new();
  for (index, det) in candidates.into_iter().enumerate() {
    by_class.entry(det.class_id()).or_default().push((index, det));
  }

  let mut kept: Vec<(usize, Detection)> = Vec::with_capacity(total);
  for (class_id, mut group) in by_class {
    group.sort_by(by_rank);
    let before = group.len();

    let mut survivors: Vec<(usize, Detection)> = Vec::with_capacity(group.len());
    for candidate in group {
      let overlapped = survivors
        .iter()
        .any(|(_, best)| iou(best.bbox(), candidate.1.bbox()) > iou_threshold);
      if !overlapped {
        survivors.push(candidate);
      }
    }

    debug!(
      "类别 {}: {} 个候选, 保留 {} 个",
      class_id,
      before,
      survivors.len()
    );
    kept.extend(survivors);
  }

  kept.sort_by(by_rank);
  kept.truncate(max_detections);
  kept.into_iter().map(|(_, det)| det).collect()
}
