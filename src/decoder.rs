// 该文件是 Tanjing （探镜） 项目的一部分。
// src/decoder.rs - 加速器原始输出解码
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

//! 把加速器输出的原始张量解码为源图像像素坐标下的候选检测。
//!
//! 张量布局由 [`DecodeParams`] 描述，解码器本身不对具体模型做假设：
//!
//! - [`BoxEncoding::Corners`]：三个张量，框 `[N, 4]`（角点）、分数 `[N]`、类别 `[N]`；
//! - [`BoxEncoding::CenterSize`]：同上，但框为 `(cx, cy, w, h)`；
//! - [`BoxEncoding::Grid`]：每个检测头两个平面张量，回归 `[4, H*W]`
//!   （到网格中心的 左/上/右/下 距离）与类别 logit `[C, H*W]`。
//!
//! 候选按锚点遍历顺序输出，不做排序。

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  geometry::Corners,
  labels::Labels,
  model::{Detection, RawAccelOutput},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("缺少第 {0} 个输出张量")]
  TensorMissing(usize),
  #[error("{what} 张量大小不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    what: &'static str,
    expected: usize,
    actual: usize,
  },
  #[error("检测头 {head}: 输出大小不匹配 - 张量1: {first}, 张量2: {second}")]
  HeadMismatch {
    head: usize,
    first: usize,
    second: usize,
  },
  #[error("源图像尺寸无效: {0}x{1}")]
  InvalidSourceSize(u32, u32),
}

/// 框坐标的分量顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BboxOrder {
  /// `(y0, x0, y1, x1)`
  #[default]
  Yx,
  /// `(x0, y0, x1, y1)`
  Xy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHead {
  pub rows: usize,
  pub cols: usize,
  pub stride: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoxEncoding {
  Corners { order: BboxOrder, normalized: bool },
  CenterSize { normalized: bool },
  Grid { heads: Vec<GridHead>, num_classes: usize },
}

/// 某个模型输出的解码参数
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeParams {
  pub encoding: BoxEncoding,
  /// 模型输入分辨率 `(w, h)`，框坐标在此空间内
  pub input_size: (u32, u32),
  /// 为真时模型看到的是源图像中心、与输入同宽高比的裁剪区域
  pub preserve_aspect_ratio: bool,
}

impl Default for DecodeParams {
  fn default() -> Self {
    Self {
      encoding: BoxEncoding::Corners {
        order: BboxOrder::Yx,
        normalized: false,
      },
      input_size: (320, 320),
      preserve_aspect_ratio: false,
    }
  }
}

impl DecodeParams {
  /// YOLO 风格三检测头（步长 8/16/32）网格解码参数，每个头 `height/stride` 行 `width/stride` 列
  pub fn yolo_grid(width: u32, height: u32, num_classes: usize) -> Self {
    let heads = [8.0f32, 16.0, 32.0]
      .iter()
      .map(|&stride| GridHead {
        rows: (height as f32 / stride) as usize,
        cols: (width as f32 / stride) as usize,
        stride,
      })
      .collect();
    Self {
      encoding: BoxEncoding::Grid { heads, num_classes },
      input_size: (width, height),
      preserve_aspect_ratio: false,
    }
  }
}

/// 模型输入坐标到源图像坐标的仿射映射
#[derive(Debug, Clone, Copy, PartialEq)]
struct InputMapping {
  scale_x: f32,
  scale_y: f32,
  offset_x: f32,
  offset_y: f32,
}

impl InputMapping {
  fn new(params: &DecodeParams, source: (u32, u32)) -> Self {
    let (in_w, in_h) = (
      params.input_size.0.max(1) as f32,
      params.input_size.1.max(1) as f32,
    );
    let (src_w, src_h) = (source.0 as f32, source.1 as f32);

    if !params.preserve_aspect_ratio {
      return Self {
        scale_x: src_w / in_w,
        scale_y: src_h / in_h,
        offset_x: 0.0,
        offset_y: 0.0,
      };
    }

    // 源图像中心裁剪出与输入同宽高比的区域
    let crop_w = src_w.min(src_h * in_w / in_h);
    let crop_h = crop_w * in_h / in_w;
    let scale = crop_w / in_w;
    Self {
      scale_x: scale,
      scale_y: scale,
      offset_x: (src_w - crop_w) / 2.0,
      offset_y: (src_h - crop_h) / 2.0,
    }
  }

  fn map(&self, c: Corners) -> Corners {
    Corners {
      x1: self.offset_x + c.x1 * self.scale_x,
      y1: self.offset_y + c.y1 * self.scale_y,
      x2: self.offset_x + c.x2 * self.scale_x,
      y2: self.offset_y + c.y2 * self.scale_y,
    }
  }
}

pub struct Decoder {
  params: DecodeParams,
  labels: Labels,
}

impl Decoder {
  pub fn new(params: DecodeParams, labels: Labels) -> Self {
    Self { params, labels }
  }

  pub fn params(&self) -> &DecodeParams {
    &self.params
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 解码一帧输出。分数低于 `confidence_threshold` 的候选在几何计算前即被丢弃
  /// （分数等于阈值保留）。框被裁剪到源图像范围内，裁剪后面积为零的框被丢弃。
  pub fn decode(
    &self,
    raw: &RawAccelOutput,
    source_size: (u32, u32),
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, DecodeError> {
    if source_size.0 == 0 || source_size.1 == 0 {
      return Err(DecodeError::InvalidSourceSize(source_size.0, source_size.1));
    }

    let mapping = InputMapping::new(&self.params, source_size);
    let mut sink = CandidateSink {
      labels: &self.labels,
      mapping,
      source: (source_size.0 as f32, source_size.1 as f32),
      items: Vec::new(),
    };

    match &self.params.encoding {
      BoxEncoding::Corners { order, normalized } => {
        let boxes = self.flat_boxes(raw, confidence_threshold)?;
        for (i, score, class) in boxes {
          let b = &raw.tensors[0][i * 4..i * 4 + 4];
          let corners = match order {
            BboxOrder::Yx => Corners::new(b[1], b[0], b[3], b[2]),
            BboxOrder::Xy => Corners::new(b[0], b[1], b[2], b[3]),
          };
          let corners = self.denormalize(corners, *normalized);
          sink.push(corners, score, class);
        }
      }
      BoxEncoding::CenterSize { normalized } => {
        let boxes = self.flat_boxes(raw, confidence_threshold)?;
        for (i, score, class) in boxes {
          let b = &raw.tensors[0][i * 4..i * 4 + 4];
          let (cx, cy, w, h) = (b[0], b[1], b[2], b[3]);
          let corners = Corners::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0);
          let corners = self.denormalize(corners, *normalized);
          sink.push(corners, score, class);
        }
      }
      BoxEncoding::Grid { heads, num_classes } => {
        decode_grid(raw, heads, *num_classes, confidence_threshold, &mut sink)?;
      }
    }

    debug!("解码得到 {} 个候选", sink.items.len());
    Ok(sink.items)
  }

  /// 校验三张量布局，并返回通过阈值的 `(锚点索引, 分数, 类别)`
  fn flat_boxes(
    &self,
    raw: &RawAccelOutput,
    confidence_threshold: f32,
  ) -> Result<Vec<(usize, f32, f32)>, DecodeError> {
    let boxes = raw.tensor(0).ok_or(DecodeError::TensorMissing(0))?;
    let scores = raw.tensor(1).ok_or(DecodeError::TensorMissing(1))?;
    let classes = raw.tensor(2).ok_or(DecodeError::TensorMissing(2))?;

    let n = scores.len();
    if boxes.len() < n * 4 {
      return Err(DecodeError::ShapeMismatch {
        what: "框",
        expected: n * 4,
        actual: boxes.len(),
      });
    }
    if classes.len() < n {
      return Err(DecodeError::ShapeMismatch {
        what: "类别",
        expected: n,
        actual: classes.len(),
      });
    }

    Ok(
      scores
        .iter()
        .zip(classes)
        .enumerate()
        .filter(|(_, (score, _))| **score >= confidence_threshold)
        .map(|(i, (score, class))| (i, *score, *class))
        .collect(),
    )
  }

  fn denormalize(&self, c: Corners, normalized: bool) -> Corners {
    if !normalized {
      return c;
    }
    let (w, h) = (self.params.input_size.0 as f32, self.params.input_size.1 as f32);
    Corners::new(c.x1 * w, c.y1 * h, c.x2 * w, c.y2 * h)
  }
}

struct CandidateSink<'a> {
  labels: &'a Labels,
  mapping: InputMapping,
  source: (f32, f32),
  items: Vec<Detection>,
}

impl CandidateSink<'_> {
  /// `corners` 位于模型输入坐标系
  fn push(&mut self, corners: Corners, score: f32, class: f32) {
    if !(class >= 0.0) {
      debug!("丢弃类别无效的候选: {}", class);
      return;
    }
    let class_id = class as u32;

    let mapped = self
      .mapping
      .map(corners)
      .clamp_to(self.source.0, self.source.1);
    let bbox = mapped.to_xywh();
    if bbox.width <= 0.0 || bbox.height <= 0.0 {
      return;
    }

    self
      .items
      .push(Detection::new(self.labels.name(class_id), class_id, score, bbox));
  }
}

/// 根据张量大小匹配回归和分类输出，返回 `(reg, cls)`
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
  head_idx: usize,
) -> Result<(&'a [f32], &'a [f32]), DecodeError> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Ok((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    debug!("检测头 {}: 输出顺序交换", head_idx);
    Ok((tensor2, tensor1))
  } else {
    error!(
      "检测头 {}: 输出大小不匹配 - 张量1: {}, 张量2: {}, 期望回归: {}, 期望分类: {}",
      head_idx,
      tensor1.len(),
      tensor2.len(),
      reg_expected,
      cls_expected
    );
    Err(DecodeError::HeadMismatch {
      head: head_idx,
      first: tensor1.len(),
      second: tensor2.len(),
    })
  }
}

fn decode_grid(
  raw: &RawAccelOutput,
  heads: &[GridHead],
  num_classes: usize,
  confidence_threshold: f32,
  sink: &mut CandidateSink<'_>,
) -> Result<(), DecodeError> {
  for (head_idx, head) in heads.iter().enumerate() {
    let spatial = head.rows * head.cols;
    let reg_expected = 4 * spatial;
    let cls_expected = num_classes * spatial;

    let tensor1 = raw
      .tensor(head_idx * 2)
      .ok_or(DecodeError::TensorMissing(head_idx * 2))?;
    let tensor2 = raw
      .tensor(head_idx * 2 + 1)
      .ok_or(DecodeError::TensorMissing(head_idx * 2 + 1))?;
    let (reg, cls) =
      match_reg_cls_tensors(tensor1, tensor2, reg_expected, cls_expected, head_idx)?;

    for row in 0..head.rows {
      for col in 0..head.cols {
        let idx = row * head.cols + col;

        let (score, class_id) = {
          let mut max_logit = f32::MIN;
          let mut cls_idx = 0usize;
          for c in 0..num_classes {
            let logit = cls[c * spatial + idx];
            if logit > max_logit {
              max_logit = logit;
              cls_idx = c;
            }
          }
          (sigmoid(max_logit), cls_idx)
        };

        if !(score >= confidence_threshold) {
          continue;
        }

        let left = reg[idx];
        let top = reg[spatial + idx];
        let right = reg[2 * spatial + idx];
        let bottom = reg[3 * spatial + idx];

        let grid_x = col as f32 + 0.5;
        let grid_y = row as f32 + 0.5;

        let corners = Corners::new(
          (grid_x - left) * head.stride,
          (grid_y - top) * head.stride,
          (grid_x + right) * head.stride,
          (grid_y + bottom) * head.stride,
        );
        sink.push(corners, score, class_id as f32);
      }
    }
  }
  Ok(())
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn corners_decoder(order: BboxOrder, normalized: bool) -> Decoder {
    Decoder::new(
      DecodeParams {
        encoding: BoxEncoding::Corners { order, normalized },
        input_size: (100, 100),
        preserve_aspect_ratio: false,
      },
      Labels::coco(),
    )
  }

  #[test]
  fn low_score_is_discarded() {
    let decoder = corners_decoder(BboxOrder::Xy, false);
    let raw = RawAccelOutput::new(vec![
      vec![10.0, 10.0, 50.0, 50.0, 20.0, 20.0, 60.0, 60.0],
      vec![0.3, 0.8],
      vec![0.0, 2.0],
    ]);
    let dets = decoder.decode(&raw, (100, 100), 0.55).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].label(), "car");
    assert_eq!(dets[0].confidence(), 0.8);
  }

  #[test]
  fn score_equal_to_threshold_is_kept() {
    let decoder = corners_decoder(BboxOrder::Xy, false);
    let raw = RawAccelOutput::new(vec![vec![0.0, 0.0, 10.0, 10.0], vec![0.5], vec![1.0]]);
    assert_eq!(decoder.decode(&raw, (100, 100), 0.5).unwrap().len(), 1);
  }

  #[test]
  fn yx_normalized_boxes_scale_to_source() {
    let decoder = corners_decoder(BboxOrder::Yx, true);
    // (y0, x0, y1, x1)
    let raw = RawAccelOutput::new(vec![vec![0.1, 0.2, 0.5, 0.6], vec![0.9], vec![0.0]]);
    let dets = decoder.decode(&raw, (200, 100), 0.5).unwrap();
    let b = dets[0].bbox();
    assert!((b.x - 40.0).abs() < 1e-4);
    assert!((b.y - 10.0).abs() < 1e-4);
    assert!((b.width - 80.0).abs() < 1e-4);
    assert!((b.height - 40.0).abs() < 1e-4);
  }

  #[test]
  fn out_of_range_regression_is_clamped() {
    let decoder = corners_decoder(BboxOrder::Xy, false);
    let raw = RawAccelOutput::new(vec![vec![-30.0, -5.0, 250.0, 80.0], vec![0.9], vec![0.0]]);
    let dets = decoder.decode(&raw, (100, 100), 0.5).unwrap();
    let b = dets[0].bbox();
    assert_eq!((b.x, b.y), (0.0, 0.0));
    assert_eq!((b.width, b.height), (100.0, 80.0));
  }

  #[test]
  fn fully_outside_box_is_dropped() {
    let decoder = corners_decoder(BboxOrder::Xy, false);
    let raw = RawAccelOutput::new(vec![vec![150.0, 150.0, 180.0, 180.0], vec![0.9], vec![0.0]]);
    assert!(decoder.decode(&raw, (100, 100), 0.5).unwrap().is_empty());
  }

  #[test]
  fn undersized_output_is_an_error() {
    let decoder = corners_decoder(BboxOrder::Xy, false);
    let raw = RawAccelOutput::new(vec![vec![0.0, 0.0, 1.0], vec![0.9], vec![0.0]]);
    assert!(matches!(
      decoder.decode(&raw, (100, 100), 0.5),
      Err(DecodeError::ShapeMismatch { .. })
    ));
    assert_eq!(
      decoder.decode(&RawAccelOutput::empty(), (100, 100), 0.5),
      Err(DecodeError::TensorMissing(0))
    );
  }

  #[test]
  fn center_size_encoding() {
    let decoder = Decoder::new(
      DecodeParams {
        encoding: BoxEncoding::CenterSize { normalized: false },
        input_size: (100, 100),
        preserve_aspect_ratio: false,
      },
      Labels::coco(),
    );
    let raw = RawAccelOutput::new(vec![vec![50.0, 50.0, 20.0, 10.0], vec![0.7], vec![0.0]]);
    let b = *decoder.decode(&raw, (100, 100), 0.5).unwrap()[0].bbox();
    assert_eq!((b.x, b.y, b.width, b.height), (40.0, 45.0, 20.0, 10.0));
  }

  #[test]
  fn preserve_aspect_ratio_maps_through_center_crop() {
    let decoder = Decoder::new(
      DecodeParams {
        encoding: BoxEncoding::Corners {
          order: BboxOrder::Xy,
          normalized: false,
        },
        input_size: (100, 100),
        preserve_aspect_ratio: true,
      },
      Labels::coco(),
    );
    // 200x100 源图像的中心 100x100 区域
    let raw = RawAccelOutput::new(vec![vec![0.0, 0.0, 100.0, 100.0], vec![0.9], vec![0.0]]);
    let b = *decoder.decode(&raw, (200, 100), 0.5).unwrap()[0].bbox();
    assert_eq!((b.x, b.y, b.width, b.height), (50.0, 0.0, 100.0, 100.0));
  }

  #[test]
  fn grid_heads_decode_in_traversal_order() {
    let head = GridHead {
      rows: 2,
      cols: 2,
      stride: 10.0,
    };
    let decoder = Decoder::new(
      DecodeParams {
        encoding: BoxEncoding::Grid {
          heads: vec![head],
          num_classes: 2,
        },
        input_size: (20, 20),
        preserve_aspect_ratio: false,
      },
      Labels::coco(),
    );
    // 回归：每个位置 左/上/右/下 都是 0.5 个网格
    let reg = vec![0.5f32; 16];
    // 类别 logit，平面布局 [C, 4]
    let mut cls = vec![-10.0f32; 8];
    cls[0] = 4.0; // 位置 0，类别 0
    cls[4 + 3] = 3.0; // 位置 3，类别 1
    // 回归/分类顺序交换也能识别
    let raw = RawAccelOutput::new(vec![cls, reg]);
    let dets = decoder.decode(&raw, (40, 40), 0.5).unwrap();
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class_id(), 0);
    assert_eq!(dets[1].class_id(), 1);
    assert_eq!(*dets[0].bbox(), crate::geometry::BBox::new(0.0, 0.0, 20.0, 20.0));
    assert_eq!(*dets[1].bbox(), crate::geometry::BBox::new(20.0, 20.0, 20.0, 20.0));
  }

  #[test]
  fn grid_head_size_mismatch_is_an_error() {
    let decoder = Decoder::new(DecodeParams::yolo_grid(64, 64, 80), Labels::coco());
    let raw = RawAccelOutput::new(vec![vec![0.0; 7], vec![0.0; 9]]);
    assert!(matches!(
      decoder.decode(&raw, (64, 64), 0.5),
      Err(DecodeError::HeadMismatch { head: 0, .. })
    ));
  }

  #[test]
  fn non_square_grid_heads_follow_input_height() {
    let params = DecodeParams::yolo_grid(64, 32, 2);
    let BoxEncoding::Grid { heads, .. } = &params.encoding else {
      panic!("应为网格编码");
    };
    let shapes: Vec<(usize, usize)> = heads.iter().map(|h| (h.rows, h.cols)).collect();
    assert_eq!(shapes, vec![(4, 8), (2, 4), (1, 2)]);

    let decoder = Decoder::new(params, Labels::coco());
    let mut tensors = Vec::new();
    for (rows, cols) in shapes {
      let spatial = rows * cols;
      tensors.push(vec![0.5f32; 4 * spatial]);
      let mut cls = vec![-10.0f32; 2 * spatial];
      if spatial == 32 {
        // 第一个头最后一个位置（第 3 行第 7 列），类别 1
        cls[spatial + 31] = 4.0;
      }
      tensors.push(cls);
    }
    let dets = decoder
      .decode(&RawAccelOutput::new(tensors), (64, 32), 0.5)
      .unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id(), 1);
    assert_eq!(
      *dets[0].bbox(),
      crate::geometry::BBox::new(56.0, 24.0, 8.0, 8.0)
    );
  }
}
