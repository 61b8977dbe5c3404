// 该文件是 Tanjing （探镜） 项目的一部分。
// src/transform.rs - 讲解步骤的图像变换
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

//! 每个讲解步骤把冻结帧变换为要展示的图像。
//!
//! 所有变换都是 `(帧, 步骤, 级别)` 的纯函数：同样的输入总是得到逐字节相同的输出，
//! 因此同一快照在步骤间来回切换不会出现画面漂移。

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::gradients::sobel_gradients;
use rand::{Rng, SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::debug;

use crate::{frame::RgbFrame, steps::Level};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
  #[error("步骤 {step} 超出范围: {level} 级别共有 {count} 步")]
  InvalidStepIndex {
    step: usize,
    level: Level,
    count: usize,
  },
}

/// 边缘处亮度衰减，模拟传感器暗角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vignette {
  /// 四角处的亮度衰减比例，`0.0..=1.0`
  pub strength: f32,
}

impl Vignette {
  /// 像素 `(x, y)` 处的亮度系数；中心为 1，四角为 `1 - strength`
  fn factor(&self, x: u32, y: u32, width: u32, height: u32) -> f32 {
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_d2 = cx * cx + cy * cy;
    if max_d2 <= 0.0 {
      return 1.0;
    }
    let (dx, dy) = (x as f32 - cx, y as f32 - cy);
    let r2 = (dx * dx + dy * dy) / max_d2;
    (1.0 - self.strength.clamp(0.0, 1.0) * r2).max(0.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformPolicy {
  /// 原样输出，界面在其上叠加网格或检测框
  PassThrough,
  /// 经 `size`×`size` 瓶颈最近邻缩放后放大回原尺寸
  Pixelate { size: u32 },
  /// 亮度（可带暗角）与固定阈值比较，输出黑白两级图像
  Binarize {
    threshold: u8,
    vignette: Option<Vignette>,
  },
  /// Sobel 梯度幅值，归一化到 0..255
  Edges {
    invert: bool,
    /// 各通道增益，None 时输出灰度
    tint: Option<[f32; 3]>,
  },
  /// 整体变暗
  Dim { factor: f32 },
  /// 暗化画面上叠加固定种子的“数据流”线条
  TensorReadout { seed: u64 },
}

impl TransformPolicy {
  pub fn apply(&self, frame: &RgbFrame) -> RgbFrame {
    if frame.width() == 0 || frame.height() == 0 {
      return frame.clone();
    }

    match *self {
      TransformPolicy::PassThrough => frame.clone(),
      TransformPolicy::Pixelate { size } => pixelate(frame, size),
      TransformPolicy::Binarize {
        threshold,
        vignette,
      } => binarize(frame, threshold, vignette),
      TransformPolicy::Edges { invert, tint } => edges(frame, invert, tint),
      TransformPolicy::Dim { factor } => dim(frame, factor),
      TransformPolicy::TensorReadout { seed } => tensor_readout(frame, seed),
    }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StepTransformer;

impl StepTransformer {
  pub fn new() -> Self {
    Self
  }

  /// 计算 `level` 级别第 `step` 步（从 1 开始）要展示的图像。
  /// 步骤越界是调用方错误，返回 [`StepError::InvalidStepIndex`]。
  pub fn apply(&self, frame: &RgbFrame, step: usize, level: Level) -> Result<RgbFrame, StepError> {
    let descriptor = level
      .descriptor(step)
      .ok_or(StepError::InvalidStepIndex {
        step,
        level,
        count: level.step_count(),
      })?;

    let now = std::time::Instant::now();
    let out = descriptor.policy.apply(frame);
    debug!(
      "步骤 {}/{} ({:?}) 变换完成，耗时: {:.2?}",
      step,
      level.step_count(),
      descriptor.kind,
      now.elapsed()
    );
    Ok(out)
  }
}

/// BT.601 亮度，截断为 u8
pub fn to_gray(frame: &RgbFrame) -> GrayImage {
  let (w, h) = frame.size();
  let data = frame.as_nhwc();
  GrayImage::from_fn(w, h, |x, y| {
    let idx = (y as usize * w as usize + x as usize) * 3;
    let r = data[idx] as f32;
    let g = data[idx + 1] as f32;
    let b = data[idx + 2] as f32;
    Luma([(0.299 * r + 0.587 * g + 0.114 * b) as u8])
  })
}

fn gray_to_frame(gray: &GrayImage) -> RgbFrame {
  let rgb = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
    let v = gray.get_pixel(x, y).0[0];
    image::Rgb([v, v, v])
  });
  RgbFrame::from(rgb)
}

fn pixelate(frame: &RgbFrame, size: u32) -> RgbFrame {
  if size == 0 {
    return frame.clone();
  }
  let (w, h) = frame.size();
  let image = frame.to_rgb_image();
  let small = imageops::resize(&image, size, size, imageops::FilterType::Nearest);
  let up = imageops::resize(&small, w, h, imageops::FilterType::Nearest);
  RgbFrame::from(up)
}

fn binarize(frame: &RgbFrame, threshold: u8, vignette: Option<Vignette>) -> RgbFrame {
  let (w, h) = frame.size();
  let mut gray = to_gray(frame);
  for (x, y, pixel) in gray.enumerate_pixels_mut() {
    let value = match vignette {
      Some(v) => pixel.0[0] as f32 * v.factor(x, y, w, h),
      None => pixel.0[0] as f32,
    };
    pixel.0[0] = if value >= threshold as f32 { 255 } else { 0 };
  }
  gray_to_frame(&gray)
}

fn edges(frame: &RgbFrame, invert: bool, tint: Option<[f32; 3]>) -> RgbFrame {
  let gray = to_gray(frame);
  let gradients = sobel_gradients(&gray);
  let max = gradients.pixels().map(|p| p.0[0]).max().unwrap_or(0) as u32;

  let (w, h) = frame.size();
  let out = RgbImage::from_fn(w, h, |x, y| {
    let magnitude = gradients.get_pixel(x, y).0[0] as u32;
    let mut v = if max > 0 {
      (magnitude * 255 / max) as u8
    } else {
      0
    };
    if invert {
      v = 255 - v;
    }
    match tint {
      Some([r, g, b]) => {
        let scale = |gain: f32| (v as f32 * gain).clamp(0.0, 255.0) as u8;
        image::Rgb([scale(r), scale(g), scale(b)])
      }
      None => image::Rgb([v, v, v]),
    }
  });
  RgbFrame::from(out)
}

fn dim(frame: &RgbFrame, factor: f32) -> RgbFrame {
  let (w, h) = frame.size();
  let data = frame
    .as_nhwc()
    .iter()
    .map(|&v| (v as f32 * factor).clamp(0.0, 255.0) as u8)
    .collect::<Vec<_>>();
  RgbFrame::new(w, h, data).unwrap_or_else(|_| frame.clone())
}

const READOUT_LINE: [u8; 3] = [220, 240, 210];
const READOUT_DOT: [u8; 3] = [227, 217, 191];

fn tensor_readout(frame: &RgbFrame, seed: u64) -> RgbFrame {
  let mut out = dim(frame, 0.12).to_rgb_image();
  let (w, h) = out.dimensions();
  let mut rng = StdRng::seed_from_u64(seed);

  let spacing = (h / 28).max(22) as usize;
  for y in (30..h).step_by(spacing) {
    let x0 = rng.gen_range(0..w.saturating_sub(200).max(1));
    let length = rng.gen_range(140..360);
    let x1 = (x0 + length).min(w - 1);
    for yy in y..(y + 2).min(h) {
      for x in x0..x1 {
        out.put_pixel(x, yy, image::Rgb(READOUT_LINE));
      }
    }
  }

  for _ in 0..30 {
    let y = rng.gen_range(0..h);
    let x = rng.gen_range(0..w);
    out.put_pixel(x, y, image::Rgb(READOUT_DOT));
  }

  RgbFrame::from(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 左半黑、右半白的测试帧
  fn split_frame(w: u32, h: u32) -> RgbFrame {
    let image = RgbImage::from_fn(w, h, |x, _| {
      if x < w / 2 {
        image::Rgb([0, 0, 0])
      } else {
        image::Rgb([255, 255, 255])
      }
    });
    RgbFrame::from(image)
  }

  fn gradient_frame(w: u32, h: u32) -> RgbFrame {
    let image = RgbImage::from_fn(w, h, |x, y| {
      image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    RgbFrame::from(image)
  }

  #[test]
  fn every_step_is_deterministic() {
    let frame = gradient_frame(64, 48);
    let t = StepTransformer::new();
    for level in [Level::Pupil, Level::Student] {
      for step in 1..=level.step_count() {
        let a = t.apply(&frame, step, level).unwrap();
        let b = t.apply(&frame, step, level).unwrap();
        assert_eq!(a.as_nhwc(), b.as_nhwc(), "{level} 第 {step} 步不确定");
        assert_eq!(a.size(), frame.size());
      }
    }
  }

  #[test]
  fn out_of_range_step_is_rejected() {
    let frame = gradient_frame(8, 8);
    let t = StepTransformer::new();
    assert_eq!(
      t.apply(&frame, 0, Level::Pupil),
      Err(StepError::InvalidStepIndex {
        step: 0,
        level: Level::Pupil,
        count: 4
      })
    );
    assert!(t.apply(&frame, 5, Level::Pupil).is_err());
    assert!(t.apply(&frame, 8, Level::Student).is_ok());
  }

  #[test]
  fn capture_and_localization_pass_through() {
    let frame = gradient_frame(16, 16);
    let t = StepTransformer::new();
    assert_eq!(t.apply(&frame, 1, Level::Pupil).unwrap(), frame);
    assert_eq!(t.apply(&frame, 4, Level::Pupil).unwrap(), frame);
  }

  #[test]
  fn binarize_is_two_level() {
    let frame = gradient_frame(32, 32);
    let out = TransformPolicy::Binarize {
      threshold: 100,
      vignette: Some(Vignette { strength: 0.5 }),
    }
    .apply(&frame);
    assert!(out.as_nhwc().iter().all(|&v| v == 0 || v == 255));
  }

  #[test]
  fn vignette_darkens_corners() {
    // 全 150 灰度：中心高于阈值，四角衰减后低于阈值
    let frame = RgbFrame::filled(21, 21, [150, 150, 150]);
    let out = TransformPolicy::Binarize {
      threshold: 128,
      vignette: Some(Vignette { strength: 0.5 }),
    }
    .apply(&frame);
    assert_eq!(out.pixel(10, 10), Some([255, 255, 255]));
    assert_eq!(out.pixel(0, 0), Some([0, 0, 0]));

    let plain = TransformPolicy::Binarize {
      threshold: 128,
      vignette: None,
    }
    .apply(&frame);
    assert_eq!(plain.pixel(0, 0), Some([255, 255, 255]));
  }

  #[test]
  fn edges_peak_on_boundary() {
    let frame = split_frame(16, 8);
    let out = TransformPolicy::Edges {
      invert: false,
      tint: None,
    }
    .apply(&frame);
    assert_eq!(out.pixel(8, 4), Some([255, 255, 255]));
    assert_eq!(out.pixel(2, 4), Some([0, 0, 0]));
    assert_eq!(out.pixel(13, 4), Some([0, 0, 0]));

    let inverted = TransformPolicy::Edges {
      invert: true,
      tint: None,
    }
    .apply(&frame);
    assert_eq!(inverted.pixel(2, 4), Some([255, 255, 255]));
  }

  #[test]
  fn flat_frame_has_no_edges() {
    let frame = RgbFrame::filled(8, 8, [90, 90, 90]);
    let out = TransformPolicy::Edges {
      invert: false,
      tint: Some([0.25, 0.85, 1.10]),
    }
    .apply(&frame);
    assert!(out.as_nhwc().iter().all(|&v| v == 0));
  }

  #[test]
  fn pixelate_reduces_distinct_columns() {
    let frame = gradient_frame(40, 10);
    let out = TransformPolicy::Pixelate { size: 4 }.apply(&frame);
    let row: Vec<[u8; 3]> = (0..40).map(|x| out.pixel(x, 0).unwrap()).collect();
    let mut distinct = row.clone();
    distinct.dedup();
    assert!(distinct.len() <= 4);
  }

  #[test]
  fn dim_scales_values() {
    let frame = RgbFrame::filled(2, 2, [200, 100, 10]);
    let out = TransformPolicy::Dim { factor: 0.5 }.apply(&frame);
    assert_eq!(out.pixel(1, 1), Some([100, 50, 5]));
  }

  #[test]
  fn tiny_frames_do_not_panic() {
    let t = StepTransformer::new();
    for (w, h) in [(1, 1), (3, 2), (0, 0)] {
      let frame = RgbFrame::with_shape(w, h);
      for step in 1..=Level::Student.step_count() {
        let out = t.apply(&frame, step, Level::Student).unwrap();
        assert_eq!(out.size(), (w, h));
      }
    }
  }
}
