// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/draw.rs - 检测结果与讲解叠加层绘制
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

#[cfg(feature = "label_text")]
use std::path::Path;

#[cfg(feature = "label_text")]
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_line_segment_mut},
  rect::Rect,
};
#[cfg(feature = "label_text")]
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};

use crate::{geometry::BBox, model::Detection, output::View, steps::StepKind};

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const GRID_SPACING: u32 = 16;
const GRID_COLOR: [u8; 3] = [60, 60, 60];
const PROPOSAL_COLOR: [u8; 3] = [120, 160, 255];
const REJECTED_COLOR: [u8; 3] = [200, 60, 60];

/// 按类别循环取色
const PALETTE: [[u8; 3]; 8] = [
  [0, 200, 0],
  [0, 120, 255],
  [255, 160, 0],
  [220, 0, 220],
  [0, 220, 220],
  [255, 80, 80],
  [160, 255, 60],
  [255, 255, 0],
];

pub fn class_color(class_id: u32) -> [u8; 3] {
  PALETTE[class_id as usize % PALETTE.len()]
}

#[cfg(feature = "label_text")]
#[derive(thiserror::Error, Debug)]
pub enum FontError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在步骤画面上叠加网格、候选框与检测框。
/// 没有字体时只画框，不画文字标签。
pub struct Annotator {
  thickness: u32,
  grid_spacing: u32,
  #[cfg(feature = "label_text")]
  font: Option<FontVec>,
  #[cfg(feature = "label_text")]
  font_size: f32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self {
      thickness: 2,
      grid_spacing: GRID_SPACING,
      #[cfg(feature = "label_text")]
      font: None,
      #[cfg(feature = "label_text")]
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Annotator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn grid_spacing(mut self, spacing: u32) -> Self {
    self.grid_spacing = spacing.max(2);
    self
  }

  #[cfg(feature = "label_text")]
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  /// 按视图所处的步骤绘制叠加层
  pub fn annotate(&self, view: &View) -> RgbImage {
    let mut image = view.image.to_rgb_image();
    let snapshot = &view.snapshot;

    match view.kind() {
      None => {
        for det in snapshot.detections() {
          self.draw_detection(&mut image, det, class_color(det.class_id()));
        }
      }
      Some(StepKind::Capture) => self.draw_grid(&mut image),
      Some(StepKind::Proposals) => {
        for det in snapshot.proposals() {
          self.draw_box(&mut image, det.bbox(), PROPOSAL_COLOR, 1);
        }
      }
      Some(StepKind::Filtering) => {
        for det in snapshot.proposals() {
          if !snapshot.detections().contains(det) {
            self.draw_box(&mut image, det.bbox(), REJECTED_COLOR, 1);
          }
        }
        for det in snapshot.detections() {
          self.draw_box(&mut image, det.bbox(), class_color(det.class_id()), self.thickness);
        }
      }
      Some(StepKind::Localization) => {
        for det in snapshot.top_detections() {
          self.draw_detection(&mut image, det, class_color(det.class_id()));
        }
      }
      Some(_) => {}
    }
    image
  }

  fn draw_grid(&self, image: &mut RgbImage) {
    let (w, h) = image.dimensions();
    let color = Rgb(GRID_COLOR);
    for x in (self.grid_spacing..w).step_by(self.grid_spacing as usize) {
      draw_line_segment_mut(image, (x as f32, 0.0), (x as f32, h as f32 - 1.0), color);
    }
    for y in (self.grid_spacing..h).step_by(self.grid_spacing as usize) {
      draw_line_segment_mut(image, (0.0, y as f32), (w as f32 - 1.0, y as f32), color);
    }
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: &BBox, color: [u8; 3], thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
      return;
    }
    let x = (bbox.x.floor() as i32).clamp(0, w as i32 - 1);
    let y = (bbox.y.floor() as i32).clamp(0, h as i32 - 1);
    let x2 = ((bbox.x + bbox.width).ceil() as i32).clamp(0, w as i32 - 1);
    let y2 = ((bbox.y + bbox.height).ceil() as i32).clamp(0, h as i32 - 1);
    if x2 <= x || y2 <= y {
      return;
    }

    for t in 0..thickness as i32 {
      let (bw, bh) = (x2 - x - 2 * t, y2 - y - 2 * t);
      if bw <= 0 || bh <= 0 {
        break;
      }
      let rect = Rect::at(x + t, y + t).of_size(bw as u32 + 1, bh as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    self.draw_box(image, det.bbox(), color, self.thickness);
    #[cfg(feature = "label_text")]
    self.draw_label(image, det, color);
  }

  #[cfg(feature = "label_text")]
  fn draw_label(&self, image: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let label = format!("{} {:.0}%", det.label(), det.confidence() * 100.0);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);

    let (w, _) = image.dimensions();
    let label_x = (det.bbox().x as i32).max(0);
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
    let label_y = (det.bbox().y as i32 - label_h).max(0);
    let label_w = (text_w as i32 + 4).min(w as i32 - label_x);
    if label_w <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_w as u32, label_h as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x + 2,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{
    frame::RgbFrame,
    snapshot::{DecodeReport, FrameSnapshot},
    steps::Level,
  };

  fn view(step: Option<usize>, level: Level) -> View {
    let frame = RgbFrame::with_shape(64, 48);
    let det = Detection::new("cat", 0, 0.9, BBox::new(10.0, 10.0, 20.0, 20.0));
    let snapshot = Arc::new(FrameSnapshot::new(
      frame.clone(),
      vec![det.clone()],
      vec![det],
      3,
      DecodeReport::default(),
    ));
    View {
      image: frame,
      snapshot,
      level,
      step,
      descriptor: step.and_then(|s| level.descriptor(s)),
    }
  }

  #[test]
  fn localization_draws_box_edges() {
    let image = Annotator::new().annotate(&view(Some(4), Level::Pupil));
    assert_eq!(image.get_pixel(10, 10).0, class_color(0));
    assert_eq!(image.get_pixel(30, 30).0, class_color(0));
    // 框内不填充
    assert_eq!(image.get_pixel(20, 20).0, [0, 0, 0]);
  }

  #[test]
  fn capture_draws_grid_only() {
    let image = Annotator::new().annotate(&view(Some(1), Level::Pupil));
    assert_eq!(image.get_pixel(16, 5).0, GRID_COLOR);
    assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0]);
  }

  #[test]
  fn live_view_draws_detections() {
    let image = Annotator::new().annotate(&view(None, Level::Pupil));
    assert_eq!(image.get_pixel(10, 10).0, class_color(0));
  }

  #[test]
  fn binarize_step_has_no_overlay() {
    let v = view(Some(2), Level::Pupil);
    let image = Annotator::new().annotate(&v);
    assert_eq!(image, v.image.to_rgb_image());
  }

  #[test]
  fn degenerate_box_is_skipped() {
    let mut image = RgbImage::new(8, 8);
    Annotator::new().draw_box(&mut image, &BBox::new(3.0, 3.0, 0.0, 0.0), [255, 0, 0], 2);
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
  }
}
