// 该文件是 Tanjing （探镜） 项目的一部分。
// src/geometry.rs - 边界框几何工具
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

/// 左上角 + 宽高形式的边界框，单位为源图像像素
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 角点形式的边界框 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Corners {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn to_corners(&self) -> Corners {
    Corners {
      x1: self.x,
      y1: self.y,
      x2: self.x + self.width,
      y2: self.y + self.height,
    }
  }

  /// 负宽高按零面积处理
  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }
}

impl Corners {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn to_xywh(&self) -> BBox {
    BBox {
      x: self.x1,
      y: self.y1,
      width: self.x2 - self.x1,
      height: self.y2 - self.y1,
    }
  }

  /// 裁剪到 `[0, width] x [0, height]`，并保证 `x1 <= x2`、`y1 <= y2`。
  /// NaN 坐标被压到 0。
  pub fn clamp_to(&self, width: f32, height: f32) -> Corners {
    let clamp = |v: f32, hi: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, hi) };
    let (x1, x2) = (clamp(self.x1, width), clamp(self.x2, width));
    let (y1, y2) = (clamp(self.y1, height), clamp(self.y2, height));
    Corners {
      x1: x1.min(x2),
      y1: y1.min(y2),
      x2: x1.max(x2),
      y2: y1.max(y2),
    }
  }
}

impl From<Corners> for BBox {
  fn from(c: Corners) -> Self {
    c.to_xywh()
  }
}

impl From<BBox> for Corners {
  fn from(b: BBox) -> Self {
    b.to_corners()
  }
}

/// 计算两个边界框的 IoU，结果在 `[0, 1]` 内。
/// 不相交或任一框面积为零时返回 0。
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  // 面积与交集都从角点计算，保证 iou(a, a) 精确为 1
  let (ca, cb) = (a.to_corners(), b.to_corners());
  let area_a = (ca.x2 - ca.x1).max(0.0) * (ca.y2 - ca.y1).max(0.0);
  let area_b = (cb.x2 - cb.x1).max(0.0) * (cb.y2 - cb.y1).max(0.0);
  if !(area_a > 0.0 && area_b > 0.0) {
    return 0.0;
  }

  let x1 = ca.x1.max(cb.x1);
  let y1 = ca.y1.max(cb.y1);
  let x2 = ca.x2.min(cb.x2);
  let y2 = ca.y2.min(cb.y2);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    (intersection / union).clamp(0.0, 1.0)
  } else {
    0.0
  }
}
