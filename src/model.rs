// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model.rs - 检测结果与加速器接口
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

use crate::{frame::RgbFrame, geometry::BBox};

/// 单个检测结果，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  label: String,
  class_id: u32,
  confidence: f32,
  bbox: BBox,
}

impl Detection {
  /// 置信度被压到 `[0, 1]`，NaN 视为 0
  pub fn new(label: impl Into<String>, class_id: u32, confidence: f32, bbox: BBox) -> Self {
    let confidence = if confidence.is_nan() {
      0.0
    } else {
      confidence.clamp(0.0, 1.0)
    };
    Self {
      label: label.into(),
      class_id,
      confidence,
      bbox,
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn class_id(&self) -> u32 {
    self.class_id
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn bbox(&self) -> &BBox {
    &self.bbox
  }
}

/// 加速器一帧的原始输出：按输出索引排列的扁平 `f32` 张量。
/// 其含义完全由 [`crate::decoder::DecodeParams`] 决定。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAccelOutput {
  pub tensors: Vec<Box<[f32]>>,
}

impl RawAccelOutput {
  pub fn new(tensors: Vec<Vec<f32>>) -> Self {
    Self {
      tensors: tensors.into_iter().map(Vec::into_boxed_slice).collect(),
    }
  }

  pub fn empty() -> Self {
    Self::default()
  }

  pub fn tensor(&self, index: usize) -> Option<&[f32]> {
    self.tensors.get(index).map(|t| &**t)
  }

  pub fn shapes(&self) -> Vec<usize> {
    self.tensors.iter().map(|t| t.len()).collect()
  }
}

/// 在一帧图像上运行网络并返回原始输出的加速器
pub trait Accelerator {
  type Error;

  fn infer(&self, frame: &RgbFrame) -> Result<RawAccelOutput, Self::Error>;
}

#[cfg(feature = "rknpu_accel")]
mod rknpu_accel;
#[cfg(feature = "rknpu_accel")]
pub use self::rknpu_accel::{RknpuAccelerator, RknpuAcceleratorBuilder, RknpuError};
