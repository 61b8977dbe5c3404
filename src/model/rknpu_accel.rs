// 该文件是 Tanjing （探镜） 项目的一部分。
// src/model/rknpu_accel.rs - RKNPU 加速器
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

use image::imageops::{self, FilterType};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{Accelerator, RawAccelOutput},
};

#[derive(Error, Debug)]
pub enum RknpuError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
}

impl RknpuError {
  fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknpuError::ModelInvalid(msg.to_string(), e)
  }
}

/// 运行 `.rknn` 模型的加速器。输出张量原样交给解码器。
pub struct RknpuAccelerator {
  context: Context,
  input_size: (u32, u32),
  preserve_aspect_ratio: bool,
  num_outputs: usize,
}

/// `rknn:///path/model.rknn?width=320&height=320&preserve_aspect_ratio`
pub struct RknpuAcceleratorBuilder {
  model_path: String,
  flags: InitFlags,
  input_size: (u32, u32),
  preserve_aspect_ratio: bool,
}

impl FromUrlWithScheme for RknpuAcceleratorBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknpuAcceleratorBuilder {
  type Error = RknpuError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknpuError::SchemeMismatch(Self::SCHEME));
    }

    let mut builder = RknpuAcceleratorBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      input_size: (320, 320),
      preserve_aspect_ratio: false,
    };
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => builder.input_size.0 = v.parse().unwrap_or(builder.input_size.0),
        "height" => builder.input_size.1 = v.parse().unwrap_or(builder.input_size.1),
        "preserve_aspect_ratio" => builder.preserve_aspect_ratio = v != "false",
        _ => {}
      }
    }
    Ok(builder)
  }
}

impl RknpuAcceleratorBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = (width, height);
    self
  }

  pub fn preserve_aspect_ratio(mut self, preserve: bool) -> Self {
    self.preserve_aspect_ratio = preserve;
    self
  }

  pub fn build(self) -> Result<RknpuAccelerator, RknpuError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;
    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknpuError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknpuError::invalid("无法获取输入数量", e))?;
    if num_inputs != 1 {
      return Err(RknpuError::invalid(
        &format!("预期模型输入数量为 1, 实际为 {}", num_inputs),
        rknpu::Error::InvalidModel,
      ));
    }
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknpuError::invalid("无法获取输出数量", e))? as usize;
    info!(
      "模型加载完成: 输入 {}x{}, 输出 {} 个",
      self.input_size.0, self.input_size.1, num_outputs
    );

    Ok(RknpuAccelerator {
      context,
      input_size: self.input_size,
      preserve_aspect_ratio: self.preserve_aspect_ratio,
      num_outputs,
    })
  }
}

impl RknpuAccelerator {
  /// 缩放（必要时先中心裁剪）到模型输入尺寸，NHWC 排列
  fn prepare(&self, frame: &RgbFrame) -> Vec<u8> {
    let (in_w, in_h) = self.input_size;
    let image = frame.to_rgb_image();
    let image = if self.preserve_aspect_ratio {
      let (src_w, src_h) = (image.width() as f32, image.height() as f32);
      let crop_w = src_w.min(src_h * in_w as f32 / in_h as f32);
      let crop_h = crop_w * in_h as f32 / in_w as f32;
      let x = ((src_w - crop_w) / 2.0) as u32;
      let y = ((src_h - crop_h) / 2.0) as u32;
      imageops::crop_imm(&image, x, y, crop_w as u32, crop_h as u32).to_image()
    } else {
      image
    };
    imageops::resize(&image, in_w, in_h, FilterType::Triangle).into_raw()
  }
}

impl Accelerator for RknpuAccelerator {
  type Error = RknpuError;

  fn infer(&self, frame: &RgbFrame) -> Result<RawAccelOutput, Self::Error> {
    let input = self.prepare(frame);
    self
      .context
      .set_input(0, &input, TensorFormat::NHWC, TensorType::UInt8)?;
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let mut tensors = Vec::with_capacity(self.num_outputs);
    for idx in 0..self.num_outputs {
      tensors.push(output.get_f32(idx)?.to_vec());
    }
    debug!("加速器输出 {} 个张量", tensors.len());
    Ok(RawAccelOutput::new(tensors))
  }
}
