// 该文件是 Tanjing （探镜） 项目的一部分。
// src/source/v4l_camera.rs - V4L2 摄像头
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, source::Camera};

#[derive(Error, Debug)]
pub enum V4lCameraError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的像素格式: {0}")]
  UnsupportedPixelFormat(String),
  #[error("图像解码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("帧数据错误: {0}")]
  FrameError(#[from] crate::frame::FrameError),
  #[error("缓冲区长度不足: 期望 {expected}, 实际 {actual}")]
  ShortBuffer { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Rgb3,
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"RGB3" => Some(PixelFormat::Rgb3),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      _ => None,
    }
  }
}

pub const DEFAULT_CAM_WIDTH: u32 = 1280;
pub const DEFAULT_CAM_HEIGHT: u32 = 720;

/// `v4l:///dev/video0?width=1280&height=720`
pub struct V4lCamera {
  device: Device,
  width: u32,
  height: u32,
  format: PixelFormat,
}

impl FromUrlWithScheme for V4lCamera {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCamera {
  type Error = V4lCameraError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCameraError::SchemeMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };

    let mut width = DEFAULT_CAM_WIDTH;
    let mut height = DEFAULT_CAM_HEIGHT;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "width" => width = v.parse().unwrap_or(width),
        "height" => height = v.parse().unwrap_or(height),
        _ => {}
      }
    }

    Self::open(&device_path, width, height)
  }
}

impl V4lCamera {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lCameraError> {
    let device = Device::with_path(device_path)?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"RGB3");
    let mut format = device.set_format(&format)?;
    if PixelFormat::from_fourcc(&format.fourcc).is_none() {
      format.fourcc = FourCC::new(b"YUYV");
      format = device.set_format(&format)?;
    }
    if PixelFormat::from_fourcc(&format.fourcc).is_none() {
      format.fourcc = FourCC::new(b"MJPG");
      format = device.set_format(&format)?;
    }
    let pixel_format = PixelFormat::from_fourcc(&format.fourcc)
      .ok_or_else(|| V4lCameraError::UnsupportedPixelFormat(format.fourcc.to_string()))?;

    if format.width != width || format.height != height {
      warn!(
        "摄像头不支持 {}x{}, 实际使用 {}x{}",
        width, height, format.width, format.height
      );
    }
    info!(
      "打开摄像头 {}: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    Ok(Self {
      device,
      width: format.width,
      height: format.height,
      format: pixel_format,
    })
  }

  fn convert(&self, buf: &[u8]) -> Result<RgbFrame, V4lCameraError> {
    let pixels = (self.width * self.height) as usize;
    match self.format {
      PixelFormat::Rgb3 => {
        let expected = pixels * 3;
        if buf.len() < expected {
          return Err(V4lCameraError::ShortBuffer {
            expected,
            actual: buf.len(),
          });
        }
        Ok(RgbFrame::new(
          self.width,
          self.height,
          buf[..expected].to_vec(),
        )?)
      }
      PixelFormat::Yuyv => {
        let expected = pixels * 2;
        if buf.len() < expected {
          return Err(V4lCameraError::ShortBuffer {
            expected,
            actual: buf.len(),
          });
        }
        let mut frame = RgbFrame::with_shape(self.width, self.height);
        yuyv_to_rgb(&buf[..expected], frame.as_mut());
        Ok(frame)
      }
      PixelFormat::Mjpg => {
        let image = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8();
        Ok(RgbFrame::from(image))
      }
    }
  }
}

impl Camera for V4lCamera {
  type Error = V4lCameraError;

  fn capture(&mut self) -> Result<RgbFrame, Self::Error> {
    let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, 4)?;
    let (buf, _meta) = stream.next()?;
    self.convert(buf)
  }

  fn frame_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}

/// YUYV 4:2:2 → RGB24（BT.601 有限范围）
fn yuyv_to_rgb(src: &[u8], dst: &mut [u8]) {
  for (yuyv, rgb) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
    let u = yuyv[1] as f32 - 128.0;
    let v = yuyv[3] as f32 - 128.0;
    for (i, y) in [yuyv[0], yuyv[2]].into_iter().enumerate() {
      let y = 1.164 * (y as f32 - 16.0);
      rgb[i * 3] = (y + 1.596 * v).clamp(0.0, 255.0) as u8;
      rgb[i * 3 + 1] = (y - 0.392 * u - 0.813 * v).clamp(0.0, 255.0) as u8;
      rgb[i * 3 + 2] = (y + 2.017 * u).clamp(0.0, 255.0) as u8;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray() {
    let src = [128u8, 128, 128, 128];
    let mut dst = [0u8; 6];
    yuyv_to_rgb(&src, &mut dst);
    for c in dst {
      assert!((c as i32 - 130).abs() <= 1, "{c}");
    }
  }

  #[test]
  fn yuyv_extremes_clamp() {
    let src = [255u8, 255, 0, 255];
    let mut dst = [0u8; 6];
    yuyv_to_rgb(&src, &mut dst);
    assert_eq!(dst[0], 255);
    assert_eq!(dst[2], 255);
  }

  #[test]
  fn fourcc_detection() {
    assert_eq!(
      PixelFormat::from_fourcc(&FourCC::new(b"YUYV")),
      Some(PixelFormat::Yuyv)
    );
    assert_eq!(PixelFormat::from_fourcc(&FourCC::new(b"NV12")), None);
  }
}
