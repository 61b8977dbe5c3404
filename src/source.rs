// 该文件是 Tanjing （探镜） 项目的一部分。
// src/source.rs - 帧来源（摄像头 + 加速器）
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

use std::fmt::Display;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  frame::{FrameError, RgbFrame},
  model::{Accelerator, RawAccelOutput},
};

#[cfg(feature = "replay_input")]
mod replay;
#[cfg(feature = "replay_input")]
pub use self::replay::{FixtureTick, ReplayFixture, ReplaySource, ReplaySourceError};

#[cfg(feature = "v4l_input")]
mod v4l_camera;
#[cfg(feature = "v4l_input")]
pub use self::v4l_camera::{V4lCamera, V4lCameraError};

/// 一次采集的结果：摄像头帧及对应的加速器原始输出
#[derive(Debug, Clone)]
pub struct Tick {
  pub frame: RgbFrame,
  pub raw: RawAccelOutput,
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("采集超时")]
  Timeout,
  #[error("帧来源已断开")]
  Disconnected,
  #[error("设备错误: {0}")]
  Device(String),
  #[error("加速器错误: {0}")]
  Accelerator(String),
  #[error("帧数据错误: {0}")]
  Frame(#[from] FrameError),
}

/// 摄像头/加速器能力接口。`next_tick` 可以阻塞，调用方应在独立线程中驱动它。
pub trait FrameSource {
  fn next_tick(&mut self) -> Result<Tick, CaptureError>;

  /// `(width, height)`，未知时为 `None`
  fn frame_size(&self) -> Option<(u32, u32)> {
    None
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn next_tick(&mut self) -> Result<Tick, CaptureError> {
    (**self).next_tick()
  }

  fn frame_size(&self) -> Option<(u32, u32)> {
    (**self).frame_size()
  }
}

/// 仅采集图像的摄像头
pub trait Camera {
  type Error: Display;

  fn capture(&mut self) -> Result<RgbFrame, Self::Error>;
  fn frame_size(&self) -> (u32, u32);
}

/// 不运行网络的加速器，输出为空；画面照常显示但没有检测结果
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

impl Accelerator for NoAccelerator {
  type Error = std::convert::Infallible;

  fn infer(&self, _frame: &RgbFrame) -> Result<RawAccelOutput, Self::Error> {
    Ok(RawAccelOutput::empty())
  }
}

/// 摄像头 + 加速器组合成的帧来源
pub struct CameraSource<C, A> {
  camera: C,
  accelerator: A,
}

impl<C: Camera, A: Accelerator> CameraSource<C, A> {
  pub fn new(camera: C, accelerator: A) -> Self {
    Self {
      camera,
      accelerator,
    }
  }
}

impl<C, A> FrameSource for CameraSource<C, A>
where
  C: Camera,
  A: Accelerator,
  A::Error: Display,
{
  fn next_tick(&mut self) -> Result<Tick, CaptureError> {
    let frame = self
      .camera
      .capture()
      .map_err(|e| CaptureError::Device(e.to_string()))?;
    let raw = self
      .accelerator
      .infer(&frame)
      .map_err(|e| CaptureError::Accelerator(e.to_string()))?;
    Ok(Tick { frame, raw })
  }

  fn frame_size(&self) -> Option<(u32, u32)> {
    Some(self.camera.frame_size())
  }
}

#[derive(Error, Debug)]
pub enum SourceError {
  #[cfg(feature = "replay_input")]
  #[error("回放输入错误: {0}")]
  Replay(#[from] ReplaySourceError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L 摄像头错误: {0}")]
  V4l(#[from] V4lCameraError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub type BoxedSource = Box<dyn FrameSource + Send>;

/// 按 URL 方案打开帧来源。摄像头来源配合 `accelerator` 使用。
pub fn open_source<A>(url: &Url, accelerator: A) -> Result<BoxedSource, SourceError>
where
  A: Accelerator + Send + 'static,
  A::Error: Display,
{
  info!("打开帧来源: {}", url);
  #[cfg(feature = "replay_input")]
  {
    use crate::FromUrlWithScheme;

    if url.scheme() == ReplaySource::SCHEME {
      let _ = &accelerator;
      return Ok(Box::new(ReplaySource::from_url(url)?));
    }
  }
  #[cfg(feature = "v4l_input")]
  {
    use crate::FromUrlWithScheme;

    if url.scheme() == V4lCamera::SCHEME {
      let camera = V4lCamera::from_url(url)?;
      return Ok(Box::new(CameraSource::new(camera, accelerator)));
    }
  }
  let _ = accelerator;
  Err(SourceError::SchemeMismatch(url.scheme().to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FakeCamera {
    shots: u32,
  }

  impl Camera for FakeCamera {
    type Error = String;

    fn capture(&mut self) -> Result<RgbFrame, Self::Error> {
      self.shots += 1;
      if self.shots > 2 {
        return Err("断开".to_string());
      }
      Ok(RgbFrame::filled(4, 2, [self.shots as u8, 0, 0]))
    }

    fn frame_size(&self) -> (u32, u32) {
      (4, 2)
    }
  }

  #[test]
  fn camera_source_pairs_frame_with_output() {
    let mut source = CameraSource::new(FakeCamera { shots: 0 }, NoAccelerator);
    assert_eq!(source.frame_size(), Some((4, 2)));
    let tick = source.next_tick().unwrap();
    assert_eq!(tick.frame.pixel(0, 0), Some([1, 0, 0]));
    assert!(tick.raw.tensors.is_empty());
    source.next_tick().unwrap();
    assert!(matches!(source.next_tick(), Err(CaptureError::Device(_))));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://example/frames").unwrap();
    assert!(matches!(
      open_source(&url, NoAccelerator),
      Err(SourceError::SchemeMismatch(_))
    ));
  }
}
