// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output.rs - 输出定义
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

use std::sync::{Arc, Mutex};

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  frame::RgbFrame,
  snapshot::FrameSnapshot,
  steps::{Level, StepDescriptor, StepKind},
};

pub mod draw;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 一次待展示的画面：变换后的图像 + 其来源快照 + 所处步骤
#[derive(Debug, Clone)]
pub struct View {
  pub image: RgbFrame,
  pub snapshot: Arc<FrameSnapshot>,
  pub level: Level,
  /// 实时模式为 `None`
  pub step: Option<usize>,
  pub descriptor: Option<&'static StepDescriptor>,
}

impl View {
  pub fn is_live(&self) -> bool {
    self.step.is_none()
  }

  pub fn kind(&self) -> Option<StepKind> {
    self.descriptor.map(|d| d.kind)
  }
}

/// 画面的最终去处（窗口、文件、测试收集器……）
pub trait Render {
  type Error;
  fn render_view(&self, view: &View) -> Result<(), Self::Error>;
}

impl<R: Render + ?Sized> Render for Arc<R> {
  type Error = R::Error;

  fn render_view(&self, view: &View) -> Result<(), Self::Error> {
    (**self).render_view(view)
  }
}

/// 收集到内存中的画面记录
#[derive(Debug, Clone)]
pub struct RenderedView {
  pub level: Level,
  pub step: Option<usize>,
  pub kind: Option<StepKind>,
  pub image: RgbFrame,
  pub detections: usize,
}

/// 把画面保存在内存里，供测试和嵌入方读取
#[derive(Debug, Default)]
pub struct MemoryOutput {
  views: Mutex<Vec<RenderedView>>,
}

impl MemoryOutput {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn views(&self) -> Vec<RenderedView> {
    self
      .views
      .lock()
      .map(|views| views.clone())
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.views.lock().map(|v| v.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl Render for MemoryOutput {
  type Error = OutputError;

  fn render_view(&self, view: &View) -> Result<(), Self::Error> {
    let mut views = self.views.lock().map_err(|_| OutputError::Poisoned)?;
    views.push(RenderedView {
      level: view.level,
      step: view.step,
      kind: view.kind(),
      image: view.image.clone(),
      detections: view.snapshot.detections().len(),
    });
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("输出锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  Memory(MemoryOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "directory_record")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DirectoryRecordOutput::SCHEME {
        let output = DirectoryRecordOutput::from_url(url)?;
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
    }
    if url.scheme() == "memory" {
      return Ok(OutputWrapper::Memory(MemoryOutput::new()));
    }
    Err(OutputError::SchemeMismatch)
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_view(&self, view: &View) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        output.render_view(view).map_err(OutputError::from)
      }
      OutputWrapper::Memory(output) => output.render_view(view),
    }
  }
}
