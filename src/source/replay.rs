// 该文件是 Tanjing （探镜） 项目的一部分。
// src/source/replay.rs - 确定性回放帧来源
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

use std::{
  path::{Path, PathBuf},
  thread,
  time::Duration,
};

use image::ImageReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::RawAccelOutput,
  source::{CaptureError, FrameSource, Tick},
};

#[derive(Error, Debug)]
pub enum ReplaySourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("回放文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
  #[error("第 {0} 帧既没有图像也没有尺寸")]
  MissingFrame(usize),
  #[error("回放文件不含任何帧")]
  Empty,
}

/// 回放文件中的一帧。`image` 相对于回放文件所在目录；
/// 没有图像时用 `size` + `fill` 生成纯色帧。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureTick {
  #[serde(default)]
  pub image: Option<PathBuf>,
  #[serde(default)]
  pub size: Option<(u32, u32)>,
  #[serde(default)]
  pub fill: Option<[u8; 3]>,
  #[serde(default)]
  pub tensors: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFixture {
  #[serde(default, rename = "loop")]
  pub looping: bool,
  pub ticks: Vec<FixtureTick>,
}

impl ReplayFixture {
  pub fn load(path: &Path) -> Result<Self, ReplaySourceError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }

  pub fn save(&self, path: &Path) -> Result<(), ReplaySourceError> {
    let text = serde_json::to_string_pretty(self)?;
    std::fs::write(path, text)?;
    Ok(())
  }
}

/// 按固定顺序吐出预先录制的 `(帧, 原始输出)`，用于测试和离线讲解
pub struct ReplaySource {
  ticks: Vec<Tick>,
  cursor: usize,
  looping: bool,
  interval: Option<Duration>,
}

impl FromUrlWithScheme for ReplaySource {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplaySource {
  type Error = ReplaySourceError;

  /// `replay:///path/fixture.json?loop&interval_ms=33`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplaySourceError::SchemeMismatch);
    }

    let path = PathBuf::from(url.path());
    let mut source = Self::from_fixture_file(&path)?;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "loop" => source.looping = v != "false",
        "interval_ms" => {
          if let Ok(ms) = v.parse::<u64>() {
            source.interval = Some(Duration::from_millis(ms));
          }
        }
        _ => {}
      }
    }
    Ok(source)
  }
}

impl ReplaySource {
  pub fn new(ticks: Vec<Tick>) -> Self {
    Self {
      ticks,
      cursor: 0,
      looping: false,
      interval: None,
    }
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  /// 每次取帧前等待的时长，模拟摄像头帧率
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = Some(interval);
    self
  }

  pub fn len(&self) -> usize {
    self.ticks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.ticks.is_empty()
  }

  pub fn from_fixture_file(path: &Path) -> Result<Self, ReplaySourceError> {
    let fixture = ReplayFixture::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Self::from_fixture(&fixture, base)
  }

  pub fn from_fixture(fixture: &ReplayFixture, base: &Path) -> Result<Self, ReplaySourceError> {
    if fixture.ticks.is_empty() {
      return Err(ReplaySourceError::Empty);
    }
    let mut ticks = Vec::with_capacity(fixture.ticks.len());
    for (index, entry) in fixture.ticks.iter().enumerate() {
      let frame = match (&entry.image, entry.size) {
        (Some(image), _) => {
          let image = ImageReader::open(base.join(image))?.decode()?.to_rgb8();
          RgbFrame::from(image)
        }
        (None, Some((w, h))) => RgbFrame::filled(w, h, entry.fill.unwrap_or([0, 0, 0])),
        (None, None) => return Err(ReplaySourceError::MissingFrame(index)),
      };
      ticks.push(Tick {
        frame,
        raw: RawAccelOutput::new(entry.tensors.clone()),
      });
    }
    info!("载入回放文件: {} 帧", ticks.len());
    Ok(Self::new(ticks).looping(fixture.looping))
  }
}

impl FrameSource for ReplaySource {
  fn next_tick(&mut self) -> Result<Tick, CaptureError> {
    if let Some(interval) = self.interval {
      thread::sleep(interval);
    }
    if self.cursor >= self.ticks.len() {
      if !self.looping || self.ticks.is_empty() {
        return Err(CaptureError::Disconnected);
      }
      self.cursor = 0;
    }
    let tick = self.ticks[self.cursor].clone();
    debug!("回放第 {} 帧", self.cursor);
    self.cursor += 1;
    Ok(tick)
  }

  fn frame_size(&self) -> Option<(u32, u32)> {
    self.ticks.first().map(|t| t.frame.size())
  }
}
