// 该文件是 Tanjing （探镜） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Render, View, draw::Annotator},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把步骤画面保存为 PNG，按 `年/月/日` 分目录。只保存图像。
///
/// `folder:///path/to/dir?always&raw&flat`
/// - `always`：实时画面也保存（默认只保存分析步骤）
/// - `raw`：不绘制叠加层
/// - `flat`：不按日期分目录
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  annotator: Option<Annotator>,
  frame_counter: AtomicU32,
  always: bool,
  dated: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let has = |key: &str| uri.query_pairs().any(|(k, _)| k == key);
    let mut output = DirectoryRecordOutput::new(uri.path());
    output.always = has("always");
    output.dated = !has("flat");
    if has("raw") {
      output.annotator = None;
    }
    Ok(output)
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      annotator: Some(Annotator::default()),
      frame_counter: AtomicU32::new(0),
      always: false,
      dated: true,
    }
  }

  /// 替换叠加层样式；URL 要求 `raw` 时保持不绘制
  pub fn restyle(mut self, annotator: Annotator) -> Self {
    if self.annotator.is_some() {
      self.annotator = Some(annotator);
    }
    self
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  pub fn dated(mut self, dated: bool) -> Self {
    self.dated = dated;
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self, view: &View) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = if self.dated {
      self
        .directory
        .join(now.year().to_string())
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()))
    } else {
      self.directory.clone()
    };
    std::fs::create_dir_all(&directory)?;

    let stage = match (view.step, view.kind()) {
      (Some(step), Some(kind)) => format!("{}-{:02}-{:?}", view.level, step, kind).to_lowercase(),
      _ => "live".to_string(),
    };
    Ok(directory.join(format!(
      "{}-{:04X}-{}.png",
      now.format("%H-%M-%S"),
      self.frame_id(),
      stage
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_view(&self, view: &View) -> Result<(), Self::Error> {
    if view.is_live() && !self.always {
      return Ok(());
    }
    let path = self.frame_path(view)?;
    let image = match &self.annotator {
      Some(annotator) => annotator.annotate(view),
      None => view.image.to_rgb_image(),
    };
    image.save(&path)?;
    debug!("保存画面: {}", path.display());
    Ok(())
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

  fn view(step: Option<usize>) -> View {
    sized_view(8, 6, step)
  }

  fn sized_view(width: u32, height: u32, step: Option<usize>) -> View {
    let frame = RgbFrame::filled(width, height, [9, 9, 9]);
    View {
      image: frame.clone(),
      snapshot: Arc::new(FrameSnapshot::bare(frame, DecodeReport::default())),
      level: Level::Student,
      step,
      descriptor: step.and_then(|s| Level::Student.descriptor(s)),
    }
  }

  fn saved(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().path())
      .collect();
    files.sort();
    files
  }

  #[test]
  fn saves_step_views_and_skips_live() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?flat", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    output.render_view(&view(None)).unwrap();
    assert!(saved(dir.path()).is_empty());

    output.render_view(&view(Some(2))).unwrap();
    let files = saved(dir.path());
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.ends_with("-0001-student-02-preprocess.png"), "{name}");

    let image = image::open(&files[0]).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (8, 6));
  }

  #[test]
  fn always_records_live_views_in_dated_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path()).always(true);
    output.render_view(&view(None)).unwrap();

    let year = saved(dir.path());
    assert_eq!(year.len(), 1);
    let day = saved(&saved(&year[0])[0]);
    let files = saved(&day[0]);
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().ends_with("-live.png"));
  }

  #[test]
  fn restyle_keeps_raw_output_unannotated() {
    for (query, annotated) in [("flat&raw", false), ("flat", true)] {
      let dir = tempfile::tempdir().unwrap();
      let url = url::Url::parse(&format!("folder://{}?{}", dir.path().display(), query)).unwrap();
      let output = DirectoryRecordOutput::from_url(&url)
        .unwrap()
        .restyle(Annotator::new());

      // 第 1 步画像素网格
      output.render_view(&sized_view(40, 40, Some(1))).unwrap();
      let files = saved(dir.path());
      let image = image::open(&files[0]).unwrap().to_rgb8();
      let untouched = image.pixels().all(|p| p.0 == [9, 9, 9]);
      assert_eq!(untouched, !annotated, "{query}");
    }
  }
}
