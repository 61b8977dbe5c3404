// 该文件是 Tanjing （探镜） 项目的一部分。
// src/labels.rs - 类别标签
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件为空: {0}")]
  Empty(String),
}

/// 类别 ID 到标签名的映射
#[derive(Debug, Clone)]
pub struct Labels {
  names: Vec<String>,
}

impl Default for Labels {
  fn default() -> Self {
    Self::coco()
  }
}

impl Labels {
  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    }
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 每行一个标签。`ignore_dash` 为真时丢弃空行和 `-` 占位标签，
  /// 后续类别 ID 随之前移。
  pub fn from_file(path: impl AsRef<Path>, ignore_dash: bool) -> Result<Self, LabelsError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let labels = Self::parse(&text, ignore_dash);
    if labels.names.is_empty() {
      return Err(LabelsError::Empty(path.display().to_string()));
    }
    debug!("标签数量: {}", labels.names.len());
    Ok(labels)
  }

  pub fn parse(text: &str, ignore_dash: bool) -> Self {
    let names = text
      .lines()
      .map(|line| line.trim_end_matches('\r'))
      .filter(|line| !ignore_dash || (!line.is_empty() && *line != "-"))
      .map(str::to_string)
      .collect();
    Self { names }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: u32) -> String {
    self
      .names
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("Class {}", class_id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_class_falls_back() {
    let labels = Labels::coco();
    assert_eq!(labels.name(0), "person");
    assert_eq!(labels.name(500), "Class 500");
  }

  #[test]
  fn dash_labels_are_dropped_when_requested() {
    let text = "background\n-\ncat\n\ndog\n";
    assert_eq!(Labels::parse(text, false).len(), 5);
    let labels = Labels::parse(text, true);
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), "cat");
  }

  #[test]
  fn file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.txt");
    std::fs::write(&path, "a\nb\n").unwrap();
    let labels = Labels::from_file(&path, false).unwrap();
    assert_eq!(labels.name(1), "b");

    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, "").unwrap();
    assert!(matches!(
      Labels::from_file(&empty, true),
      Err(LabelsError::Empty(_))
    ));
  }
}
