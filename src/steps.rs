// 该文件是 Tanjing （探镜） 项目的一部分。
// src/steps.rs - 各学习级别的讲解步骤表
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

use std::fmt;

use crate::transform::{TransformPolicy, Vignette};

/// 学习级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum Level {
  /// 简化路线（中小学生），4 步
  #[default]
  Pupil,
  /// 详细路线（大学生），8 步
  Student,
}

/// 讲解步骤所展示的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
  Capture,
  Preprocess,
  Binarize,
  Features,
  TensorReadout,
  Proposals,
  Filtering,
  Localization,
}

/// 步骤表中的一项：变换策略 + 讲解文本键（文本内容由界面层提供）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDescriptor {
  pub kind: StepKind,
  pub policy: TransformPolicy,
  pub text_key: &'static str,
}

const BINARIZE: TransformPolicy = TransformPolicy::Binarize {
  threshold: 128,
  vignette: Some(Vignette { strength: 0.45 }),
};

const PUPIL_STEPS: [StepDescriptor; 4] = [
  StepDescriptor {
    kind: StepKind::Capture,
    policy: TransformPolicy::PassThrough,
    text_key: "pupil.capture",
  },
  StepDescriptor {
    kind: StepKind::Binarize,
    policy: BINARIZE,
    text_key: "pupil.binarize",
  },
  StepDescriptor {
    kind: StepKind::Features,
    policy: TransformPolicy::Edges {
      invert: true,
      tint: None,
    },
    text_key: "pupil.features",
  },
  StepDescriptor {
    kind: StepKind::Localization,
    policy: TransformPolicy::PassThrough,
    text_key: "pupil.localization",
  },
];

const STUDENT_STEPS: [StepDescriptor; 8] = [
  StepDescriptor {
    kind: StepKind::Capture,
    policy: TransformPolicy::PassThrough,
    text_key: "student.capture",
  },
  StepDescriptor {
    kind: StepKind::Preprocess,
    policy: TransformPolicy::Pixelate { size: 300 },
    text_key: "student.preprocess",
  },
  StepDescriptor {
    kind: StepKind::Binarize,
    policy: BINARIZE,
    text_key: "student.binarize",
  },
  StepDescriptor {
    kind: StepKind::Features,
    policy: TransformPolicy::Edges {
      invert: false,
      tint: Some([0.25, 0.85, 1.10]),
    },
    text_key: "student.features",
  },
  StepDescriptor {
    kind: StepKind::TensorReadout,
    policy: TransformPolicy::TensorReadout { seed: 1 },
    text_key: "student.tensor",
  },
  StepDescriptor {
    kind: StepKind::Proposals,
    policy: TransformPolicy::Dim { factor: 0.35 },
    text_key: "student.proposals",
  },
  StepDescriptor {
    kind: StepKind::Filtering,
    policy: TransformPolicy::Dim { factor: 0.70 },
    text_key: "student.filtering",
  },
  StepDescriptor {
    kind: StepKind::Localization,
    policy: TransformPolicy::PassThrough,
    text_key: "student.localization",
  },
];

impl Level {
  pub fn steps(self) -> &'static [StepDescriptor] {
    match self {
      Level::Pupil => &PUPIL_STEPS,
      Level::Student => &STUDENT_STEPS,
    }
  }

  pub fn step_count(self) -> usize {
    self.steps().len()
  }

  /// 步骤从 1 开始编号
  pub fn descriptor(self, step: usize) -> Option<&'static StepDescriptor> {
    step.checked_sub(1).and_then(|i| self.steps().get(i))
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Level::Pupil => write!(f, "pupil"),
      Level::Student => write!(f, "student"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn step_counts() {
    assert_eq!(Level::Pupil.step_count(), 4);
    assert_eq!(Level::Student.step_count(), 8);
  }

  #[test]
  fn descriptors_are_one_based() {
    assert!(Level::Pupil.descriptor(0).is_none());
    assert_eq!(Level::Pupil.descriptor(1).unwrap().kind, StepKind::Capture);
    assert_eq!(
      Level::Pupil.descriptor(4).unwrap().kind,
      StepKind::Localization
    );
    assert!(Level::Pupil.descriptor(5).is_none());
  }

  #[test]
  fn both_tracks_cover_the_core_transforms() {
    for level in [Level::Pupil, Level::Student] {
      let kinds: Vec<StepKind> = level.steps().iter().map(|s| s.kind).collect();
      for kind in [
        StepKind::Capture,
        StepKind::Binarize,
        StepKind::Features,
        StepKind::Localization,
      ] {
        assert!(kinds.contains(&kind), "{level} 缺少 {kind:?}");
      }
      assert_eq!(kinds.last(), Some(&StepKind::Localization));
    }
  }

  #[test]
  fn text_keys_are_unique() {
    let mut keys: Vec<&str> = Level::Pupil
      .steps()
      .iter()
      .chain(Level::Student.steps())
      .map(|s| s.text_key)
      .collect();
    let before = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), before);
  }
}
