// 该文件是 Tanjing （探镜） 项目的一部分。
// src/args.rs - 命令行参数配置
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

use std::{path::PathBuf, time::Duration};

use clap::{Args, ValueEnum};
use tracing::info;
use url::Url;

use crate::{
  decoder::{BboxOrder, BoxEncoding, DecodeParams, Decoder},
  labels::{Labels, LabelsError},
  pipeline::{AnalysisConfig, Analyzer},
  steps::Level,
};

/// 加速器输出的后处理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Postprocess {
  /// 已在加速器上完成后处理：框（角点）、分数、类别三个张量
  #[default]
  Ssd,
  /// 框为中心点 + 宽高
  Nanodet,
  /// 三检测头网格输出，分数为最大 logit 的 sigmoid
  Yolo,
}

/// 检测与解码相关参数，两个程序共用
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 置信度阈值
  #[arg(long, default_value_t = 0.55, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// NMS IoU 阈值
  #[arg(long, default_value_t = 0.65, value_name = "THRESHOLD")]
  pub iou: f32,

  /// NMS 后最多保留的检测数
  #[arg(long, default_value_t = 10, value_name = "COUNT")]
  pub max_detections: usize,

  /// 最终步骤展示的检测数上限
  #[arg(long, default_value_t = 3, value_name = "COUNT")]
  pub top: usize,

  /// 候选框步骤展示的原始候选数
  #[arg(long, default_value_t = crate::pipeline::RAW_TOPK, value_name = "COUNT")]
  pub raw_topk: usize,

  /// 框坐标已归一化到 `[0, 1]`
  #[arg(long)]
  pub bbox_normalization: bool,

  /// 框坐标顺序
  #[arg(long, value_enum, default_value_t = BboxOrder::Yx)]
  pub bbox_order: BboxOrder,

  /// 输出后处理格式
  #[arg(long, value_enum, default_value_t = Postprocess::Ssd)]
  pub postprocess: Postprocess,

  /// 模型输入宽度
  #[arg(long, default_value_t = 320, value_name = "PIXELS")]
  pub input_width: u32,

  /// 模型输入高度
  #[arg(long, default_value_t = 320, value_name = "PIXELS")]
  pub input_height: u32,

  /// 模型输入为保持宽高比的中心裁剪
  #[arg(long)]
  pub preserve_aspect_ratio: bool,

  /// 标签文件，每行一个类别名（默认 COCO）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 丢弃名为 `-` 的占位标签
  #[arg(long)]
  pub ignore_dash_labels: bool,

  /// 学习级别
  #[arg(long, value_enum, default_value_t = Level::Pupil)]
  pub level: Level,
}

impl DetectorArgs {
  pub fn labels(&self) -> Result<Labels, LabelsError> {
    match &self.labels {
      Some(path) => {
        info!("载入标签文件: {}", path.display());
        Labels::from_file(path, self.ignore_dash_labels)
      }
      None => Ok(Labels::coco()),
    }
  }

  pub fn decode_params(&self, num_classes: usize) -> DecodeParams {
    let mut params = match self.postprocess {
      Postprocess::Ssd => DecodeParams {
        encoding: BoxEncoding::Corners {
          order: self.bbox_order,
          normalized: self.bbox_normalization,
        },
        ..Default::default()
      },
      Postprocess::Nanodet => DecodeParams {
        encoding: BoxEncoding::CenterSize {
          normalized: self.bbox_normalization,
        },
        ..Default::default()
      },
      Postprocess::Yolo => {
        DecodeParams::yolo_grid(self.input_width, self.input_height, num_classes)
      }
    };
    params.input_size = (self.input_width, self.input_height);
    params.preserve_aspect_ratio = self.preserve_aspect_ratio;
    params
  }

  pub fn analysis_config(&self) -> AnalysisConfig {
    AnalysisConfig {
      confidence_threshold: self.threshold,
      iou_threshold: self.iou,
      max_detections: self.max_detections,
      top_cap: self.top,
      raw_topk: self.raw_topk,
      ..Default::default()
    }
  }

  pub fn analyzer(&self) -> Result<Analyzer, LabelsError> {
    let labels = self.labels()?;
    let params = self.decode_params(labels.len());
    Ok(Analyzer::new(
      Decoder::new(params, labels),
      self.analysis_config(),
    ))
  }
}

/// 摄像头参数
#[derive(Args, Debug, Clone)]
pub struct CameraArgs {
  /// 摄像头宽度
  #[arg(long, default_value_t = 1280, value_name = "PIXELS")]
  pub cam_width: u32,

  /// 摄像头高度
  #[arg(long, default_value_t = 720, value_name = "PIXELS")]
  pub cam_height: u32,

  /// 等待一帧的最长时间
  #[arg(long, default_value_t = 500, value_name = "MILLIS")]
  pub tick_ms: u64,
}

impl CameraArgs {
  pub fn tick_budget(&self) -> Duration {
    Duration::from_millis(self.tick_ms.max(1))
  }

  /// 给 `v4l://` 来源补上未指定的分辨率
  pub fn apply_to(&self, input: &Url) -> Url {
    let mut url = input.clone();
    if url.scheme() != "v4l" {
      return url;
    }
    let has = |key: &str| input.query_pairs().any(|(k, _)| k == key);
    let (has_width, has_height) = (has("width"), has("height"));
    {
      let mut query = url.query_pairs_mut();
      if !has_width {
        query.append_pair("width", &self.cam_width.to_string());
      }
      if !has_height {
        query.append_pair("height", &self.cam_height.to_string());
      }
    }
    url
  }
}

#[cfg(test)]
mod tests {
  use clap::Parser;

  use super::*;

  #[derive(Parser)]
  struct Cli {
    #[command(flatten)]
    detector: DetectorArgs,
    #[command(flatten)]
    camera: CameraArgs,
  }

  #[test]
  fn defaults_follow_the_classroom_setup() {
    let cli = Cli::parse_from(["tanjing"]);
    let config = cli.detector.analysis_config();
    assert_eq!(config.confidence_threshold, 0.55);
    assert_eq!(config.iou_threshold, 0.65);
    assert_eq!(config.max_detections, 10);
    assert_eq!(config.top_cap, 3);
    assert_eq!(cli.detector.level, Level::Pupil);
    assert_eq!(cli.camera.cam_width, 1280);
    assert_eq!(cli.camera.cam_height, 720);
  }

  #[test]
  fn nanodet_params() {
    let cli = Cli::parse_from([
      "tanjing",
      "--postprocess",
      "nanodet",
      "--bbox-normalization",
      "--preserve-aspect-ratio",
      "--level",
      "student",
    ]);
    let params = cli.detector.decode_params(80);
    assert_eq!(params.encoding, BoxEncoding::CenterSize { normalized: true });
    assert!(params.preserve_aspect_ratio);
    assert_eq!(cli.detector.level, Level::Student);
  }

  #[test]
  fn yolo_heads_use_both_input_dimensions() {
    let cli = Cli::parse_from([
      "tanjing",
      "--postprocess",
      "yolo",
      "--input-width",
      "64",
      "--input-height",
      "32",
    ]);
    let params = cli.detector.decode_params(80);
    assert_eq!(params.input_size, (64, 32));
    let BoxEncoding::Grid { heads, num_classes } = params.encoding else {
      panic!("应为网格编码");
    };
    assert_eq!(num_classes, 80);
    assert_eq!(
      heads.iter().map(|h| (h.rows, h.cols)).collect::<Vec<_>>(),
      vec![(4, 8), (2, 4), (1, 2)]
    );
  }

  #[test]
  fn camera_size_is_added_to_v4l_urls_only() {
    let cli = Cli::parse_from(["tanjing", "--cam-width", "640"]);
    let url = cli
      .camera
      .apply_to(&Url::parse("v4l:///dev/video0?height=480").unwrap());
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("width".into(), "640".into())));
    assert!(pairs.contains(&("height".into(), "480".into())));
    assert!(!pairs.contains(&("height".into(), "720".into())));

    let replay = Url::parse("replay:///tmp/f.json").unwrap();
    assert_eq!(cli.camera.apply_to(&replay), replay);
  }
}
