// 该文件是 Tanjing （探镜） 项目的一部分。
// src/bin/step_through.rs - 回放一帧并逐步输出每个讲解步骤
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

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use tanjing::{
  FromUrl,
  args::DetectorArgs,
  output::{DirectoryRecordOutput, draw::Annotator},
  session::{Command, Event, Session},
  source::{FrameSource, ReplaySource},
};

/// 回放一帧，冻结后依次输出当前级别的每个步骤画面
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 回放文件（replay:///path/fixture.json）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出目录（folder:///path/to/dir）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 标签字体文件（TTF/OTF），不指定则只画框
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[command(flatten)]
  pub detector: DetectorArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("学习级别: {}", args.detector.level);

  let analyzer = args.detector.analyzer()?;
  let mut source = ReplaySource::from_url(&args.input)?;
  let mut annotator = Annotator::new();
  if let Some(font) = &args.font {
    #[cfg(feature = "label_text")]
    {
      annotator = annotator.with_font_file(font)?;
    }
    #[cfg(not(feature = "label_text"))]
    tracing::warn!("未启用 label_text 功能, 忽略字体 {}", font.display());
  }
  let output = DirectoryRecordOutput::from_url(&args.output)?
    .dated(false)
    .restyle(annotator);

  let mut session = Session::new(analyzer, args.detector.level, output);
  let tick = source.next_tick()?;
  session.handle(Event::Tick(Ok(tick)));

  let Some(snapshot) = session.controller().displayed().cloned() else {
    bail!("回放文件没有产生任何画面");
  };
  let report = snapshot.report();
  info!(
    "输出张量: {:?}, 候选 {} 个, 过阈值 {} 个, 保留 {} 个",
    report.output_shapes, report.raw_candidates, report.above_threshold, report.kept
  );
  if let Some(e) = &report.error {
    info!("解码失败, 本帧无检测结果: {}", e);
  }
  for (index, det) in snapshot.top_detections().iter().enumerate() {
    let bbox = det.bbox();
    info!(
      "  {}. {} {:.1}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      index + 1,
      det.label(),
      det.confidence() * 100.0,
      bbox.x,
      bbox.y,
      bbox.width,
      bbox.height
    );
  }

  session.handle(Event::Command(Command::Freeze));
  for _ in 1..session.controller().step_count() {
    session.handle(Event::Command(Command::Advance));
  }

  let stats = session.stats();
  info!(
    "完成: 输出 {} 个步骤画面, 失败 {} 次",
    stats.renders, stats.render_errors
  );
  if stats.render_errors > 0 {
    bail!("有 {} 个画面保存失败", stats.render_errors);
  }
  Ok(())
}
