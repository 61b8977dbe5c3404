// 该文件是 Tanjing （探镜） 项目的一部分。
// src/bin/live_session.rs - 摄像头实时会话，终端单键控制
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

use std::{io::BufRead, path::PathBuf, thread};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use tanjing::{
  FromUrl,
  args::{CameraArgs, DetectorArgs},
  output::OutputWrapper,
  session::{Command, Event, EventSender, Session},
  source::{BoxedSource, NoAccelerator, open_source},
};

/// 实时显示检测结果，按键冻结后逐步讲解
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型（rknn:///path/model.rknn），不指定则只显示画面
  #[arg(long, value_name = "MODEL")]
  pub model: Option<Url>,
  /// 输入来源（v4l:///dev/video0 或 replay:///path/fixture.json）
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出（folder:///path/to/dir 或 memory://）
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 标签字体文件（TTF/OTF）
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  #[command(flatten)]
  pub detector: DetectorArgs,
  #[command(flatten)]
  pub camera: CameraArgs,
}

fn open(args: &Args, input: &Url) -> Result<BoxedSource> {
  let Some(model) = &args.model else {
    return Ok(open_source(input, NoAccelerator)?);
  };
  info!("模型文件路径: {}", model);

  #[cfg(feature = "rknpu_accel")]
  {
    let accelerator = tanjing::model::RknpuAcceleratorBuilder::from_url(model)?
      .input_size(args.detector.input_width, args.detector.input_height)
      .preserve_aspect_ratio(args.detector.preserve_aspect_ratio)
      .build()?;
    Ok(open_source(input, accelerator)?)
  }
  #[cfg(not(feature = "rknpu_accel"))]
  {
    anyhow::bail!("未启用 rknpu_accel 功能, 无法加载模型 {}", model)
  }
}

fn output(args: &Args) -> Result<OutputWrapper> {
  #[cfg(feature = "directory_record")]
  {
    use tanjing::{
      FromUrlWithScheme,
      output::{DirectoryRecordOutput, draw::Annotator},
    };

    if args.output.scheme() == DirectoryRecordOutput::SCHEME
      && let Some(font) = &args.font
    {
      #[cfg(feature = "label_text")]
      {
        let annotator = Annotator::new().with_font_file(font)?;
        let output = DirectoryRecordOutput::from_url(&args.output)?.restyle(annotator);
        return Ok(OutputWrapper::DirectoryRecordOutput(output));
      }
      #[cfg(not(feature = "label_text"))]
      warn!("未启用 label_text 功能, 忽略字体 {}", font.display());
    }
  }
  Ok(OutputWrapper::from_url(&args.output)?)
}

/// 终端每行一个命令；输入结束视为退出
fn spawn_stdin_reader(sender: EventSender) {
  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      let Ok(line) = line else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }
      match line.parse::<Command>() {
        Ok(command) => {
          if sender.send(Event::Command(command)).is_err() {
            return;
          }
        }
        Err(e) => warn!("{} (f 冻结, n 下一步, p 上一步, l 实时, 1/2 级别, q 退出)", e),
      }
    }
    let _ = sender.send(Event::Command(Command::Quit));
  });
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let input = args.camera.apply_to(&args.input);
  info!("输入来源: {}", input);
  info!("输出路径: {}", args.output);
  info!("学习级别: {}", args.detector.level);

  let analyzer = args.detector.analyzer()?;
  let source = open(&args, &input)?;
  let output = output(&args)?;

  let mut session = Session::new(analyzer, args.detector.level, output)
    .tick_budget(args.camera.tick_budget());
  session.install_ctrlc()?;
  let capture = session.spawn_capture(source);
  spawn_stdin_reader(session.sender());

  let stats = session.run();
  capture.stop();
  info!(
    "退出: {} 帧, 跳过 {} 帧, 失败 {} 次, 超时 {} 次, 渲染 {} 次",
    stats.ticks, stats.skipped_ticks, stats.failed_ticks, stats.timeouts, stats.renders
  );
  Ok(())
}
