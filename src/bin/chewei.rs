// 该文件是 Chewei （车位） 项目的一部分。
// src/bin/chewei.rs - 车位占用监测主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chewei::{
  config::Config,
  input::{InputSource, InputWrapper},
  model::{FramePreprocessor, OccupancyModel},
  output::{create_outputs, draw::Annotator},
  task::{ContinuousTask, Task, install_interrupt_handler},
};

/// Chewei 参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径（也接受 `-config`）
  #[arg(long, value_name = "CONFIG", default_value = "config.json")]
  pub config: PathBuf,

  /// 处理指定帧数后退出
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
}

/// 兼容单横线的 `-config` 写法
fn normalize_args() -> Vec<String> {
  std::env::args()
    .map(|arg| match arg.strip_prefix("-config") {
      Some(rest) if rest.is_empty() || rest.starts_with('=') => format!("--config{}", rest),
      _ => arg,
    })
    .collect()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse_from(normalize_args());

  let config = Config::load(&args.config)?;
  config.log_summary();

  info!("Initializing input stream ...");
  let input = InputWrapper::open(&config.stream)?;
  let resolution = input.resolution();
  info!("输入分辨率: {}", resolution);

  let model = OccupancyModel::try_new(
    config.spots.clone(),
    FramePreprocessor::new(config.preprocess),
    resolution,
  )?;

  info!("Initializing output stream ...");
  let outputs = create_outputs(&config, resolution)?;
  let annotator = Annotator::load(config.font.as_deref());
  let stop = install_interrupt_handler()?;

  let summary = ContinuousTask::new(config.fps)
    .with_frame_number(args.frame_number)
    .with_stop_signal(stop)
    .with_annotator(annotator)
    .run_task(input, model, outputs)?;

  info!(
    "共处理 {} 帧，跳过 {} 帧",
    summary.processed, summary.skipped
  );

  Ok(())
}
