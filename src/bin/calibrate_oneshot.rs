// 该文件是 Chewei （车位） 项目的一部分。
// src/bin/calibrate_oneshot.rs - 单帧标定工具
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
  output::{ImageFileOutput, draw::Annotator},
  task::{OneShotTask, Task},
};

/// 读取一帧并输出每个车位的前景像素计数，用于确定阈值
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径
  #[arg(long, value_name = "CONFIG", default_value = "config.json")]
  pub config: PathBuf,
  /// 标注后的图像保存路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 二值化活动图像保存路径
  #[arg(long, value_name = "ACTIVITY")]
  pub activity: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("配置文件: {}", args.config.display());
  info!("输出路径: {}", args.output.display());

  let config = Config::load(&args.config)?;
  let input = InputWrapper::open(&config.stream)?;
  let model = OccupancyModel::try_new(
    config.spots.clone(),
    FramePreprocessor::new(config.preprocess),
    input.resolution(),
  )?;
  let output = ImageFileOutput::new(args.output);

  let report = OneShotTask::new(Annotator::load(config.font.as_deref()))
    .with_activity_output(args.activity)
    .run_task(input, model, output)?;

  info!(
    "占用 {:02}/{:02} [{}]",
    report.occupied_count(),
    report.total(),
    report.glyphs()
  );

  Ok(())
}
