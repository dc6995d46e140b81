// 该文件是 Chewei （车位） 项目的一部分。
// src/task.rs - 处理任务
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
  fmt,
  path::PathBuf,
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::Resolution,
  input::{InputError, InputSource},
  model::{Model, ModelError, OccupancyModel, OccupancyReport},
  output::{OutputError, OutputSink, draw::Annotator},
  sampler::{FrameSampler, SampleDecision},
};

/// 中断后强制退出前的等待时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("模型错误: {0}")]
  Model(#[from] ModelError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("输入分辨率由 {expected} 变为 {actual}")]
  ResolutionChanged {
    expected: Resolution,
    actual: Resolution,
  },
  #[error("没有输入帧")]
  NoFrame,
  #[error("保存图像失败 {path}: {source}")]
  SaveImage {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("无法设置中断处理: {0}")]
  SignalHandler(#[from] ctrlc::Error),
}

/// 处理循环的正常结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskExit {
  EndOfStream,
  Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSummary {
  pub exit: TaskExit,
  pub processed: u64,
  pub skipped: u64,
}

/// 循环的全部可变状态
#[derive(Debug)]
pub struct LoopState {
  pub sampler: FrameSampler,
  pub processed: u64,
  pub skipped: u64,
}

impl LoopState {
  pub fn new(target_fps: u32, started_at: Instant) -> Self {
    Self {
      sampler: FrameSampler::new(target_fps, started_at),
      processed: 0,
      skipped: 0,
    }
  }
}

/// 每个处理过的帧输出一行状态
///
/// `2026-03-01 08:30:05 [# #] 02/03 0.012345        7 processed 42 skipped`
pub struct StatusLine<'a> {
  pub timestamp: DateTime<Local>,
  pub report: &'a OccupancyReport,
  pub elapsed: Duration,
  pub processed: u64,
  pub skipped: u64,
}

impl fmt::Display for StatusLine<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} [{}] {:02}/{:02} {:8.6} {:8} processed {} skipped",
      self.timestamp.format("%Y-%m-%d %H:%M:%S"),
      self.report.glyphs(),
      self.report.occupied_count(),
      self.report.total(),
      self.elapsed.as_secs_f64(),
      self.processed,
      self.skipped
    )
  }
}

/// 安装 Ctrl-C 处理：只向通道发信号，由循环在帧之间检查
///
/// 若 30 秒后循环仍未退出（例如阻塞在读帧上），强制结束进程。
pub fn install_interrupt_handler() -> Result<Receiver<()>, TaskError> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_AFTER);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}

pub struct ContinuousTask {
  fps: u32,
  frame_number: Option<u64>,
  stop: Option<Receiver<()>>,
  annotator: Annotator,
  started_at: Option<Instant>,
}

impl ContinuousTask {
  pub fn new(fps: u32) -> Self {
    Self {
      fps,
      frame_number: None,
      stop: None,
      annotator: Annotator::with_font(None),
      started_at: None,
    }
  }

  /// 处理指定帧数后结束
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  /// 采样器的起始时刻，默认为开始运行的时刻
  pub fn started_at(mut self, started_at: Instant) -> Self {
    self.started_at = Some(started_at);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .stop
      .as_ref()
      .is_some_and(|stop| stop.try_recv().is_ok())
  }

  fn run_loop<I: InputSource, O: OutputSink>(
    &self,
    input: &mut I,
    model: &OccupancyModel,
    output: &mut O,
    resolution: Resolution,
    state: &mut LoopState,
  ) -> Result<TaskExit, TaskError> {
    model.check_resolution(resolution)?;

    loop {
      if self.interrupted() {
        return Ok(TaskExit::Interrupted);
      }

      let Some(next) = input.next() else {
        return Ok(TaskExit::EndOfStream);
      };
      let frame = next?;

      let actual = frame.resolution();
      if actual != resolution {
        return Err(TaskError::ResolutionChanged {
          expected: resolution,
          actual,
        });
      }

      if state.sampler.decide(frame.captured_at) == SampleDecision::Skip {
        state.skipped += 1;
        continue;
      }

      let now = Instant::now();
      let report = model.infer(&frame.image)?;
      let mut image = frame.image;
      self.annotator.annotate(&mut image, model.spots(), &report);
      output.write_frame(state.processed, &image)?;
      state.processed += 1;

      info!(
        "{}",
        StatusLine {
          timestamp: Local::now(),
          report: &report,
          elapsed: now.elapsed(),
          processed: state.processed,
          skipped: state.skipped,
        }
      );

      if self.frame_number.is_some_and(|n| state.processed >= n) {
        info!("达到指定帧数 {}, 退出任务循环", state.processed);
        return Ok(TaskExit::EndOfStream);
      }
    }
  }
}

impl<I: InputSource, O: OutputSink> Task<I, OccupancyModel, O> for ContinuousTask {
  type Output = TaskSummary;
  type Error = TaskError;

  fn run_task(self, mut input: I, model: OccupancyModel, mut output: O) -> Result<TaskSummary, TaskError> {
    info!("开始任务...");
    let resolution = input.resolution();
    let mut state = LoopState::new(self.fps, self.started_at.unwrap_or_else(Instant::now));

    let outcome = self.run_loop(&mut input, &model, &mut output, resolution, &mut state);

    match &outcome {
      Ok(TaskExit::EndOfStream) => info!("Stream ended"),
      Ok(TaskExit::Interrupted) => warn!("User requested exit"),
      Err(e) => error!("Error code raise: {}", e),
    }

    info!("Releasing input stream...");
    input.release();
    info!("Releasing input stream...done");

    info!("Releasing output stream...");
    let closed = output.close();
    info!("Releasing output stream...done");

    let exit = match (outcome, closed) {
      (Err(e), _) => return Err(e),
      (Ok(_), Err(e)) => return Err(e.into()),
      (Ok(exit), Ok(())) => exit,
    };

    let summary = TaskSummary {
      exit,
      processed: state.processed,
      skipped: state.skipped,
    };
    info!(
      "任务完成: {:?}, 处理 {} 帧, 跳过 {} 帧",
      summary.exit, summary.processed, summary.skipped
    );
    Ok(summary)
  }
}

/// 只处理一帧，用于标定车位阈值
pub struct OneShotTask {
  annotator: Annotator,
  activity: Option<PathBuf>,
}

impl OneShotTask {
  pub fn new(annotator: Annotator) -> Self {
    Self {
      annotator,
      activity: None,
    }
  }

  /// 同时保存二值化后的活动图像
  pub fn with_activity_output(mut self, activity: Option<PathBuf>) -> Self {
    self.activity = activity;
    self
  }
}

impl<I: InputSource, O: OutputSink> Task<I, OccupancyModel, O> for OneShotTask {
  type Output = OccupancyReport;
  type Error = TaskError;

  fn run_task(self, mut input: I, model: OccupancyModel, mut output: O) -> Result<OccupancyReport, TaskError> {
    info!("开始任务...");
    let result = one_shot(&self, &mut input, &model, &mut output);
    input.release();
    let closed = output.close();

    let report = result?;
    closed?;
    Ok(report)
  }
}

fn one_shot<I: InputSource, O: OutputSink>(
  task: &OneShotTask,
  input: &mut I,
  model: &OccupancyModel,
  output: &mut O,
) -> Result<OccupancyReport, TaskError> {
  model.check_resolution(input.resolution())?;

  let frame = input.next().ok_or(TaskError::NoFrame)??;
  info!("输入帧获取成功，开始处理...");

  let now = Instant::now();
  let activity = model.preprocess(&frame.image);
  let report = model.classify(&activity)?;
  info!("处理完成，耗时: {:.2?}", now.elapsed());

  for (spot, result) in model.spots().iter().zip(&report.results) {
    info!(
      "车位 {:2}: 前景像素 {:6} / 阈值 {:6} -> {}",
      spot.index(),
      result.count,
      spot.threshold(),
      if result.occupied { "占用" } else { "空闲" }
    );
  }

  let mut image = frame.image;
  task.annotator.annotate(&mut image, model.spots(), &report);
  output.write_frame(0, &image)?;

  if let Some(path) = &task.activity {
    activity
      .as_image()
      .save(path)
      .map_err(|source| TaskError::SaveImage {
        path: path.clone(),
        source,
      })?;
    info!("活动图像已保存: {}", path.display());
  }

  Ok(report)
}
