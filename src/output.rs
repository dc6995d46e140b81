// 该文件是 Chewei （车位） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  config::{Config, RestreamBackend},
  frame::Resolution,
};

/// 已标注帧的去向
pub trait OutputSink {
  fn write_frame(&mut self, sequence: u64, image: &RgbImage) -> Result<(), OutputError>;

  /// 结束输出并等待数据写完，重复调用无副作用
  fn close(&mut self) -> Result<(), OutputError>;
}

pub mod draw;

mod snapshot;
pub use self::snapshot::{ImageFileOutput, SnapshotError, SnapshotOutput, snapshot_path};

mod ffmpeg_output;
pub use self::ffmpeg_output::{FfmpegOutput, FfmpegOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_rtsp_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_rtsp_output::{GStreamerRestreamError, GStreamerRestreamOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存快照错误: {0}")]
  SnapshotError(#[from] SnapshotError),
  #[error("ffmpeg 转推错误: {0}")]
  FfmpegOutputError(#[from] FfmpegOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 转推错误: {0}")]
  GStreamerRestreamError(#[from] GStreamerRestreamError),
  #[error("无效的转推地址 '{0}': {1}")]
  InvalidUri(String, url::ParseError),
  #[error("转推后端 '{0}' 未编译")]
  BackendUnavailable(&'static str),
}

impl OutputError {
  /// 可恢复的错误只记录日志，不终止处理循环
  pub fn is_recoverable(&self) -> bool {
    matches!(self, OutputError::SnapshotError(_))
  }
}

pub enum OutputWrapper {
  Snapshot(SnapshotOutput),
  FfmpegRestream(FfmpegOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerRestream(GStreamerRestreamOutput),
}

impl OutputSink for OutputWrapper {
  fn write_frame(&mut self, sequence: u64, image: &RgbImage) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Snapshot(output) => output
        .write_frame(sequence, image)
        .map_err(OutputError::from),
      OutputWrapper::FfmpegRestream(output) => output
        .write_frame(sequence, image)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerRestream(output) => output
        .write_frame(sequence, image)
        .map_err(OutputError::from),
    }
  }

  fn close(&mut self) -> Result<(), OutputError> {
    match self {
      OutputWrapper::Snapshot(output) => output.close().map_err(OutputError::from),
      OutputWrapper::FfmpegRestream(output) => output.close().map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerRestream(output) => output.close().map_err(OutputError::from),
    }
  }
}

/// 依次写入多个输出
///
/// 可恢复的错误记录后继续写入其余输出；遇到第一个不可恢复的错误立即返回。
pub struct FanOut<O> {
  sinks: Vec<O>,
  closed: bool,
}

impl<O: OutputSink> FanOut<O> {
  pub fn new(sinks: Vec<O>) -> Self {
    Self {
      sinks,
      closed: false,
    }
  }

  pub fn len(&self) -> usize {
    self.sinks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sinks.is_empty()
  }
}

impl<O: OutputSink> OutputSink for FanOut<O> {
  fn write_frame(&mut self, sequence: u64, image: &RgbImage) -> Result<(), OutputError> {
    for sink in self.sinks.iter_mut() {
      match sink.write_frame(sequence, image) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => warn!("输出第 {} 帧失败，继续运行: {}", sequence, e),
        Err(e) => return Err(e),
      }
    }
    Ok(())
  }

  fn close(&mut self) -> Result<(), OutputError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    let mut first_error = None;
    for sink in self.sinks.iter_mut() {
      if let Err(e) = sink.close() {
        warn!("关闭输出失败: {}", e);
        first_error.get_or_insert(e);
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

/// 按配置建立全部输出；转推在此处一次性建立
pub fn create_outputs(
  config: &Config,
  resolution: Resolution,
) -> Result<FanOut<OutputWrapper>, OutputError> {
  let mut sinks = Vec::new();

  if let Some(dir) = &config.snapshot_dir {
    info!("快照目录: {}", dir.display());
    sinks.push(OutputWrapper::Snapshot(SnapshotOutput::new(dir.clone())));
  }

  if let Some(stream) = &config.output_stream {
    let url = Url::parse(stream).map_err(|e| OutputError::InvalidUri(stream.clone(), e))?;
    info!(
      "转推到 {} ({:?}, {} @ {} fps)",
      url, config.restream_backend, resolution, config.fps
    );
    let sink = match config.restream_backend {
      RestreamBackend::Ffmpeg => {
        OutputWrapper::FfmpegRestream(FfmpegOutput::spawn(&url, resolution, config.fps)?)
      }
      RestreamBackend::Gstreamer => open_gstreamer_restream(&url, resolution, config.fps)?,
    };
    sinks.push(sink);
  }

  Ok(FanOut::new(sinks))
}

#[cfg(feature = "gstreamer_output")]
fn open_gstreamer_restream(
  url: &Url,
  resolution: Resolution,
  fps: u32,
) -> Result<OutputWrapper, OutputError> {
  let output = GStreamerRestreamOutput::open(url, resolution, fps)?;
  Ok(OutputWrapper::GStreamerRestream(output))
}

#[cfg(not(feature = "gstreamer_output"))]
fn open_gstreamer_restream(
  url: &Url,
  _resolution: Resolution,
  _fps: u32,
) -> Result<OutputWrapper, OutputError> {
  tracing::error!(
    "未启用 gstreamer_output 特性，无法转推到 '{}'，请改用 ffmpeg 后端",
    url
  );
  Err(OutputError::BackendUnavailable("gstreamer"))
}
