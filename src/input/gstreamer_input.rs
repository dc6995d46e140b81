// 该文件是 Chewei （车位） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持的地址：
//!
//! - 网络流或视频文件：`rtsp://…`、`http://…/stream.mp4`、`file:///video.mp4`，
//!   统一交给 `uridecodebin` 解码
//! - V4L2 摄像头：`gst://camera/dev/video0?width=1280&height=720&fps=15`
//! - 本地文件（显式 demux）：`gst://file/path/to/video.mp4`
//!
//! 输出统一转换为 RGB，分辨率取自第一帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::{collections::HashMap, time::Instant};

use crate::{
  FromUrl,
  frame::{Frame, Resolution},
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// `gst://` 地址的主机部分既不是 camera 也不是 file
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 打开后没有拿到任何一帧
  #[error("输入流没有产生任何帧")]
  NoFrames,
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";
const PULL_TIMEOUT_MS: u64 = 500;

pub enum GStreamerInputBuilderItem {
  UriSource(String),
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::UriSource(uri) => {
        format!("uridecodebin uri=\"{}\"", uri)
      }
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let camera = path.to_string();
    let io_mode = query.get("io-mode").and_then(|v| v.parse::<u32>().ok());
    let format = query
      .get("format")
      .map(String::from)
      .unwrap_or(String::from("YUY2"));
    let width = query
      .get("width")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(1280);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(720);
    let fps = query
      .get("fps")
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(15);

    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      }],
    }
  }

  fn build_file_pipeline(path: &str) -> Self {
    let path = urlencoding::decode(path)
      .map(|p| p.into_owned())
      .unwrap_or_else(|_| path.to_string());
    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::FileSource(path)],
    }
  }

  fn build_uri_pipeline(url: &Url) -> Self {
    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::UriSource(url.to_string())],
    }
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      resolution: Resolution::new(0, 0),
      pending: None,
      next_index: 0,
      released: false,
    };

    // 分辨率以第一帧为准，该帧留待迭代时返回
    let first = match input.pull_frame() {
      Some(Ok(frame)) => frame,
      Some(Err(e)) => {
        input.release();
        return Err(e);
      }
      None => {
        input.release();
        return Err(GStreamerInputError::NoFrames);
      }
    };
    input.resolution = first.resolution();
    input.pending = Some(first);
    info!("GStreamer 输入已打开: {}", input.resolution);

    Ok(input)
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let mut builder = if url.scheme() == GSTREAMER_INPUT_SCHEME {
      let query: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (String::from(k), String::from(v)))
        .collect();

      match url.host_str() {
        Some("camera") => Self::build_camera_pipeline(url.path(), &query),
        Some("file") => Self::build_file_pipeline(url.path()),
        _ => {
          error!("不支持的 gst 地址: {}", url);
          return Err(GStreamerInputError::SchemeMismatch);
        }
      }
    } else {
      Self::build_uri_pipeline(url)
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，逐帧产出 RGB 图像。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  resolution: Resolution,
  pending: Option<Frame>,
  next_index: u64,
  released: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.release();
  }
}

impl GStreamerInput {
  pub fn resolution(&self) -> Resolution {
    self.resolution
  }

  pub fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.pending = None;
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }

  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }

  /// `None` 表示输入流正常结束
  ///
  /// 等待期间定期检查总线，管道出错时不会一直阻塞。
  fn pull_frame(&mut self) -> Option<Result<Frame, GStreamerInputError>> {
    loop {
      let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS);
      if let Some(sample) = self.appsink.try_pull_sample(timeout) {
        let captured_at = Instant::now();
        let result = convert_sample_to_rgb(&sample).map(|image| {
          let frame = Frame::new(image, self.next_index, captured_at);
          self.next_index += 1;
          frame
        });
        return Some(result);
      }

      if self.appsink.is_eos() {
        info!("GStreamer 输入流结束");
        return None;
      }

      if let Some(message) = self.bus_error() {
        error!("GStreamer 管道错误: {}", message);
        return Some(Err(GStreamerInputError::PipelineError(message)));
      }
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(frame) = self.pending.take() {
      return Some(Ok(frame));
    }
    if self.released {
      return None;
    }
    self.pull_frame()
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;
  let row_len = width as usize * 3;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // 每行可能带有对齐填充
  let expected_size = stride * (height as usize).saturating_sub(1) + row_len;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_len * height as usize);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for row in data.chunks(stride).take(height as usize) {
        for bgr in row[..row_len].chunks_exact(3) {
          pixels.extend_from_slice(&[bgr[2], bgr[1], bgr[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  let actual = pixels.len();
  RgbImage::from_raw(width, height, pixels).ok_or(GStreamerInputError::BufferSizeMismatch {
    expected: row_len * height as usize,
    actual,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn network_uri_goes_through_uridecodebin() {
    let url = Url::parse("rtsp://192.168.1.10:8554/parking").unwrap();
    let description = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .description();
    assert_eq!(
      description,
      "uridecodebin uri=\"rtsp://192.168.1.10:8554/parking\" ! \
       videoconvert ! video/x-raw,format=RGB ! \
       appsink max-buffers=2 drop=true name=sink"
    );
  }

  #[test]
  fn camera_uri_builds_v4l2_pipeline() {
    let url = Url::parse("gst://camera/dev/video0?width=640&height=480&fps=30&io-mode=4").unwrap();
    let description = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .description();
    assert!(description.starts_with(
      "v4l2src device=/dev/video0 io-mode=4 ! video/x-raw,format=YUY2,width=640,height=480,framerate=30/1"
    ));
    assert!(description.contains("videoconvert ! video/x-raw,format=RGB"));
  }

  #[test]
  fn file_uri_decodes_path() {
    let url = Url::parse("gst://file/videos/parking%20lot.mp4").unwrap();
    let description = GStreamerInputPipelineBuilder::from_url(&url)
      .unwrap()
      .description();
    assert!(description.starts_with("filesrc location=\"/videos/parking lot.mp4\" ! decodebin"));
  }

  #[test]
  fn unknown_gst_host_is_rejected() {
    let url = Url::parse("gst://nowhere/x").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
