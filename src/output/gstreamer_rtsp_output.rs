// 该文件是 Chewei （车位） 项目的一部分。
// src/output/gstreamer_rtsp_output.rs - GStreamer 转推输出
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

//! 通过 appsrc 把标注后的帧编码为 H.264 并推送到流媒体服务器。
//!
//! | scheme | 管道尾部 |
//! |---|---|
//! | `rtsp`、`rtsps` | `rtspclientsink protocols=tcp` |
//! | `rtmp`、`rtmps` | `flvmux ! rtmpsink` |
//! | `srt` | `mpegtsmux ! srtsink` |

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use crate::frame::Resolution;

/// 关闭时等待管道排空的最长时间
const DRAIN_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum GStreamerRestreamError {
  #[error("不支持的转推协议: {0}")]
  SchemeMismatch(String),
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧尺寸不匹配: 期望 {expected}, 实际 {actual}")]
  FrameSizeMismatch {
    expected: Resolution,
    actual: Resolution,
  },
}

pub fn restream_pipeline_description(url: &Url) -> Result<String, GStreamerRestreamError> {
  let encoder = "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! \
                 x264enc speed-preset=veryfast tune=zerolatency ! h264parse";
  let sink = match url.scheme() {
    "rtsp" | "rtsps" => format!("rtspclientsink location=\"{}\" protocols=tcp", url),
    "rtmp" | "rtmps" => format!("flvmux streamable=true ! rtmpsink location=\"{}\"", url),
    "srt" => format!("mpegtsmux ! srtsink uri=\"{}\"", url),
    other => return Err(GStreamerRestreamError::SchemeMismatch(other.to_string())),
  };
  Ok(format!("{} ! {}", encoder, sink))
}

/// 帧尺寸必须与管道协商时的分辨率一致
fn check_frame_size(expected: Resolution, image: &RgbImage) -> Result<(), GStreamerRestreamError> {
  let actual = Resolution::of(image);
  if actual != expected {
    return Err(GStreamerRestreamError::FrameSizeMismatch { expected, actual });
  }
  Ok(())
}

/// 把紧密排列的行复制到按 `stride` 对齐的缓冲区，行尾补零
fn pack_rows(data: &[u8], row_len: usize, stride: usize) -> Vec<u8> {
  if row_len == 0 || stride == row_len {
    return data.to_vec();
  }
  let rows = data.len() / row_len;
  let mut packed = vec![0u8; rows * stride];
  for (src, dst) in data.chunks_exact(row_len).zip(packed.chunks_exact_mut(stride)) {
    dst[..row_len].copy_from_slice(src);
  }
  packed
}

pub struct GStreamerRestreamOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  resolution: Resolution,
  stride: usize,
  fps: u32,
  frame_count: u64,
  closed: bool,
}

impl GStreamerRestreamOutput {
  pub fn open(url: &Url, resolution: Resolution, fps: u32) -> Result<Self, GStreamerRestreamError> {
    let pipeline_desc = restream_pipeline_description(url)?;

    gst::init()?;
    info!("Creating restream pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerRestreamError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerRestreamError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerRestreamError::AppSrcConversionFailed)?;

    let fps = fps.max(1);
    // RGB 行在 GStreamer 中按 4 字节对齐
    let video_info = gst_video::VideoInfo::builder(
      gst_video::VideoFormat::Rgb,
      resolution.width,
      resolution.height,
    )
    .fps(gst::Fraction::new(fps as i32, 1))
    .build()?;
    let stride = video_info.stride()[0] as usize;
    let caps = video_info.to_caps()?;

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_property("is-live", true);
    appsrc.set_property("block", true);

    pipeline.set_state(gst::State::Playing)?;

    info!("Restream output initialized: {} @ {} fps", resolution, fps);

    Ok(Self {
      pipeline,
      appsrc,
      resolution,
      stride,
      fps,
      frame_count: 0,
      closed: false,
    })
  }

  fn pending_error(&self) -> Option<String> {
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

  pub fn write_frame(&mut self, _sequence: u64, image: &RgbImage) -> Result<(), GStreamerRestreamError> {
    if self.closed {
      return Err(GStreamerRestreamError::PipelineError(
        "Restream output already closed".to_string(),
      ));
    }
    check_frame_size(self.resolution, image)?;
    if let Some(message) = self.pending_error() {
      error!("转推管道错误: {}", message);
      return Err(GStreamerRestreamError::PipelineError(message));
    }

    let frame_duration = 1_000_000_000 / self.fps as u64;
    let row_len = self.resolution.width as usize * 3;
    let mut buffer = gst::Buffer::from_slice(pack_rows(image.as_raw(), row_len, self.stride));
    {
      let buffer_ref = buffer.make_mut();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * frame_duration,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerRestreamError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }

  /// 发送 EOS 并等待管道排空，然后停止管道
  pub fn close(&mut self) -> Result<(), GStreamerRestreamError> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS to restream pipeline: {:?}", e);
    }

    let mut result = Ok(());
    if let Some(bus) = self.pipeline.bus() {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(DRAIN_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Eos(_)) => info!("转推管道已排空"),
        Some(gst::MessageView::Error(err)) => {
          error!("转推管道关闭时出错: {}", err.error());
          result = Err(GStreamerRestreamError::PipelineError(
            err.error().to_string(),
          ));
        }
        _ => warn!("等待转推管道排空超时 ({} 秒)", DRAIN_TIMEOUT_SECS),
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "Restream output closed. Total frames streamed: {}",
      self.frame_count
    );
    result
  }
}

impl Drop for GStreamerRestreamOutput {
  fn drop(&mut self) {
    if !self.closed
      && let Err(e) = self.pipeline.set_state(gst::State::Null)
    {
      warn!("Failed to stop GStreamer restream pipeline: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rtsp_pipeline_pushes_over_tcp() {
    let url = Url::parse("rtsp://localhost:8554/output_stream").unwrap();
    let desc = restream_pipeline_description(&url).unwrap();
    assert!(desc.starts_with("appsrc name=src ! videoconvert"));
    assert!(desc.contains("x264enc speed-preset=veryfast tune=zerolatency"));
    assert!(desc.ends_with(
      "rtspclientsink location=\"rtsp://localhost:8554/output_stream\" protocols=tcp"
    ));
  }

  #[test]
  fn rtmp_and_srt_pick_their_muxers() {
    let rtmp = restream_pipeline_description(&Url::parse("rtmp://live/app/key").unwrap()).unwrap();
    assert!(rtmp.contains("flvmux streamable=true ! rtmpsink"));

    let srt = restream_pipeline_description(&Url::parse("srt://127.0.0.1:9000").unwrap()).unwrap();
    assert!(srt.contains("mpegtsmux ! srtsink uri=\"srt://127.0.0.1:9000\""));
  }

  #[test]
  fn unsupported_scheme_is_rejected() {
    let err = restream_pipeline_description(&Url::parse("http://localhost/out").unwrap()).unwrap_err();
    assert!(matches!(err, GStreamerRestreamError::SchemeMismatch(s) if s == "http"));
  }

  #[test]
  fn narrow_rows_are_padded_to_stride() {
    // 3 像素宽：每行 9 字节，对齐后 12 字节
    let image = RgbImage::from_fn(3, 2, |x, y| image::Rgb([(y * 10 + x) as u8 + 1; 3]));
    let packed = pack_rows(image.as_raw(), 9, 12);

    assert_eq!(packed.len(), 24);
    assert_eq!(&packed[..9], &[1, 1, 1, 2, 2, 2, 3, 3, 3]);
    assert_eq!(&packed[9..12], &[0, 0, 0]);
    assert_eq!(&packed[12..21], &[11, 11, 11, 12, 12, 12, 13, 13, 13]);
    assert_eq!(&packed[21..], &[0, 0, 0]);
  }

  #[test]
  fn aligned_rows_are_copied_unchanged() {
    let image = RgbImage::from_pixel(4, 3, image::Rgb([7, 8, 9]));
    assert_eq!(pack_rows(image.as_raw(), 12, 12), image.as_raw().to_vec());
  }

  #[test]
  fn frame_of_another_size_is_rejected() {
    let expected = Resolution::new(64, 48);
    assert!(check_frame_size(expected, &RgbImage::new(64, 48)).is_ok());

    let err = check_frame_size(expected, &RgbImage::new(48, 64)).unwrap_err();
    match err {
      GStreamerRestreamError::FrameSizeMismatch { expected, actual } => {
        assert_eq!(expected, Resolution::new(64, 48));
        assert_eq!(actual, Resolution::new(48, 64));
      }
      other => panic!("unexpected error: {other}"),
    }
  }
}
