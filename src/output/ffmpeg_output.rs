// 该文件是 Chewei （车位） 项目的一部分。
// src/output/ffmpeg_output.rs - 通过 ffmpeg 子进程转推
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
  io::Write,
  process::{Child, ChildStdin, Command, ExitStatus, Stdio},
};

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::frame::Resolution;

const FFMPEG_PROGRAM: &str = "ffmpeg";

#[derive(Error, Debug)]
pub enum FfmpegOutputError {
  #[error("无法启动 ffmpeg: {0}")]
  SpawnError(std::io::Error),
  #[error("写入 ffmpeg 失败: {0}")]
  WriteError(std::io::Error),
  #[error("帧尺寸不匹配: 期望 {expected}, 实际 {actual}")]
  FrameSizeMismatch {
    expected: Resolution,
    actual: Resolution,
  },
  #[error("ffmpeg 已关闭")]
  Closed,
  #[error("ffmpeg 异常退出: {0}")]
  ExitError(ExitStatus),
}

/// 把原始 RGB 帧写入 ffmpeg 标准输入，由 ffmpeg 编码并推流
pub struct FfmpegOutput {
  child: Child,
  stdin: Option<ChildStdin>,
  resolution: Resolution,
  frames: u64,
}

/// 容器格式由目标地址的 scheme 决定
pub fn ffmpeg_args(url: &Url, resolution: Resolution, fps: u32) -> Vec<String> {
  let mut args: Vec<String> = [
    "-hide_banner",
    "-v",
    "error",
    "-re",
    "-f",
    "rawvideo",
    "-pix_fmt",
    "rgb24",
    "-s",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect();
  args.push(resolution.to_string());
  args.push("-r".to_string());
  args.push(fps.to_string());
  args.extend(
    [
      "-i", "-", "-c:v", "libx264", "-preset", "veryfast", "-tune", "zerolatency",
    ]
    .iter()
    .map(|s| s.to_string()),
  );

  match url.scheme() {
    "rtsp" | "rtsps" => args.extend(["-f", "rtsp", "-rtsp_transport", "tcp"].map(String::from)),
    "rtmp" | "rtmps" => args.extend(["-f", "flv"].map(String::from)),
    _ => args.extend(["-f", "mpegts"].map(String::from)),
  }
  args.push(url.to_string());
  args
}

impl FfmpegOutput {
  pub fn spawn(url: &Url, resolution: Resolution, fps: u32) -> Result<Self, FfmpegOutputError> {
    let args = ffmpeg_args(url, resolution, fps);
    info!("启动 ffmpeg: {} {}", FFMPEG_PROGRAM, args.join(" "));

    let mut command = Command::new(FFMPEG_PROGRAM);
    command.args(&args);
    Self::spawn_command(command, resolution)
  }

  /// 启动子进程，并通过其标准输入写入帧
  fn spawn_command(mut command: Command, resolution: Resolution) -> Result<Self, FfmpegOutputError> {
    let mut child = command
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .spawn()
      .map_err(FfmpegOutputError::SpawnError)?;
    let stdin = child.stdin.take();

    Ok(Self {
      child,
      stdin,
      resolution,
      frames: 0,
    })
  }

  pub fn write_frame(&mut self, _sequence: u64, image: &RgbImage) -> Result<(), FfmpegOutputError> {
    let actual = Resolution::of(image);
    if actual != self.resolution {
      return Err(FfmpegOutputError::FrameSizeMismatch {
        expected: self.resolution,
        actual,
      });
    }

    let stdin = self.stdin.as_mut().ok_or(FfmpegOutputError::Closed)?;
    stdin
      .write_all(image.as_raw())
      .map_err(FfmpegOutputError::WriteError)?;
    self.frames += 1;
    Ok(())
  }

  pub fn close(&mut self) -> Result<(), FfmpegOutputError> {
    let Some(stdin) = self.stdin.take() else {
      return Ok(());
    };
    drop(stdin);

    info!("等待 ffmpeg 退出...");
    let status = self.child.wait().map_err(FfmpegOutputError::WriteError)?;
    info!("ffmpeg 转推结束，共写入 {} 帧", self.frames);
    if status.success() {
      Ok(())
    } else {
      Err(FfmpegOutputError::ExitError(status))
    }
  }
}

impl Drop for FfmpegOutput {
  fn drop(&mut self) {
    if self.stdin.take().is_some() {
      warn!("ffmpeg 输出未正常关闭，终止子进程");
      let _ = self.child.kill();
      let _ = self.child.wait();
    }
  }
}
