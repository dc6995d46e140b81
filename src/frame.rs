// 该文件是 Chewei （车位） 项目的一部分。
// src/frame.rs - 视频帧与二值活动帧定义
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

use std::{fmt, time::Instant};

use image::{GrayImage, RgbImage};

/// 二值图像中前景像素的取值
pub const FOREGROUND: u8 = 255;

/// 视频分辨率，在打开输入流时确定，整个运行期间不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
  pub width: u32,
  pub height: u32,
}

impl Resolution {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn of(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self { width, height }
  }

  /// RGB24 原始帧的字节数
  pub fn rgb_frame_len(&self) -> usize {
    self.width as usize * self.height as usize * 3
  }
}

impl fmt::Display for Resolution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 采集到的一帧彩色图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（从 0 开始，按采集顺序递增）
  pub index: u64,
  /// 采集时刻
  pub captured_at: Instant,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, captured_at: Instant) -> Self {
    Self {
      image,
      index,
      captured_at,
    }
  }

  pub fn resolution(&self) -> Resolution {
    Resolution::of(&self.image)
  }
}

/// 预处理后的单通道二值活动帧，前景为 [`FOREGROUND`]，背景为 0
#[derive(Debug, Clone)]
pub struct ActivityFrame {
  image: GrayImage,
}

impl ActivityFrame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn is_foreground(&self, x: u32, y: u32) -> bool {
    self.image.get_pixel(x, y).0[0] != 0
  }

  pub fn foreground_count(&self) -> usize {
    self.image.as_raw().iter().filter(|&&v| v != 0).count()
  }

  pub fn as_image(&self) -> &GrayImage {
    &self.image
  }

  pub fn into_image(self) -> GrayImage {
    self.image
  }
}

impl From<GrayImage> for ActivityFrame {
  /// 任意非零像素视为前景，并统一为 [`FOREGROUND`]
  fn from(mut image: GrayImage) -> Self {
    for value in image.iter_mut() {
      if *value != 0 {
        *value = FOREGROUND;
      }
    }
    Self { image }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn activity_frame_normalises_foreground() {
    let mut image = GrayImage::new(4, 2);
    image.put_pixel(1, 0, image::Luma([7]));
    image.put_pixel(3, 1, image::Luma([255]));

    let activity = ActivityFrame::from(image);

    assert_eq!(activity.foreground_count(), 2);
    assert!(activity.is_foreground(1, 0));
    assert_eq!(activity.as_image().get_pixel(1, 0).0[0], FOREGROUND);
    assert!(!activity.is_foreground(0, 0));
  }

  #[test]
  fn resolution_display_and_frame_len() {
    let resolution = Resolution::new(640, 480);
    assert_eq!(resolution.to_string(), "640x480");
    assert_eq!(resolution.rgb_frame_len(), 640 * 480 * 3);
  }
}
