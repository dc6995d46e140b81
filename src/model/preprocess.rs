// 该文件是 Chewei （车位） 项目的一部分。
// src/model/preprocess.rs - 帧预处理（灰度、自适应二值化、中值滤波、膨胀）
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

//! # 帧预处理
//!
//! 把彩色帧转换为二值“活动”图像：停放的车辆带来的边缘、阴影与纹理
//! 成为前景，平整路面成为背景。流程依次为：
//!
//! 1. 灰度化（亮度通道）
//! 2. 自适应阈值：像素不高于邻域均值减去偏置时记为前景（反相二值化）
//! 3. 中值滤波去除孤立噪点
//! 4. 方形结构元膨胀，将零散的前景连成块

use image::{GrayImage, Luma, RgbImage, imageops};
use imageproc::{
  distance_transform::Norm,
  filter::{box_filter, median_filter, separable_filter_equal},
  morphology::dilate,
};
use serde::Deserialize;

use crate::frame::{ActivityFrame, FOREGROUND};

pub const DEFAULT_BLOCK_SIZE: u32 = 25;
pub const DEFAULT_BIAS: i32 = 16;
pub const DEFAULT_MEDIAN_KERNEL: u32 = 5;
pub const DEFAULT_DILATE_RADIUS: u8 = 1;

/// 自适应阈值所用的邻域统计量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveMethod {
  /// 方形邻域均值
  #[default]
  Mean,
  /// 高斯加权邻域均值
  Gaussian,
}

/// 预处理参数
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
  pub method: AdaptiveMethod,
  /// 邻域边长（奇数）
  pub block_size: u32,
  /// 从邻域均值中减去的偏置
  pub bias: i32,
  /// 中值滤波核边长（奇数）
  pub median_kernel: u32,
  /// 膨胀半径，1 对应 3x3 方形结构元，0 表示不膨胀
  pub dilate_radius: u8,
}

impl Default for PreprocessSettings {
  fn default() -> Self {
    Self {
      method: AdaptiveMethod::Mean,
      block_size: DEFAULT_BLOCK_SIZE,
      bias: DEFAULT_BIAS,
      median_kernel: DEFAULT_MEDIAN_KERNEL,
      dilate_radius: DEFAULT_DILATE_RADIUS,
    }
  }
}

impl PreprocessSettings {
  fn block_radius(&self) -> u32 {
    self.block_size / 2
  }

  fn median_radius(&self) -> u32 {
    self.median_kernel / 2
  }

  /// 与 OpenCV 由核尺寸推导的高斯 sigma 相同
  fn gaussian_sigma(&self) -> f32 {
    0.3 * ((self.block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
  }

  /// 长度为 `block_size` 的归一化一维高斯核
  fn gaussian_kernel(&self) -> Vec<f32> {
    let sigma = self.gaussian_sigma();
    let radius = self.block_radius() as i32;
    let weights: Vec<f32> = (-radius..=radius)
      .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
      .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
  }
}

#[derive(Debug, Clone, Default)]
pub struct FramePreprocessor {
  settings: PreprocessSettings,
}

impl FramePreprocessor {
  pub fn new(settings: PreprocessSettings) -> Self {
    Self { settings }
  }

  pub fn settings(&self) -> &PreprocessSettings {
    &self.settings
  }

  pub fn process(&self, image: &RgbImage) -> ActivityFrame {
    let gray = imageops::grayscale(image);
    let binary = self.adaptive_threshold(&gray);

    let radius = self.settings.median_radius();
    let denoised = if radius > 0 {
      median_filter(&binary, radius, radius)
    } else {
      binary
    };

    let dilated = if self.settings.dilate_radius > 0 {
      dilate(&denoised, Norm::LInf, self.settings.dilate_radius)
    } else {
      denoised
    };

    ActivityFrame::from(dilated)
  }

  /// 反相自适应二值化：`pixel <= local_mean - bias` 的像素为前景
  pub fn adaptive_threshold(&self, gray: &GrayImage) -> GrayImage {
    let local = match self.settings.method {
      AdaptiveMethod::Mean => {
        let radius = self.settings.block_radius();
        box_filter(gray, radius, radius)
      }
      AdaptiveMethod::Gaussian => separable_filter_equal(gray, &self.settings.gaussian_kernel()),
    };

    let bias = self.settings.bias;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
      let pixel = gray.get_pixel(x, y).0[0] as i32;
      let mean = local.get_pixel(x, y).0[0] as i32;
      if pixel <= mean - bias {
        Luma([FOREGROUND])
      } else {
        Luma([0])
      }
    })
  }
}
