// 该文件是 Chewei （车位） 项目的一部分。
// src/model/occupancy.rs - 车位占用判定
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

use image::{GenericImageView, imageops};

use crate::{
  frame::{ActivityFrame, Resolution},
  model::{
    ModelError,
    spot::{Spot, SpotMask},
  },
};

/// 单个车位在一帧上的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyResult {
  /// 车位序号
  pub spot: usize,
  /// 掩码内的前景像素数
  pub count: u32,
  pub occupied: bool,
}

impl OccupancyResult {
  pub fn glyph(&self) -> char {
    if self.occupied { '#' } else { ' ' }
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OccupancyClassifier;

impl OccupancyClassifier {
  /// 前景像素数达到阈值（含）即为占用
  pub fn is_occupied(count: u32, threshold: u32) -> bool {
    count >= threshold
  }

  /// 裁剪到掩码矩形后与掩码按位与，统计前景像素
  pub fn masked_count(
    &self,
    activity: &ActivityFrame,
    spot: &Spot,
    mask: &SpotMask,
  ) -> Result<u32, ModelError> {
    let rect = mask.rect();
    let resolution = Resolution::new(activity.width(), activity.height());
    if !rect.fits_in(resolution) {
      return Err(ModelError::SpotOutOfFrame {
        spot: spot.index(),
        rect,
        resolution,
      });
    }

    let crop = imageops::crop_imm(activity.as_image(), rect.x, rect.y, rect.width, rect.height);
    let count = crop
      .pixels()
      .filter(|(x, y, pixel)| pixel.0[0] != 0 && mask.contains(*x, *y))
      .count();

    Ok(count as u32)
  }

  pub fn classify(
    &self,
    activity: &ActivityFrame,
    spot: &Spot,
    mask: &SpotMask,
  ) -> Result<OccupancyResult, ModelError> {
    let count = self.masked_count(activity, spot, mask)?;
    Ok(OccupancyResult {
      spot: spot.index(),
      count,
      occupied: Self::is_occupied(count, spot.threshold()),
    })
  }
}
