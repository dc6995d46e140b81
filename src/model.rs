// 该文件是 Chewei （车位） 项目的一部分。
// src/model.rs - 占用判定模型
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

use crate::frame::{ActivityFrame, Resolution};

pub mod occupancy;
pub mod preprocess;
pub mod spot;

pub use self::occupancy::{OccupancyClassifier, OccupancyResult};
pub use self::preprocess::{AdaptiveMethod, FramePreprocessor, PreprocessSettings};
pub use self::spot::{BoundingRect, MAX_COORDINATE, Point, Spot, SpotError, SpotMask};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("车位 {spot} 的区域 {rect} 超出画面 {resolution}")]
  SpotOutOfFrame {
    spot: usize,
    rect: BoundingRect,
    resolution: Resolution,
  },
}

/// 一帧上所有车位的判定结果，按配置顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyReport {
  pub results: Vec<OccupancyResult>,
}

impl OccupancyReport {
  pub fn occupied_count(&self) -> usize {
    self.results.iter().filter(|r| r.occupied).count()
  }

  pub fn total(&self) -> usize {
    self.results.len()
  }

  /// 每个车位一个字符：`#` 占用，空格空闲
  pub fn glyphs(&self) -> String {
    self.results.iter().map(OccupancyResult::glyph).collect()
  }
}

/// 预处理 + 车位掩码 + 阈值判定
///
/// 车位掩码只依赖配置，在构造时计算一次并在整个运行期间复用。
#[derive(Debug, Clone)]
pub struct OccupancyModel {
  spots: Vec<Spot>,
  masks: Vec<SpotMask>,
  preprocessor: FramePreprocessor,
  classifier: OccupancyClassifier,
}

impl OccupancyModel {
  pub fn new(spots: Vec<Spot>, preprocessor: FramePreprocessor) -> Self {
    let masks = spots.iter().map(SpotMask::build).collect();
    Self {
      spots,
      masks,
      preprocessor,
      classifier: OccupancyClassifier,
    }
  }

  /// 先确认所有车位都在画面内，再构建掩码
  pub fn try_new(
    spots: Vec<Spot>,
    preprocessor: FramePreprocessor,
    resolution: Resolution,
  ) -> Result<Self, ModelError> {
    for spot in &spots {
      let rect = spot.bounding_rect();
      if !rect.fits_in(resolution) {
        return Err(ModelError::SpotOutOfFrame {
          spot: spot.index(),
          rect,
          resolution,
        });
      }
    }
    Ok(Self::new(spots, preprocessor))
  }

  pub fn spots(&self) -> &[Spot] {
    &self.spots
  }

  pub fn masks(&self) -> &[SpotMask] {
    &self.masks
  }

  /// 检查所有车位都位于给定分辨率的画面内
  pub fn check_resolution(&self, resolution: Resolution) -> Result<(), ModelError> {
    for (spot, mask) in self.spots.iter().zip(&self.masks) {
      if !mask.rect().fits_in(resolution) {
        return Err(ModelError::SpotOutOfFrame {
          spot: spot.index(),
          rect: mask.rect(),
          resolution,
        });
      }
    }
    Ok(())
  }

  pub fn preprocess(&self, image: &RgbImage) -> ActivityFrame {
    self.preprocessor.process(image)
  }

  pub fn classify(&self, activity: &ActivityFrame) -> Result<OccupancyReport, ModelError> {
    let results = self
      .spots
      .iter()
      .zip(&self.masks)
      .map(|(spot, mask)| self.classifier.classify(activity, spot, mask))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(OccupancyReport { results })
  }
}

impl Model for OccupancyModel {
  type Input = RgbImage;
  type Output = OccupancyReport;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let activity = self.preprocess(input);
    self.classify(&activity)
  }
}
