// 该文件是 Chewei （车位） 项目的一部分。
// src/model/spot.rs - 车位多边形与掩码
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

use std::fmt;

use image::{GrayImage, Luma};
use imageproc::{drawing::draw_polygon_mut, point::Point as ImagePoint};
use thiserror::Error;

use crate::frame::{FOREGROUND, Resolution};

/// 多边形坐标上限，超过任何实际相机分辨率
pub const MAX_COORDINATE: i32 = u16::MAX as i32;

/// 帧坐标系中的整数点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }
}

impl From<[i32; 2]> for Point {
  fn from([x, y]: [i32; 2]) -> Self {
    Self { x, y }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SpotError {
  #[error("车位多边形至少需要 3 个不同的点，实际 {0} 个")]
  TooFewPoints(usize),
  #[error("车位多边形坐标不能为负: ({x}, {y})")]
  NegativeCoordinate { x: i32, y: i32 },
  #[error("车位多边形坐标超出上限 {max}: ({x}, {y})", max = MAX_COORDINATE)]
  CoordinateTooLarge { x: i32, y: i32 },
}

/// 一个配置好的车位：多边形与占用阈值
///
/// 车位的身份就是它在配置中的序号。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spot {
  index: usize,
  polygon: Vec<Point>,
  threshold: u32,
}

impl Spot {
  /// 创建车位。首尾重复的闭合点会被去掉，相邻重复点会被合并。
  pub fn new(index: usize, polygon: Vec<Point>, threshold: u32) -> Result<Self, SpotError> {
    let mut points: Vec<Point> = Vec::with_capacity(polygon.len());
    for point in polygon {
      if point.x < 0 || point.y < 0 {
        return Err(SpotError::NegativeCoordinate {
          x: point.x,
          y: point.y,
        });
      }
      if point.x > MAX_COORDINATE || point.y > MAX_COORDINATE {
        return Err(SpotError::CoordinateTooLarge {
          x: point.x,
          y: point.y,
        });
      }
      if points.last() != Some(&point) {
        points.push(point);
      }
    }
    while points.len() > 1 && points.first() == points.last() {
      points.pop();
    }

    let mut distinct = points.clone();
    distinct.sort_by_key(|p| (p.x, p.y));
    distinct.dedup();
    if distinct.len() < 3 {
      return Err(SpotError::TooFewPoints(distinct.len()));
    }

    Ok(Self {
      index,
      polygon: points,
      threshold,
    })
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn polygon(&self) -> &[Point] {
    &self.polygon
  }

  pub fn threshold(&self) -> u32 {
    self.threshold
  }

  /// 包围多边形的轴对齐矩形（含端点像素）
  pub fn bounding_rect(&self) -> BoundingRect {
    let min_x = self.polygon.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = self.polygon.iter().map(|p| p.x).max().unwrap_or(0);
    let min_y = self.polygon.iter().map(|p| p.y).min().unwrap_or(0);
    let max_y = self.polygon.iter().map(|p| p.y).max().unwrap_or(0);

    let extent = |min: i32, max: i32| (max as i64 - min as i64 + 1) as u32;
    BoundingRect {
      x: min_x as u32,
      y: min_y as u32,
      width: extent(min_x, max_x),
      height: extent(min_y, max_y),
    }
  }
}

/// 轴对齐矩形，坐标与尺寸均为像素
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BoundingRect {
  pub fn right(&self) -> u64 {
    self.x as u64 + self.width as u64
  }

  pub fn bottom(&self) -> u64 {
    self.y as u64 + self.height as u64
  }

  pub fn fits_in(&self, resolution: Resolution) -> bool {
    self.right() <= resolution.width as u64 && self.bottom() <= resolution.height as u64
  }
}

impl fmt::Display for BoundingRect {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}, {}) {}x{}", self.x, self.y, self.width, self.height)
  }
}

/// 车位在其包围矩形内的二值掩码
#[derive(Debug, Clone, PartialEq)]
pub struct SpotMask {
  rect: BoundingRect,
  raster: GrayImage,
}

impl SpotMask {
  /// 在包围矩形的局部坐标中填充多边形
  pub fn build(spot: &Spot) -> Self {
    let rect = spot.bounding_rect();
    let mut raster = GrayImage::new(rect.width, rect.height);
    let local: Vec<ImagePoint<i32>> = spot
      .polygon()
      .iter()
      .map(|p| ImagePoint::new(p.x - rect.x as i32, p.y - rect.y as i32))
      .collect();
    draw_polygon_mut(&mut raster, &local, Luma([FOREGROUND]));

    Self { rect, raster }
  }

  pub fn rect(&self) -> BoundingRect {
    self.rect
  }

  pub fn raster(&self) -> &GrayImage {
    &self.raster
  }

  pub fn contains(&self, local_x: u32, local_y: u32) -> bool {
    self.raster.get_pixel(local_x, local_y).0[0] != 0
  }

  /// 掩码中置位的像素数，即车位多边形的栅格面积
  pub fn area(&self) -> usize {
    self.raster.as_raw().iter().filter(|&&v| v != 0).count()
  }
}
