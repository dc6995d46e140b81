// 该文件是 Chewei （车位） 项目的一部分。
// src/output/draw.rs - 车位占用结果可视化
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_text_mut, text_size};
use tracing::{info, warn};

use crate::model::{OccupancyReport, Spot};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 28.0;
const LABEL_OFFSET_X: i32 = 5;
const LABEL_OFFSET_Y: i32 = 10; // 文本基线距矩形底边
const OUTLINE_THICKNESS: i32 = 2;

pub const FREE_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
pub const OCCUPIED_COLOR: [u8; 3] = [255, 0, 0]; // 红色
pub const LABEL_COLOR: [u8; 3] = [255, 0, 255]; // 品红

const FONT_SEARCH_PATHS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

fn load_font(path: &Path) -> Option<FontArc> {
  let data = std::fs::read(path).ok()?;
  match FontVec::try_from_vec(data) {
    Ok(font) => Some(FontArc::new(font)),
    Err(e) => {
      warn!("无法解析字体 {}: {}", path.display(), e);
      None
    }
  }
}

/// 在帧上绘制车位轮廓与前景像素计数
pub struct Annotator {
  font: Option<FontArc>,
  font_size: f32,
}

impl Annotator {
  /// 优先使用指定字体，否则在常见的系统字体路径中查找
  ///
  /// 找不到字体时只画轮廓，不画计数。
  pub fn load(font: Option<&Path>) -> Self {
    let candidates = font
      .map(Path::to_path_buf)
      .into_iter()
      .chain(FONT_SEARCH_PATHS.iter().map(PathBuf::from));

    for path in candidates {
      if let Some(font) = load_font(&path) {
        info!("使用字体: {}", path.display());
        return Self::with_font(Some(font));
      }
    }

    warn!("未找到可用字体，标注中将不显示像素计数");
    Self::with_font(None)
  }

  pub fn with_font(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn annotate(&self, image: &mut RgbImage, spots: &[Spot], report: &OccupancyReport) {
    for (spot, result) in spots.iter().zip(&report.results) {
      let color = if result.occupied {
        OCCUPIED_COLOR
      } else {
        FREE_COLOR
      };
      draw_outline(image, spot, Rgb(color));

      if let Some(font) = &self.font {
        let rect = spot.bounding_rect();
        let text = result.count.to_string();
        let scale = PxScale::from(self.font_size);
        let (_, text_height) = text_size(scale, font, &text);

        let x = rect.x as i32 + LABEL_OFFSET_X;
        let baseline = (rect.y + rect.height) as i32 - LABEL_OFFSET_Y;
        let y = (baseline - text_height as i32).max(0);
        draw_text_mut(image, Rgb(LABEL_COLOR), x, y, scale, font, &text);
      }
    }
  }
}

fn draw_outline(image: &mut RgbImage, spot: &Spot, color: Rgb<u8>) {
  let polygon = spot.polygon();
  let edges = polygon.iter().zip(polygon.iter().cycle().skip(1));

  for (from, to) in edges {
    for dx in 0..OUTLINE_THICKNESS {
      for dy in 0..OUTLINE_THICKNESS {
        draw_line_segment_mut(
          image,
          ((from.x + dx) as f32, (from.y + dy) as f32),
          ((to.x + dx) as f32, (to.y + dy) as f32),
          color,
        );
      }
    }
  }
}
