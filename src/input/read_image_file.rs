// 该文件是 Chewei （车位） 项目的一部分。
// src/input/read_image_file.rs - 读取静态图像作为输入
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

//! 静态图像输入，主要用于标定车位阈值。
//!
//! - `image:///path/to/lot.png`
//! - `file:///path/to/lot.jpg?repeat=10&fps=2`
//!
//! `repeat` 为重复产出的帧数（默认 1），`fps` 为产出速率（默认 1）。

use std::{
  path::PathBuf,
  time::{Duration, Instant},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, Resolution},
};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid query parameter '{0}'")]
  InvalidQuery(String),
}

pub struct ImageFileInput {
  image: RgbImage,
  remaining: u32,
  interval: Duration,
  emitted: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl ImageFileInput {
  /// `image://` 地址，或指向图像文件的 `file://` 地址
  pub fn accepts(url: &Url) -> bool {
    match url.scheme() {
      Self::SCHEME => true,
      "file" => {
        let path = url.path().to_lowercase();
        IMAGE_EXTENSIONS
          .iter()
          .any(|ext| path.ends_with(&format!(".{}", ext)))
      }
      _ => false,
    }
  }

  pub fn from_image(image: RgbImage, repeat: u32, fps: u32) -> Self {
    Self {
      image,
      remaining: repeat,
      interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
      emitted: 0,
    }
  }

  pub fn resolution(&self) -> Resolution {
    Resolution::of(&self.image)
  }

  pub fn release(&mut self) {
    if self.remaining > 0 {
      info!("丢弃剩余的 {} 帧图像输入", self.remaining);
    }
    self.remaining = 0;
  }
}

fn query_u32(url: &Url, key: &str, default: u32) -> Result<u32, ImageFileInputError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<u32>()
      .ok()
      .filter(|v| *v > 0)
      .ok_or_else(|| ImageFileInputError::InvalidQuery(format!("{}={}", key, v))),
    None => Ok(default),
  }
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if !Self::accepts(url) {
      error!(
        "URI scheme mismatch: expected '{}' or an image file, found '{}'",
        Self::SCHEME,
        url
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = PathBuf::from(urlencoding::decode(url.path()).map_err(|_| {
      ImageFileInputError::InvalidQuery(format!("path={}", url.path()))
    })?.into_owned());
    let repeat = query_u32(url, "repeat", 1)?;
    let fps = query_u32(url, "fps", 1)?;

    let image = ImageReader::open(&path)?.decode()?.into_rgb8();
    info!(
      "打开图像输入: {} ({}x{}), 重复 {} 次 @ {} fps",
      path.display(),
      image.width(),
      image.height(),
      repeat,
      fps
    );

    Ok(Self::from_image(image, repeat, fps))
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, ImageFileInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    if self.emitted > 0 {
      std::thread::sleep(self.interval);
    }
    self.remaining -= 1;

    let frame = Frame::new(self.image.clone(), self.emitted, Instant::now());
    self.emitted += 1;
    Some(Ok(frame))
  }
}
