// 该文件是 Chewei （车位） 项目的一部分。
// src/output/snapshot.rs - 保存快照图像
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

use crate::output::{OutputError, OutputSink};

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("I/O 错误 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像错误 {path}: {source}")]
  ImageError {
    path: PathBuf,
    source: image::ImageError,
  },
}

/// 每个处理过的帧保存为 `<dir>/cam_output_<序号>.jpg`
pub struct SnapshotOutput {
  dir: PathBuf,
  written: u64,
}

impl SnapshotOutput {
  pub fn new(dir: PathBuf) -> Self {
    Self { dir, written: 0 }
  }

  pub fn path_for(&self, sequence: u64) -> PathBuf {
    snapshot_path(&self.dir, sequence)
  }

  pub fn write_frame(&mut self, sequence: u64, image: &RgbImage) -> Result<(), SnapshotError> {
    if !self.dir.as_os_str().is_empty() {
      std::fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::IoError {
        path: self.dir.clone(),
        source,
      })?;
    }

    let path = self.path_for(sequence);
    image
      .save(&path)
      .map_err(|source| SnapshotError::ImageError {
        path: path.clone(),
        source,
      })?;
    self.written += 1;

    debug!("保存快照: {}", path.display());
    Ok(())
  }

  pub fn close(&mut self) -> Result<(), SnapshotError> {
    info!("快照输出结束，共保存 {} 张", self.written);
    Ok(())
  }
}

/// 保存到固定路径，每次写入覆盖上一张
pub struct ImageFileOutput {
  path: PathBuf,
}

impl ImageFileOutput {
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  pub fn write_frame(&mut self, _sequence: u64, image: &RgbImage) -> Result<(), SnapshotError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| SnapshotError::IoError {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    image
      .save(&self.path)
      .map_err(|source| SnapshotError::ImageError {
        path: self.path.clone(),
        source,
      })?;

    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl OutputSink for ImageFileOutput {
  fn write_frame(&mut self, sequence: u64, image: &RgbImage) -> Result<(), OutputError> {
    ImageFileOutput::write_frame(self, sequence, image).map_err(OutputError::from)
  }

  fn close(&mut self) -> Result<(), OutputError> {
    Ok(())
  }
}

pub fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
  dir.join(format!("cam_output_{:04}.jpg", sequence))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn names_are_zero_padded() {
    assert_eq!(
      snapshot_path(Path::new("/tmp"), 7),
      PathBuf::from("/tmp/cam_output_0007.jpg")
    );
    assert_eq!(
      snapshot_path(Path::new("/tmp"), 12345),
      PathBuf::from("/tmp/cam_output_12345.jpg")
    );
  }

  #[test]
  fn writes_jpeg_into_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("snapshots");
    let mut output = SnapshotOutput::new(target.clone());

    output
      .write_frame(3, &RgbImage::from_pixel(16, 8, Rgb([10, 200, 30])))
      .unwrap();

    let saved = image::open(target.join("cam_output_0003.jpg")).unwrap();
    assert_eq!((saved.width(), saved.height()), (16, 8));
  }

  #[test]
  fn image_file_output_overwrites_fixed_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calibration/lot.png");
    let mut output = ImageFileOutput::new(path.clone());

    OutputSink::write_frame(&mut output, 0, &RgbImage::new(5, 5)).unwrap();
    OutputSink::write_frame(&mut output, 1, &RgbImage::new(9, 3)).unwrap();
    OutputSink::close(&mut output).unwrap();

    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (9, 3));
  }

  #[test]
  fn unwritable_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut output = SnapshotOutput::new(blocker);
    let err = output.write_frame(1, &RgbImage::new(4, 4)).unwrap_err();
    assert!(matches!(err, SnapshotError::IoError { .. }));
  }
}
