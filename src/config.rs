// 该文件是 Chewei （车位） 项目的一部分。
// src/config.rs - 配置文件加载与校验
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

//! # 配置
//!
//! 配置文件为 JSON：
//!
//! ```json
//! {
//!   "stream": "rtsp://192.168.1.10:8554/parking",
//!   "output_stream": "rtsp://localhost:8554/output_stream",
//!   "fps": 1,
//!   "spots": [
//!     { "mask": [[10, 20], [120, 20], [120, 200], [10, 200]], "threshold": 900 }
//!   ]
//! }
//! ```
//!
//! 加载后立即校验，得到不可变的 [`Config`]；任何问题都在打开输入流之前报告。

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::model::{Point, PreprocessSettings, Spot, SpotError};

pub const DEFAULT_STREAM: &str = "http://localhost:1984/api/stream.mp4?src=file";
pub const DEFAULT_FPS: u32 = 1;
pub const DEFAULT_SNAPSHOT_DIR: &str = "/tmp";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("缺少配置项: {0}")]
  Missing(&'static str),
  #[error("配置项无效: {0}")]
  Invalid(String),
  #[error("车位 {index} 无效: {source}")]
  InvalidSpot { index: usize, source: SpotError },
}

/// 转推使用的编码后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestreamBackend {
  #[default]
  Gstreamer,
  Ffmpeg,
}

#[derive(Debug, Deserialize)]
struct SpotFile {
  mask: Vec<[i32; 2]>,
  threshold: u32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
  stream: Option<String>,
  output_stream: Option<String>,
  fps: Option<u32>,
  spots: Option<Vec<SpotFile>>,
  restream_backend: Option<RestreamBackend>,
  snapshot_dir: Option<String>,
  font: Option<PathBuf>,
  preprocess: Option<PreprocessSettings>,
}

/// 校验后的配置
#[derive(Debug, Clone)]
pub struct Config {
  /// 输入视频 URI
  pub stream: String,
  /// 转推目标，`None` 表示不转推
  pub output_stream: Option<String>,
  /// 目标处理帧率
  pub fps: u32,
  pub spots: Vec<Spot>,
  pub restream_backend: RestreamBackend,
  /// 快照目录，`None` 表示不保存快照
  pub snapshot_dir: Option<PathBuf>,
  pub font: Option<PathBuf>,
  pub preprocess: PreprocessSettings,
}

impl Config {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    let file: ConfigFile = serde_json::from_str(text)?;
    Self::from_file(file)
  }

  fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
    let stream = file.stream.unwrap_or_else(|| DEFAULT_STREAM.to_string());
    if stream.trim().is_empty() {
      return Err(ConfigError::Invalid("stream 不能为空".to_string()));
    }

    let output_stream = file
      .output_stream
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty());

    let fps = file.fps.unwrap_or(DEFAULT_FPS);
    if fps == 0 {
      return Err(ConfigError::Invalid("fps 必须为正整数".to_string()));
    }

    let spot_files = file.spots.ok_or(ConfigError::Missing("spots"))?;
    if spot_files.is_empty() {
      return Err(ConfigError::Invalid("spots 至少需要一个车位".to_string()));
    }
    let spots = spot_files
      .into_iter()
      .enumerate()
      .map(|(index, spot)| {
        let polygon = spot.mask.into_iter().map(Point::from).collect();
        Spot::new(index, polygon, spot.threshold)
          .map_err(|source| ConfigError::InvalidSpot { index, source })
      })
      .collect::<Result<Vec<_>, _>>()?;

    let snapshot_dir = file
      .snapshot_dir
      .unwrap_or_else(|| DEFAULT_SNAPSHOT_DIR.to_string());
    let snapshot_dir = if snapshot_dir.trim().is_empty() {
      None
    } else {
      Some(PathBuf::from(snapshot_dir))
    };

    let preprocess = file.preprocess.unwrap_or_default();
    validate_preprocess(&preprocess)?;

    Ok(Self {
      stream,
      output_stream,
      fps,
      spots,
      restream_backend: file.restream_backend.unwrap_or_default(),
      snapshot_dir,
      font: file.font,
      preprocess,
    })
  }

  pub fn log_summary(&self) {
    info!("stream: {}", self.stream);
    info!(
      "output_stream: {}",
      self.output_stream.as_deref().unwrap_or("")
    );
    info!("fps: {}", self.fps);
    info!("spots: {}", self.spots.len());
    if let Some(dir) = &self.snapshot_dir {
      info!("snapshot_dir: {}", dir.display());
    }
  }
}

fn validate_preprocess(settings: &PreprocessSettings) -> Result<(), ConfigError> {
  if settings.block_size < 3 || settings.block_size % 2 == 0 {
    return Err(ConfigError::Invalid(format!(
      "preprocess.block_size 必须是不小于 3 的奇数，实际 {}",
      settings.block_size
    )));
  }
  if settings.median_kernel == 0 || settings.median_kernel % 2 == 0 {
    return Err(ConfigError::Invalid(format!(
      "preprocess.median_kernel 必须是正奇数，实际 {}",
      settings.median_kernel
    )));
  }
  Ok(())
}
