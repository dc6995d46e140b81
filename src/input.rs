// 该文件是 Chewei （车位） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::path::Path;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  frame::{Frame, Resolution},
};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 输入源：逐帧产出图像，`None` 表示输入流正常结束
///
/// 分辨率在打开时确定，之后不再改变。
pub trait InputSource: Iterator<Item = Result<Frame, InputError>> {
  fn resolution(&self) -> Resolution;

  /// 释放底层资源，重复调用无副作用
  fn release(&mut self);
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("无效的输入地址 '{0}': {1}")]
  InvalidUri(String, url::ParseError),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if ImageFileInput::accepts(url) {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }

    open_stream_url(url)
  }
}

#[cfg(feature = "gstreamer_input")]
fn open_stream_url(url: &Url) -> Result<InputWrapper, InputError> {
  let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
  Ok(InputWrapper::GStreamerInput(input))
}

#[cfg(not(feature = "gstreamer_input"))]
fn open_stream_url(url: &Url) -> Result<InputWrapper, InputError> {
  use crate::FromUrlWithScheme;

  tracing::error!(
    "未启用 gstreamer_input 特性，无法打开 '{}'，仅支持 '{}' 图像输入",
    url,
    ImageFileInput::SCHEME
  );
  Err(InputError::SchemeMismatch)
}

impl InputWrapper {
  /// 打开配置中的输入流，`stream` 可以是 URI 或本地路径
  pub fn open(stream: &str) -> Result<Self, InputError> {
    let url = parse_stream_uri(stream)?;
    Self::from_url(&url)
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next().map(|r| r.map_err(InputError::from)),
      InputWrapper::ReadImageFile(input) => input.next().map(|r| r.map_err(InputError::from)),
    }
  }
}

impl InputSource for InputWrapper {
  fn resolution(&self) -> Resolution {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.resolution(),
      InputWrapper::ReadImageFile(input) => input.resolution(),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.release(),
      InputWrapper::ReadImageFile(input) => input.release(),
    }
  }
}

/// 解析输入地址；不带 scheme 的字符串视为本地文件路径
pub fn parse_stream_uri(stream: &str) -> Result<Url, InputError> {
  match Url::parse(stream) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => {
      let path = Path::new(stream);
      let absolute = if path.is_absolute() {
        path.to_path_buf()
      } else {
        std::env::current_dir()
          .map(|dir| dir.join(path))
          .unwrap_or_else(|_| path.to_path_buf())
      };
      Url::from_file_path(&absolute).map_err(|_| {
        InputError::InvalidUri(stream.to_string(), url::ParseError::RelativeUrlWithoutBase)
      })
    }
    Err(e) => Err(InputError::InvalidUri(stream.to_string(), e)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_network_uris() {
    let url = parse_stream_uri("rtsp://192.168.1.10:8554/parking").unwrap();
    assert_eq!(url.scheme(), "rtsp");
    assert_eq!(url.host_str(), Some("192.168.1.10"));
  }

  #[test]
  fn bare_paths_become_file_uris() {
    let url = parse_stream_uri("/var/video/lot.mp4").unwrap();
    assert_eq!(url.scheme(), "file");
    assert_eq!(url.path(), "/var/video/lot.mp4");

    let url = parse_stream_uri("lot.png").unwrap();
    assert_eq!(url.scheme(), "file");
    assert!(url.path().ends_with("/lot.png"));
  }
}
