// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/input.rs - 图像/视频输入
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

use image::RgbImage;
use thiserror::Error;

mod staging;
pub use self::staging::StagedMedia;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerOpener, GStreamerVideoSource};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Unsupported media type: {0}")]
  UnsupportedMedia(String),
  #[error("Image decoding error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("Failed to open video: {0}")]
  Open(String),
  #[error("Failed to decode frame: {0}")]
  Frame(String),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 上传内容的媒体种类，由调用者提供的 MIME 类型决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn from_media_type(media_type: &str) -> Result<Self, InputError> {
    let lower = media_type.trim().to_ascii_lowercase();
    if lower.starts_with("image/") {
      Ok(MediaKind::Image)
    } else if lower.starts_with("video/") {
      Ok(MediaKind::Video)
    } else {
      Err(InputError::UnsupportedMedia(media_type.to_string()))
    }
  }

  /// 按扩展名推断 MIME 类型，只接受常见的图片和视频格式
  pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
      "jpg" | "jpeg" => Some("image/jpeg"),
      "png" => Some("image/png"),
      "bmp" => Some("image/bmp"),
      "mp4" => Some("video/mp4"),
      "avi" => Some("video/x-msvideo"),
      "mov" => Some("video/quicktime"),
      "mkv" => Some("video/x-matroska"),
      _ => None,
    }
  }

  /// 暂存文件使用的扩展名，方便解码器识别容器
  pub fn staging_suffix(media_type: &str) -> &'static str {
    match media_type.trim().to_ascii_lowercase().as_str() {
      "video/x-msvideo" | "video/avi" => ".avi",
      "video/quicktime" => ".mov",
      "video/x-matroska" => ".mkv",
      "video/webm" => ".webm",
      _ => ".mp4",
    }
  }
}

/// 一次上传的原始内容
#[derive(Debug, Clone)]
pub struct Upload {
  pub media_type: String,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      media_type: media_type.into(),
      bytes,
    }
  }

  pub fn kind(&self) -> Result<MediaKind, InputError> {
    MediaKind::from_media_type(&self.media_type)
  }
}

/// 解码任意栅格格式的图片并转换为 RGB
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let image = image::load_from_memory(bytes)?;
  Ok(image.to_rgb8())
}

/// 按顺序产生 RGB 帧的视频流
pub trait FrameSource: Iterator<Item = Result<RgbImage, DecodeError>> {
  /// 帧率（如果已知）
  fn fps(&self) -> Option<f64>;
}

/// 按路径打开视频文件的解码器
pub trait VideoOpener {
  type Source: FrameSource;

  fn open(&self, path: &Path) -> Result<Self::Source, DecodeError>;
}

impl<F, S> VideoOpener for F
where
  F: Fn(&Path) -> Result<S, DecodeError>,
  S: FrameSource,
{
  type Source = S;

  fn open(&self, path: &Path) -> Result<Self::Source, DecodeError> {
    self(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb};
  use std::io::Cursor;

  #[test]
  fn media_kind_from_type() {
    assert_eq!(MediaKind::from_media_type("image/png").unwrap(), MediaKind::Image);
    assert_eq!(MediaKind::from_media_type("Video/MP4").unwrap(), MediaKind::Video);
    assert!(matches!(
      MediaKind::from_media_type("application/pdf"),
      Err(InputError::UnsupportedMedia(_))
    ));
  }

  #[test]
  fn media_type_from_extension() {
    assert_eq!(
      MediaKind::media_type_for_path(Path::new("a/b/street.JPG")),
      Some("image/jpeg")
    );
    assert_eq!(
      MediaKind::media_type_for_path(Path::new("clip.mkv")),
      Some("video/x-matroska")
    );
    assert_eq!(MediaKind::media_type_for_path(Path::new("notes.txt")), None);
    assert_eq!(MediaKind::media_type_for_path(Path::new("noext")), None);
  }

  #[test]
  fn decodes_png_to_rgb() {
    let source = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
    let mut bytes = Cursor::new(Vec::new());
    source.write_to(&mut bytes, ImageFormat::Png).unwrap();

    let decoded = decode_image(bytes.get_ref()).unwrap();
    assert_eq!(decoded.dimensions(), (3, 2));
    assert_eq!(*decoded.get_pixel(2, 1), Rgb([10, 20, 30]));
  }

  #[test]
  fn garbage_bytes_fail_to_decode() {
    assert!(matches!(
      decode_image(b"definitely not an image"),
      Err(InputError::ImageError(_))
    ));
  }
}
