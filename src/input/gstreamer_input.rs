// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频解码
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

//! # GStreamer 视频解码
//!
//! 通过 `filesrc ! decodebin ! videoconvert ! appsink` 管道按顺序解码视频文件，
//! 每一帧转换为 RGB 图像。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use jiedao::input::{GStreamerOpener, VideoOpener};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let source = GStreamerOpener.open(Path::new("street.mp4"))?;
//! for frame in source {
//!     let frame = frame?;
//!     println!("帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::input::{DecodeError, FrameSource, VideoOpener};

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 以 GStreamer 打开视频文件
#[derive(Debug, Default, Clone, Copy)]
pub struct GStreamerOpener;

impl VideoOpener for GStreamerOpener {
  type Source = GStreamerVideoSource;

  fn open(&self, path: &Path) -> Result<Self::Source, DecodeError> {
    Ok(GStreamerVideoSource::open(path)?)
  }
}

/// GStreamer 视频帧源
///
/// 释放时管道被置为 `Null`，文件句柄随之关闭。
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  fps: Option<f64>,
  finished: bool,
}

impl GStreamerVideoSource {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let location = path.to_string_lossy().replace('"', "\\\"");
    // 文件输入需要完整的帧序列，appsink 不丢帧也不按时钟同步
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
       appsink name=sink sync=false max-buffers=4",
      location
    );
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      pipeline,
      appsink,
      fps: None,
      finished: false,
    })
  }

  // 拉取失败时，总线上有错误消息说明是解码失败，否则是正常结束
  fn pending_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    }
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = Result<RgbImage, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) => {
        self.finished = true;
        return self
          .pending_error()
          .map(|msg| Err(DecodeError::Frame(msg)));
      }
    };

    match convert_sample_to_rgb(&sample) {
      Ok((image, fps)) => {
        if self.fps.is_none() && fps.is_some() {
          debug!("视频帧率: {:?}", fps);
          self.fps = fps;
        }
        Some(Ok(image))
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e.into()))
      }
    }
  }
}

impl FrameSource for GStreamerVideoSource {
  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

fn convert_sample_to_rgb(
  sample: &gst::Sample,
) -> Result<(RgbImage, Option<f64>), GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let fps = video_info.fps();
  let fps = (fps.numer() > 0 && fps.denom() > 0)
    .then(|| f64::from(fps.numer()) / f64::from(fps.denom()));

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  // Validate buffer size
  let expected_size = stride * height.saturating_sub(1) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(width * height * 3);
  match video_info.format() {
    gst_video::VideoFormat::Rgb => {
      for y in 0..height {
        let row = y * stride;
        pixels.extend_from_slice(&data[row..row + width * 3]);
      }
    }
    gst_video::VideoFormat::Bgr => {
      for y in 0..height {
        let row = y * stride;
        for px in data[row..row + width * 3].chunks_exact(3) {
          pixels.extend_from_slice(&[px[2], px[1], px[0]]);
        }
      }
    }
    _ => return Err(GStreamerInputError::UnsupportedFormat),
  }

  let image = RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: width * height * 3,
      actual: data.len(),
    },
  )?;

  Ok((image, fps))
}
