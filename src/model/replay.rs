// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/model/replay.rs - 回放预先计算的检测结果
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

use std::sync::atomic::{AtomicUsize, Ordering};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectParams, Detection, Detector},
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("检测结果解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 按帧顺序回放检测结果的检测器
///
/// 文件内容为 JSON 数组，每个元素是一帧的检测列表。超出记录范围的帧没有检测结果。
/// 和真实检测器一样，回放时会应用置信度阈值和类别白名单。
#[derive(Debug, Default)]
pub struct ReplayDetector {
  frames: Vec<Vec<Detection>>,
  cursor: AtomicUsize,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let content = std::fs::read_to_string(url.path())?;
    let detector = Self::from_json(&content)?;
    info!(
      "加载回放检测结果: {} ({} 帧)",
      url.path(),
      detector.frames.len()
    );
    Ok(detector)
  }
}

impl ReplayDetector {
  pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
    Self {
      frames,
      cursor: AtomicUsize::new(0),
    }
  }

  pub fn from_json(json: &str) -> Result<Self, ReplayError> {
    let frames: Vec<Vec<Detection>> = serde_json::from_str(json)?;
    Ok(Self::from_frames(frames))
  }

  /// 已经回放的帧数
  pub fn position(&self) -> usize {
    self.cursor.load(Ordering::SeqCst)
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayError;

  fn detect(&self, _frame: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
    let index = self.cursor.fetch_add(1, Ordering::SeqCst);
    let detections: Vec<Detection> = self
      .frames
      .get(index)
      .map(|frame| {
        frame
          .iter()
          .filter(|det| det.confidence >= params.confidence)
          .filter(|det| params.classes.is_empty() || params.classes.contains(&det.class_id))
          .cloned()
          .collect()
      })
      .unwrap_or_default();
    debug!("回放第 {} 帧: {} 个检测结果", index, detections.len());
    Ok(detections)
  }
}
