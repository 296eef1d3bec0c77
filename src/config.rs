// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_CONFIDENCE: f32 = 0.35;
pub const DEFAULT_IOU: f32 = 0.6;
pub const DEFAULT_INPUT_SIZE: u32 = 960;
pub const STILL_STROKE: u32 = 3;
pub const VIDEO_STROKE: u32 = 2;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须位于 (0, 1] 区间: {0}")]
  Confidence(f32),
  #[error("IoU 阈值必须位于 (0, 1] 区间: {0}")]
  Iou(f32),
  #[error("输入尺寸必须大于 0")]
  InputSize,
  #[error("线宽必须大于 0")]
  Stroke,
  #[error("未知的计数策略: {0}")]
  UnknownCounting(String),
}

/// 视频计数策略
///
/// `PerFrame` 每帧重新计数，只用于实时显示；`Cumulative` 额外累加整段视频的总数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountingPolicy {
  #[default]
  PerFrame,
  Cumulative,
}

impl FromStr for CountingPolicy {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "per-frame" => Ok(CountingPolicy::PerFrame),
      "cumulative" => Ok(CountingPolicy::Cumulative),
      other => Err(ConfigError::UnknownCounting(other.to_string())),
    }
  }
}

/// 流水线的不可变配置，构造后在整个运行期间保持不变
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub confidence: f32,
  pub iou: f32,
  pub input_size: u32,
  pub agnostic_nms: bool,
  pub counting: CountingPolicy,
  pub still_stroke: u32,
  pub video_stroke: u32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      iou: DEFAULT_IOU,
      input_size: DEFAULT_INPUT_SIZE,
      agnostic_nms: false,
      counting: CountingPolicy::PerFrame,
      still_stroke: STILL_STROKE,
      video_stroke: VIDEO_STROKE,
    }
  }
}

impl PipelineConfig {
  pub fn builder() -> PipelineConfigBuilder {
    PipelineConfigBuilder::default()
  }
}

#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
  config: PipelineConfig,
}

impl PipelineConfigBuilder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.config.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.config.iou = iou;
    self
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.config.input_size = input_size;
    self
  }

  pub fn counting(mut self, counting: CountingPolicy) -> Self {
    self.config.counting = counting;
    self
  }

  pub fn strokes(mut self, still: u32, video: u32) -> Self {
    self.config.still_stroke = still;
    self.config.video_stroke = video;
    self
  }

  pub fn build(self) -> Result<PipelineConfig, ConfigError> {
    let config = self.config;
    // NaN 也会在这里被拒绝
    if !(config.confidence > 0.0 && config.confidence <= 1.0) {
      return Err(ConfigError::Confidence(config.confidence));
    }
    if !(config.iou > 0.0 && config.iou <= 1.0) {
      return Err(ConfigError::Iou(config.iou));
    }
    if config.input_size == 0 {
      return Err(ConfigError::InputSize);
    }
    if config.still_stroke == 0 || config.video_stroke == 0 {
      return Err(ConfigError::Stroke);
    }
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_detector_settings() {
    let config = PipelineConfig::builder().build().unwrap();
    assert_eq!(config.confidence, 0.35);
    assert_eq!(config.iou, 0.6);
    assert_eq!(config.input_size, 960);
    assert!(!config.agnostic_nms);
    assert_eq!(config.counting, CountingPolicy::PerFrame);
    assert_eq!((config.still_stroke, config.video_stroke), (3, 2));
  }

  #[test]
  fn confidence_range_is_left_open() {
    assert_eq!(
      PipelineConfig::builder().confidence(0.0).build(),
      Err(ConfigError::Confidence(0.0))
    );
    assert!(PipelineConfig::builder().confidence(1.0).build().is_ok());
    assert!(
      PipelineConfig::builder()
        .confidence(f32::NAN)
        .build()
        .is_err()
    );
  }

  #[test]
  fn zero_stroke_is_rejected() {
    assert_eq!(
      PipelineConfig::builder().strokes(3, 0).build(),
      Err(ConfigError::Stroke)
    );
  }

  #[test]
  fn counting_policy_parses() {
    assert_eq!(
      "cumulative".parse::<CountingPolicy>(),
      Ok(CountingPolicy::Cumulative)
    );
    assert!("sometimes".parse::<CountingPolicy>().is_err());
  }
}
