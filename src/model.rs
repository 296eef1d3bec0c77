// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/model.rs - 检测器接口与检测结果
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

use std::sync::Arc;

use image::RgbImage;
use serde::Deserialize;

use crate::{config::PipelineConfig, registry::ClassRegistry};

/// 像素坐标边界框，(x1, y1) 为左上角，(x2, y2) 为右下角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BBox {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
  pub class_id: u32,
  pub confidence: f32,
  pub bbox: BBox,
}

impl Detection {
  pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_id,
      confidence,
      bbox,
    }
  }
}

/// 原样传递给检测器的推理参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectParams {
  pub confidence: f32,
  pub iou: f32,
  pub input_size: u32,
  pub classes: Vec<u32>,
  pub agnostic_nms: bool,
}

impl DetectParams {
  pub fn new(config: &PipelineConfig, registry: &ClassRegistry) -> Self {
    Self {
      confidence: config.confidence,
      iou: config.iou,
      input_size: config.input_size,
      classes: registry.allowed_ids(),
      agnostic_nms: config.agnostic_nms,
    }
  }
}

/// 外部目标检测器
///
/// 输入为 RGB 图像，返回原始检测结果。模型的加载和复用由调用者负责。
pub trait Detector {
  type Error;

  fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for &D {
  type Error = D::Error;

  fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
    (**self).detect(frame, params)
  }
}

impl<D: Detector + ?Sized> Detector for Arc<D> {
  type Error = D::Error;

  fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
    (**self).detect(frame, params)
  }
}

mod deadline;
mod replay;
pub use self::deadline::{Deadline, DeadlineError};
pub use self::replay::{ReplayDetector, ReplayError};
