// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::drawing::draw_text_mut;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  model::{BBox, Detection},
  registry::ClassRegistry,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10;

// 内置标签字体 (DejaVu Sans)
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 实际绘制到画面上的一个检测框
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnBox {
  pub class_id: u32,
  /// 裁剪到画面范围之后的坐标
  pub rect: BBox,
  pub color: [u8; 3],
  pub label: String,
  pub anchor: (i32, i32),
}

/// 一次标注的绘制记录，与输入检测列表一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
  pub boxes: Vec<DrawnBox>,
}

impl Overlay {
  pub fn len(&self) -> usize {
    self.boxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.boxes.is_empty()
  }
}

/// 标签文本，置信度以两位小数的百分比表示
pub fn label_text(display_name: &str, confidence: f32) -> String {
  format!("{} {:.2}%", display_name, f64::from(confidence) * 100.0)
}

/// 标签锚点位于框上方 10 像素，超出画面顶部时退回到框的上边
pub fn label_anchor(rect: &BBox) -> (i32, i32) {
  let above = rect.y1 - LABEL_OFFSET;
  if above < 0 {
    (rect.x1, rect.y1)
  } else {
    (rect.x1, above)
  }
}

fn clamp_to_frame(bbox: &BBox, width: u32, height: u32) -> BBox {
  let max_x = width.saturating_sub(1) as i32;
  let max_y = height.saturating_sub(1) as i32;
  let (x1, x2) = (bbox.x1.clamp(0, max_x), bbox.x2.clamp(0, max_x));
  let (y1, y2) = (bbox.y1.clamp(0, max_y), bbox.y2.clamp(0, max_y));
  BBox::new(x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2))
}

/// 检测框标注器
///
/// 默认使用内置字体绘制标签。`without_font` 只绘制边框，标签仍会记录在
/// [`Overlay`] 中。
#[derive(Clone)]
pub struct Annotator {
  font: Option<FontArc>,
  scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::embedded()
  }
}

impl Annotator {
  pub fn without_font() -> Self {
    Self {
      font: None,
      scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)?;
    debug!("加载标签字体: {}", path.as_ref().display());
    Ok(Self {
      font: Some(font),
      scale: PxScale::from(LABEL_FONT_SIZE),
    })
  }

  pub fn embedded() -> Self {
    let font = FontArc::try_from_slice(EMBEDDED_FONT).expect("无法加载嵌入的字体文件");
    Self {
      font: Some(font),
      scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn font_size(mut self, size: f32) -> Self {
    self.scale = PxScale::from(size);
    self
  }

  /// 在原图上直接绘制，适用于用完即弃的视频帧
  pub fn annotate_in_place(
    &self,
    image: &mut RgbImage,
    detections: &[Detection],
    registry: &ClassRegistry,
    stroke: u32,
  ) -> Overlay {
    let mut overlay = Overlay {
      boxes: Vec::with_capacity(detections.len()),
    };

    // 按输入顺序绘制，后绘制的框覆盖先绘制的框
    for det in detections {
      let Some(spec) = registry.lookup(det.class_id) else {
        warn!("跳过未注册类别 {} 的检测结果", det.class_id);
        continue;
      };

      let rect = clamp_to_frame(&det.bbox, image.width(), image.height());
      let drawn = DrawnBox {
        class_id: det.class_id,
        rect,
        color: spec.color,
        label: label_text(&spec.display_name, det.confidence),
        anchor: label_anchor(&rect),
      };

      if image.width() > 0 && image.height() > 0 {
        draw_rect_outline(image, &drawn.rect, stroke, spec.color);
        if let Some(font) = &self.font {
          draw_text_mut(
            image,
            Rgb(spec.color),
            drawn.anchor.0,
            drawn.anchor.1,
            self.scale,
            font,
            &drawn.label,
          );
        }
      }

      overlay.boxes.push(drawn);
    }

    overlay
  }

  /// 在副本上绘制，原图保持不变
  pub fn annotate(
    &self,
    image: &RgbImage,
    detections: &[Detection],
    registry: &ClassRegistry,
    stroke: u32,
  ) -> (RgbImage, Overlay) {
    let mut annotated = image.clone();
    let overlay = self.annotate_in_place(&mut annotated, detections, registry, stroke);
    (annotated, overlay)
  }
}

// 边框向内加粗，rect 已经裁剪到画面范围内
fn draw_rect_outline(image: &mut RgbImage, rect: &BBox, stroke: u32, color: [u8; 3]) {
  for thickness in 0..stroke as i32 {
    let x_min = rect.x1 + thickness;
    let y_min = rect.y1 + thickness;
    let x_max = rect.x2 - thickness;
    let y_max = rect.y2 - thickness;
    if x_min > x_max || y_min > y_max {
      break;
    }

    // Top and bottom edges
    for x in x_min..=x_max {
      image.put_pixel(x as u32, y_min as u32, Rgb(color));
      image.put_pixel(x as u32, y_max as u32, Rgb(color));
    }

    // Left and right edges
    for y in y_min..=y_max {
      image.put_pixel(x_min as u32, y as u32, Rgb(color));
      image.put_pixel(x_max as u32, y as u32, Rgb(color));
    }
  }
}

/// 左右拼接原图和标注图
pub fn side_by_side(original: &RgbImage, annotated: &RgbImage) -> RgbImage {
  let width = original.width() + annotated.width();
  let height = original.height().max(annotated.height());
  let mut canvas = RgbImage::new(width, height);
  imageops::replace(&mut canvas, original, 0, 0);
  imageops::replace(&mut canvas, annotated, i64::from(original.width()), 0);
  canvas
}
