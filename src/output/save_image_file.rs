// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  count::DetectionCounts,
  output::{Render, draw::side_by_side},
  pipeline::{FrameReport, ImageReport},
  task::RunStatus,
};

/// 把标注后的图像保存到固定路径，计数写入同名的 `.json` 文件
///
/// `image:///out/result.png?compare` 会保存原图与标注图并排的对比图。
/// 视频的每一帧都会覆盖同一个文件。
pub struct SaveImageFileOutput {
  path: PathBuf,
  compare: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      compare: uri.query_pairs().any(|(k, _)| k == "compare"),
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn counts_path(&self) -> PathBuf {
    self.path.with_extension("json")
  }

  fn save(&self, image: &RgbImage, counts: &DetectionCounts) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    std::fs::write(self.counts_path(), serde_json::to_vec_pretty(counts)?)?;
    debug!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_image(&self, report: &ImageReport) -> Result<(), Self::Error> {
    if self.compare {
      self.save(&side_by_side(&report.original, &report.annotated), &report.counts)?;
    } else {
      self.save(&report.annotated, &report.counts)?;
    }
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }

  fn render_frame(&self, report: &FrameReport) -> Result<(), Self::Error> {
    let counts = report.totals.as_ref().unwrap_or(&report.counts);
    self.save(&report.frame, counts)
  }

  fn finish(&self, status: &RunStatus) -> Result<(), Self::Error> {
    info!("{} ({})", status.message(), self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{BBox, Detection},
    output::draw::Overlay,
    registry::ClassRegistry,
  };
  use image::Rgb;

  fn report() -> ImageReport {
    let mut counts = DetectionCounts::new();
    counts.accumulate(
      &[Detection::new(7, 0.8, BBox::new(0, 0, 2, 2))],
      &ClassRegistry::urban(),
    );
    ImageReport {
      original: RgbImage::from_pixel(6, 4, Rgb([0, 0, 0])),
      annotated: RgbImage::from_pixel(6, 4, Rgb([255, 255, 255])),
      overlay: Overlay::default(),
      counts,
    }
  }

  #[test]
  fn saves_annotated_image_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("result.png");
    let url = Url::parse(&format!("image://{}", target.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    output.render_image(&report()).unwrap();

    let saved = image::open(&target).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (6, 4));
    let json: serde_json::Value =
      serde_json::from_slice(&std::fs::read(target.with_extension("json")).unwrap()).unwrap();
    assert_eq!(json["Camión"], 1);
  }

  #[test]
  fn compare_saves_side_by_side() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("compare.png");
    let url = Url::parse(&format!("image://{}?compare", target.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    output.render_image(&report()).unwrap();

    let saved = image::open(&target).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (12, 4));
    assert_eq!(*saved.get_pixel(0, 0), Rgb([0, 0, 0]));
    assert_eq!(*saved.get_pixel(6, 0), Rgb([255, 255, 255]));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
