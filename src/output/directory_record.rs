// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::Render,
  pipeline::{FrameReport, ImageReport},
  task::RunStatus,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

/// 按日期目录记录一次运行的全部结果
///
/// 目录结构为 `<root>/YYYY/MM/DD/HH-MM-SS/`。图片写入 `original.png`、
/// `annotated.png` 和 `counts.json`；视频每帧写入 `frame-NNNNNN.png`，
/// 计数逐行追加到 `counts.jsonl`。结束时写入 `summary.json`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  run_dir: Mutex<Option<PathBuf>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      run_dir: Mutex::new(None),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  /// 本次运行的目录，首次使用时创建
  pub fn run_dir(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let mut run_dir = self.run_dir.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(dir) = run_dir.as_ref() {
      return Ok(dir.clone());
    }

    let now = Utc::now();
    let dir = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(now.format("%H-%M-%S").to_string());
    std::fs::create_dir_all(&dir)?;
    info!("记录目录: {}", dir.display());

    *run_dir = Some(dir.clone());
    Ok(dir)
  }

  fn append_line(path: &Path, line: &serde_json::Value) -> Result<(), DirectoryRecordOutputError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, line)?;
    file.write_all(b"\n")?;
    Ok(())
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_image(&self, report: &ImageReport) -> Result<(), Self::Error> {
    let dir = self.run_dir()?;
    report.original.save(dir.join("original.png"))?;
    report.annotated.save(dir.join("annotated.png"))?;
    std::fs::write(
      dir.join("counts.json"),
      serde_json::to_vec_pretty(&report.counts)?,
    )?;
    Ok(())
  }

  fn render_frame(&self, report: &FrameReport) -> Result<(), Self::Error> {
    let dir = self.run_dir()?;
    if self.always || !report.counts.is_empty() {
      let path = dir.join(format!("frame-{:06}.png", report.index));
      report.frame.save(&path)?;
      debug!("保存帧: {}", path.display());
    }

    let line = serde_json::json!({
      "frame": report.index,
      "degraded": report.degraded,
      "counts": report.counts,
      "totals": report.totals,
    });
    Self::append_line(&dir.join("counts.jsonl"), &line)
  }

  fn finish(&self, status: &RunStatus) -> Result<(), Self::Error> {
    let dir = self.run_dir()?;
    std::fs::write(
      dir.join("summary.json"),
      serde_json::to_vec_pretty(&status.to_json())?,
    )?;
    info!("{} ({})", status.message(), dir.display());
    Ok(())
  }
}
