// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  count::DetectionCounts,
  output::Render,
  pipeline::{FrameReport, ImageReport},
  task::RunStatus,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 只把计数快照写入日志，不保存图像
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(uri.scheme().to_string()));
    }
    Ok(LogOutput)
  }
}

fn describe(counts: &DetectionCounts) -> String {
  counts
    .iter()
    .map(|(name, count)| format!("{}={}", name, count))
    .collect::<Vec<_>>()
    .join(", ")
}

impl Render for LogOutput {
  type Error = LogOutputError;

  fn render_image(&self, report: &ImageReport) -> Result<(), Self::Error> {
    match report.empty_state() {
      Some(message) => warn!("{}", message),
      None => info!("检测结果: {}", describe(&report.counts)),
    }
    Ok(())
  }

  fn render_frame(&self, report: &FrameReport) -> Result<(), Self::Error> {
    if report.degraded {
      warn!("帧 {}: 推理失败，未标注", report.index);
    } else if !report.counts.is_empty() {
      info!("帧 {}: {}", report.index, describe(&report.counts));
    }
    Ok(())
  }

  fn finish(&self, status: &RunStatus) -> Result<(), Self::Error> {
    info!("{}", status.message());
    Ok(())
  }
}
