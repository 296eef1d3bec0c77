// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/task.rs - 单次上传的处理任务
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
  fmt::Display,
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  count::{DetectionCounts, NO_OBJECTS_MESSAGE},
  input::{MediaKind, Upload, VideoOpener},
  model::Detector,
  output::Render,
  pipeline::{CancelToken, EndReason, MediaPipeline, PipelineError, VideoSummary},
};

pub const NO_INPUT_MESSAGE: &str = "Carga una imagen o video para comenzar.";
pub const VIDEO_DONE_MESSAGE: &str = "Video procesado correctamente";
pub const VIDEO_CANCELLED_MESSAGE: &str = "Procesamiento de video cancelado";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error(transparent)]
  Pipeline(#[from] PipelineError),
  #[error("输出错误: {0}")]
  Render(String),
}

/// 一次运行的最终状态，总会被交给显示端
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
  NoInput,
  Image { counts: DetectionCounts },
  Video(VideoSummary),
  Failed(String),
}

impl RunStatus {
  /// 面向用户的状态文字
  pub fn message(&self) -> String {
    match self {
      RunStatus::NoInput => NO_INPUT_MESSAGE.to_string(),
      RunStatus::Image { counts } if counts.is_empty() => NO_OBJECTS_MESSAGE.to_string(),
      RunStatus::Image { counts } => format!("Objetos detectados: {}", counts.total()),
      RunStatus::Video(summary) => match summary.end {
        EndReason::Cancelled => VIDEO_CANCELLED_MESSAGE.to_string(),
        _ => VIDEO_DONE_MESSAGE.to_string(),
      },
      RunStatus::Failed(reason) => format!("Error: {}", reason),
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    let message = self.message();
    match self {
      RunStatus::NoInput => serde_json::json!({ "status": "no-input", "message": message }),
      RunStatus::Image { counts } => serde_json::json!({
        "status": "image",
        "message": message,
        "counts": counts,
      }),
      RunStatus::Video(summary) => serde_json::json!({
        "status": "video",
        "message": message,
        "frames": summary.frames_emitted,
        "degraded_frames": summary.degraded_frames,
        "end": format!("{:?}", summary.end),
        "totals": summary.totals,
      }),
      RunStatus::Failed(reason) => serde_json::json!({
        "status": "failed",
        "message": message,
        "reason": reason,
      }),
    }
  }
}

/// 视频帧的输出节奏
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
  /// 处理完立即输出
  Immediate,
  /// 按视频自身的帧率输出
  #[default]
  Realtime,
}

struct FramePacer {
  pacing: Pacing,
  start: Instant,
  interval: Option<Duration>,
}

impl FramePacer {
  fn new(pacing: Pacing) -> Self {
    Self {
      pacing,
      start: Instant::now(),
      interval: None,
    }
  }

  fn wait_for(&mut self, index: u64, fps: Option<f64>) {
    if self.pacing != Pacing::Realtime {
      return;
    }
    // 帧率可能在第一帧解码后才知道
    let interval = match self.interval {
      Some(interval) => interval,
      None => {
        let Some(fps) = fps.filter(|fps| *fps > 0.0) else {
          return;
        };
        let interval = Duration::from_secs_f64(1.0 / fps);
        self.start = Instant::now()
          .checked_sub(interval.mul_f64(index as f64))
          .unwrap_or_else(Instant::now);
        self.interval = Some(interval);
        interval
      }
    };

    let due = self.start + interval.mul_f64(index as f64);
    let now = Instant::now();
    if due > now {
      thread::sleep(due - now);
    }
  }
}

/// 处理一次上传并把结果交给显示端
///
/// 所有检测和解码错误都在这里转换为 [`RunStatus`]，不会直接传给显示端。
pub fn run_upload<D, O, R>(
  pipeline: &MediaPipeline<D>,
  upload: Option<Upload>,
  opener: &O,
  output: &R,
  cancel: &CancelToken,
  pacing: Pacing,
) -> RunStatus
where
  D: Detector,
  D::Error: Display,
  O: VideoOpener,
  R: Render,
  R::Error: Display,
{
  let status = match upload {
    None => {
      info!("没有输入");
      RunStatus::NoInput
    }
    Some(upload) => match run_inner(pipeline, &upload, opener, output, cancel, pacing) {
      Ok(status) => status,
      Err(e) => {
        error!("处理失败: {}", e);
        RunStatus::Failed(e.to_string())
      }
    },
  };

  if let Err(e) = output.finish(&status) {
    warn!("输出收尾失败: {}", e);
  }
  status
}

fn run_inner<D, O, R>(
  pipeline: &MediaPipeline<D>,
  upload: &Upload,
  opener: &O,
  output: &R,
  cancel: &CancelToken,
  pacing: Pacing,
) -> Result<RunStatus, TaskError>
where
  D: Detector,
  D::Error: Display,
  O: VideoOpener,
  R: Render,
  R::Error: Display,
{
  match upload.kind().map_err(PipelineError::from)? {
    MediaKind::Image => {
      info!("处理图片 ({} 字节)", upload.bytes.len());
      let report = pipeline.run_image_bytes(&upload.bytes)?;
      output
        .render_image(&report)
        .map_err(|e| TaskError::Render(e.to_string()))?;
      Ok(RunStatus::Image {
        counts: report.counts,
      })
    }
    MediaKind::Video => {
      info!("处理视频 ({} 字节)", upload.bytes.len());
      let mut run = pipeline.open_video(&upload.bytes, &upload.media_type, opener, cancel.clone())?;
      let mut pacer = FramePacer::new(pacing);
      while let Some(report) = run.next() {
        pacer.wait_for(report.index, run.fps());
        output
          .render_frame(&report)
          .map_err(|e| TaskError::Render(e.to_string()))?;
      }
      Ok(RunStatus::Video(run.finish()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::ClassRegistry;

  #[test]
  fn status_messages() {
    assert_eq!(RunStatus::NoInput.message(), NO_INPUT_MESSAGE);
    assert_eq!(
      RunStatus::Image {
        counts: DetectionCounts::new()
      }
      .message(),
      NO_OBJECTS_MESSAGE
    );

    let summary = VideoSummary {
      frames_emitted: 3,
      degraded_frames: 0,
      end: EndReason::DecodeFailure("bad packet".to_string()),
      totals: None,
    };
    assert_eq!(RunStatus::Video(summary.clone()).message(), VIDEO_DONE_MESSAGE);
    let cancelled = VideoSummary {
      end: EndReason::Cancelled,
      ..summary
    };
    assert_eq!(RunStatus::Video(cancelled).message(), VIDEO_CANCELLED_MESSAGE);
  }

  #[test]
  fn status_json_carries_counts() {
    let mut counts = DetectionCounts::new();
    counts.accumulate(
      &[crate::model::Detection::new(
        2,
        0.9,
        crate::model::BBox::new(0, 0, 1, 1),
      )],
      &ClassRegistry::urban(),
    );
    let json = RunStatus::Image { counts }.to_json();
    assert_eq!(json["status"], "image");
    assert_eq!(json["counts"]["Carro"], 1);
  }

  #[test]
  fn video_is_paced_at_source_fps_by_default() {
    assert_eq!(Pacing::default(), Pacing::Realtime);
  }

  #[test]
  fn immediate_pacing_never_sleeps() {
    let mut pacer = FramePacer::new(Pacing::Immediate);
    let now = Instant::now();
    for index in 0..5 {
      pacer.wait_for(index, Some(1.0));
    }
    assert!(now.elapsed() < Duration::from_millis(500));
  }

  #[test]
  fn realtime_pacing_follows_fps() {
    let mut pacer = FramePacer::new(Pacing::Realtime);
    let now = Instant::now();
    for index in 0..4 {
      pacer.wait_for(index, Some(50.0));
    }
    // 第 3 帧应在 60ms 之后
    assert!(now.elapsed() >= Duration::from_millis(55));
  }
}
