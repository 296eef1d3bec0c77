// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/bin/jiedao_detect.rs - 命令行入口
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

use std::{fmt::Display, path::Path, path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use jiedao::{
  FromUrl,
  config::{CountingPolicy, DEFAULT_CONFIDENCE, PipelineConfig},
  input::{MediaKind, Upload, VideoOpener},
  model::{Deadline, Detector, ReplayDetector},
  output::{OutputWrapper, draw::Annotator},
  pipeline::{CancelToken, MediaPipeline},
  registry::ClassRegistry,
  task::{self, Pacing, RunStatus},
};

/// Jiedao 街道目标检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入的图片或视频文件，省略时只输出提示
  #[arg(long, value_name = "FILE")]
  pub input: Option<PathBuf>,

  /// 媒体类型（如 image/png、video/mp4），省略时按扩展名推断
  #[arg(long, value_name = "MIME")]
  pub media_type: Option<String>,

  /// 检测器，例如 replay:///data/detections.json
  #[arg(long, value_name = "DETECTOR")]
  pub detector: Url,

  /// 输出方式
  /// 支持格式:
  /// - 日志: log:stdout
  /// - 图片: image:///out/result.png[?compare]
  /// - 目录: folder:///out/records[?always]
  #[arg(long, value_name = "OUTPUT", default_value = "log:stdout")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0]
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 视频计数方式: per-frame 或 cumulative
  #[arg(long, default_value = "per-frame", value_name = "POLICY")]
  pub counting: CountingPolicy,

  /// 单次推理超时（毫秒）
  #[arg(long, value_name = "MS")]
  pub timeout_ms: Option<u64>,

  /// 标签字体文件，省略时使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 类别表 JSON 文件，省略时使用内置的城市道路类别
  #[arg(long, value_name = "FILE")]
  pub classes: Option<PathBuf>,

  /// 处理完立即输出视频帧，不按视频帧率等待
  #[arg(long)]
  pub immediate: bool,
}

#[cfg(feature = "gstreamer_input")]
fn opener() -> impl VideoOpener {
  jiedao::input::GStreamerOpener
}

#[cfg(not(feature = "gstreamer_input"))]
enum NoDecoder {}

#[cfg(not(feature = "gstreamer_input"))]
impl Iterator for NoDecoder {
  type Item = Result<image::RgbImage, jiedao::input::DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    match *self {}
  }
}

#[cfg(not(feature = "gstreamer_input"))]
impl jiedao::input::FrameSource for NoDecoder {
  fn fps(&self) -> Option<f64> {
    match *self {}
  }
}

#[cfg(not(feature = "gstreamer_input"))]
fn opener() -> impl VideoOpener {
  |_: &Path| -> Result<NoDecoder, jiedao::input::DecodeError> {
    Err(jiedao::input::DecodeError::Open(
      "视频解码需要启用 gstreamer_input 特性".to_string(),
    ))
  }
}

fn load_upload(path: &Path, media_type: Option<&str>) -> Result<Upload> {
  let media_type = match media_type {
    Some(media_type) => media_type.to_string(),
    None => MediaKind::media_type_for_path(path)
      .ok_or_else(|| anyhow!("无法识别的文件类型: {}", path.display()))?
      .to_string(),
  };
  let bytes = std::fs::read(path)?;
  info!("读取输入: {} ({}, {} 字节)", path.display(), media_type, bytes.len());
  Ok(Upload::new(media_type, bytes))
}

struct Run<'a> {
  config: PipelineConfig,
  registry: ClassRegistry,
  annotator: Annotator,
  upload: Option<Upload>,
  output: &'a OutputWrapper,
  cancel: &'a CancelToken,
  pacing: Pacing,
}

impl Run<'_> {
  fn with<D>(self, detector: D) -> RunStatus
  where
    D: Detector,
    D::Error: Display,
  {
    let pipeline = MediaPipeline::new(self.config, self.registry, self.annotator, detector);
    task::run_upload(
      &pipeline,
      self.upload,
      &opener(),
      self.output,
      self.cancel,
      self.pacing,
    )
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测器: {}", args.detector);
  info!("输出方式: {}", args.output);

  let config = PipelineConfig::builder()
    .confidence(args.confidence)
    .counting(args.counting)
    .build()?;
  let registry = match &args.classes {
    Some(path) => ClassRegistry::from_json(&std::fs::read_to_string(path)?)?,
    None => ClassRegistry::urban(),
  };
  let annotator = match &args.font {
    Some(path) => Annotator::from_font_file(path)?,
    None => Annotator::default(),
  };
  let detector = ReplayDetector::from_url(&args.detector)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let upload = args
    .input
    .as_deref()
    .map(|path| load_upload(path, args.media_type.as_deref()))
    .transpose()?;

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，正在停止...");
      cancel.cancel();
    })?;
  }

  let run = Run {
    config,
    registry,
    annotator,
    upload,
    output: &output,
    cancel: &cancel,
    pacing: if args.immediate {
      Pacing::Immediate
    } else {
      Pacing::Realtime
    },
  };
  let status = match args.timeout_ms {
    Some(ms) => run.with(Deadline::new(detector, Duration::from_millis(ms))?),
    None => run.with(detector),
  };

  println!("{}", status.message());
  if let RunStatus::Failed(reason) = status {
    bail!(reason);
  }
  Ok(())
}
