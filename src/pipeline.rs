// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/pipeline.rs - 图像/视频处理流水线
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{CountingPolicy, PipelineConfig},
  count::{DetectionCounts, NO_OBJECTS_MESSAGE},
  filter::filter_detections,
  input::{DecodeError, FrameSource, InputError, MediaKind, StagedMedia, VideoOpener, decode_image},
  model::{DetectParams, Detection, Detector},
  output::draw::{Annotator, Overlay},
  registry::ClassRegistry,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("不支持的媒体: {0}")]
  UnsupportedMedia(String),
  #[error("输入错误: {0}")]
  Input(InputError),
  #[error("视频无法解码: {0}")]
  VideoOpen(DecodeError),
  #[error("无效的帧尺寸: {0}x{1}")]
  InvalidFrame(u32, u32),
  #[error("推理失败: {0}")]
  Inference(String),
}

impl From<InputError> for PipelineError {
  fn from(err: InputError) -> Self {
    match err {
      InputError::UnsupportedMedia(kind) => PipelineError::UnsupportedMedia(kind),
      InputError::ImageError(e) => PipelineError::UnsupportedMedia(format!("图片无法解码: {}", e)),
      other => PipelineError::Input(other),
    }
  }
}

/// 流水线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  LoadingInput,
  Inference,
  Filtering,
  Annotating,
  Summarizing,
  OpenStream,
  Decode,
  Emit,
  CloseStream,
  Done,
  Error,
}

fn enter(state: &mut PipelineState, next: PipelineState) {
  debug!("流水线状态: {:?} -> {:?}", state, next);
  *state = next;
}

/// 外部取消标记，可跨线程共享
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 单张图片的处理结果
#[derive(Debug, Clone)]
pub struct ImageReport {
  pub original: RgbImage,
  pub annotated: RgbImage,
  pub overlay: Overlay,
  pub counts: DetectionCounts,
}

impl ImageReport {
  /// 没有检测到目标时返回空状态提示
  pub fn empty_state(&self) -> Option<&'static str> {
    self.counts.is_empty().then_some(NO_OBJECTS_MESSAGE)
  }
}

/// 视频中一帧的处理结果
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub index: u64,
  /// 原地标注后的帧
  pub frame: RgbImage,
  pub overlay: Overlay,
  /// 本帧的计数
  pub counts: DetectionCounts,
  /// 累计计数，仅在 `CountingPolicy::Cumulative` 下存在
  pub totals: Option<DetectionCounts>,
  /// 推理失败时输出未标注的原始帧
  pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
  EndOfStream,
  /// 解码失败视为流结束，已输出的帧仍然有效
  DecodeFailure(String),
  Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoSummary {
  pub frames_emitted: u64,
  pub degraded_frames: u64,
  pub end: EndReason,
  pub totals: Option<DetectionCounts>,
}

/// 媒体处理流水线
///
/// 检测器由调用者创建并注入，流水线不负责模型的缓存。
pub struct MediaPipeline<D> {
  config: PipelineConfig,
  registry: ClassRegistry,
  annotator: Annotator,
  params: DetectParams,
  detector: D,
}

impl<D> MediaPipeline<D> {
  pub fn new(
    config: PipelineConfig,
    registry: ClassRegistry,
    annotator: Annotator,
    detector: D,
  ) -> Self {
    let params = DetectParams::new(&config, &registry);
    Self {
      config,
      registry,
      annotator,
      params,
      detector,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn registry(&self) -> &ClassRegistry {
    &self.registry
  }

  pub fn detector(&self) -> &D {
    &self.detector
  }

  pub fn params(&self) -> &DetectParams {
    &self.params
  }
}

impl<D> MediaPipeline<D>
where
  D: Detector,
  D::Error: Display,
{
  fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, PipelineError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      return Err(PipelineError::InvalidFrame(width, height));
    }
    self
      .detector
      .detect(frame, &self.params)
      .map_err(|e| PipelineError::Inference(e.to_string()))
  }

  /// 处理单张图片：推理、过滤、在副本上标注并统计
  pub fn run_image(&self, image: RgbImage) -> Result<ImageReport, PipelineError> {
    let mut state = PipelineState::LoadingInput;
    match self.run_image_inner(image, &mut state) {
      Ok(report) => {
        enter(&mut state, PipelineState::Done);
        Ok(report)
      }
      Err(e) => {
        enter(&mut state, PipelineState::Error);
        error!("图片处理失败: {}", e);
        Err(e)
      }
    }
  }

  fn run_image_inner(
    &self,
    image: RgbImage,
    state: &mut PipelineState,
  ) -> Result<ImageReport, PipelineError> {
    enter(state, PipelineState::Inference);
    let now = Instant::now();
    let raw = self.detect(&image)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    enter(state, PipelineState::Filtering);
    let detections = filter_detections(raw, &self.registry);

    enter(state, PipelineState::Annotating);
    let (annotated, overlay) =
      self
        .annotator
        .annotate(&image, &detections, &self.registry, self.config.still_stroke);

    enter(state, PipelineState::Summarizing);
    let mut counts = DetectionCounts::new();
    counts.accumulate(&detections, &self.registry);
    info!("检测到 {} 个目标", counts.total());

    Ok(ImageReport {
      original: image,
      annotated,
      overlay,
      counts,
    })
  }

  /// 解码图片字节后处理
  pub fn run_image_bytes(&self, bytes: &[u8]) -> Result<ImageReport, PipelineError> {
    let image = decode_image(bytes)?;
    self.run_image(image)
  }

  /// 暂存上传的视频并打开解码器
  pub fn open_video<O: VideoOpener>(
    &self,
    bytes: &[u8],
    media_type: &str,
    opener: &O,
    cancel: CancelToken,
  ) -> Result<VideoRun<'_, D, O::Source>, PipelineError> {
    if MediaKind::from_media_type(media_type)? != MediaKind::Video {
      return Err(PipelineError::UnsupportedMedia(media_type.to_string()));
    }

    let staged = StagedMedia::stage(bytes, MediaKind::staging_suffix(media_type))?;
    match opener.open(staged.path()) {
      Ok(source) => {
        let mut run = self.stream(source, cancel);
        run.staged = Some(staged);
        Ok(run)
      }
      Err(e) => {
        staged.remove();
        error!("视频无法打开: {}", e);
        Err(PipelineError::VideoOpen(e))
      }
    }
  }

  /// 直接处理一个已打开的帧源
  pub fn stream<S: FrameSource>(&self, source: S, cancel: CancelToken) -> VideoRun<'_, D, S> {
    let mut state = PipelineState::Idle;
    enter(&mut state, PipelineState::OpenStream);
    VideoRun {
      pipeline: self,
      source: Some(source),
      staged: None,
      cancel,
      state,
      next_index: 0,
      degraded: 0,
      totals: DetectionCounts::new(),
      end: None,
    }
  }
}

/// 一次视频处理过程，逐帧产生 [`FrameReport`]
///
/// 帧严格按解码顺序输出。流结束、解码失败、取消或提前释放时，
/// 视频流和暂存文件都会被释放。
pub struct VideoRun<'p, D, S> {
  pipeline: &'p MediaPipeline<D>,
  source: Option<S>,
  staged: Option<StagedMedia>,
  cancel: CancelToken,
  state: PipelineState,
  next_index: u64,
  degraded: u64,
  totals: DetectionCounts,
  end: Option<EndReason>,
}

impl<D, S> VideoRun<'_, D, S> {
  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn staged_path(&self) -> Option<&std::path::Path> {
    self.staged.as_ref().map(StagedMedia::path)
  }

  pub fn summary(&self) -> VideoSummary {
    VideoSummary {
      frames_emitted: self.next_index,
      degraded_frames: self.degraded,
      end: self.end.clone().unwrap_or(EndReason::Cancelled),
      totals: (self.pipeline.config.counting == CountingPolicy::Cumulative)
        .then(|| self.totals.clone()),
    }
  }

  /// 停止处理并释放资源
  pub fn finish(mut self) -> VideoSummary {
    if self.end.is_none() {
      self.close(EndReason::Cancelled);
    }
    self.summary()
  }

  fn close(&mut self, reason: EndReason) {
    enter(&mut self.state, PipelineState::CloseStream);
    drop(self.source.take());
    if let Some(staged) = self.staged.take() {
      staged.remove();
    }
    info!(
      "视频处理结束 ({:?}): 输出 {} 帧，其中 {} 帧推理失败",
      reason, self.next_index, self.degraded
    );
    self.end = Some(reason);
    enter(&mut self.state, PipelineState::Done);
  }
}

impl<D, S: FrameSource> VideoRun<'_, D, S> {
  pub fn fps(&self) -> Option<f64> {
    self.source.as_ref().and_then(|source| source.fps())
  }
}

impl<D, S> VideoRun<'_, D, S>
where
  D: Detector,
  D::Error: Display,
  S: FrameSource,
{
  fn process(&mut self, mut frame: RgbImage) -> FrameReport {
    let pipeline = self.pipeline;
    let index = self.next_index;

    enter(&mut self.state, PipelineState::Inference);
    let (raw, degraded) = match pipeline.detect(&frame) {
      Ok(raw) => (raw, false),
      Err(e) => {
        warn!("第 {} 帧推理失败，输出未标注的帧: {}", index, e);
        self.degraded += 1;
        (Vec::new(), true)
      }
    };

    enter(&mut self.state, PipelineState::Filtering);
    let detections = filter_detections(raw, &pipeline.registry);

    enter(&mut self.state, PipelineState::Annotating);
    let overlay = pipeline.annotator.annotate_in_place(
      &mut frame,
      &detections,
      &pipeline.registry,
      pipeline.config.video_stroke,
    );

    let mut counts = DetectionCounts::new();
    counts.accumulate(&detections, &pipeline.registry);
    let totals = match pipeline.config.counting {
      CountingPolicy::PerFrame => None,
      CountingPolicy::Cumulative => {
        self.totals.merge(&counts);
        Some(self.totals.clone())
      }
    };

    enter(&mut self.state, PipelineState::Emit);
    self.next_index += 1;
    FrameReport {
      index,
      frame,
      overlay,
      counts,
      totals,
      degraded,
    }
  }
}

impl<D, S> Iterator for VideoRun<'_, D, S>
where
  D: Detector,
  D::Error: Display,
  S: FrameSource,
{
  type Item = FrameReport;

  fn next(&mut self) -> Option<Self::Item> {
    if self.end.is_some() {
      return None;
    }
    if self.cancel.is_cancelled() {
      info!("收到取消请求，停止处理");
      self.close(EndReason::Cancelled);
      return None;
    }

    enter(&mut self.state, PipelineState::Decode);
    let decoded = self.source.as_mut().and_then(|source| source.next());
    match decoded {
      None => {
        self.close(EndReason::EndOfStream);
        None
      }
      Some(Err(e)) => {
        warn!("第 {} 帧解码失败，视为流结束: {}", self.next_index, e);
        self.close(EndReason::DecodeFailure(e.to_string()));
        None
      }
      Some(Ok(frame)) if frame.width() == 0 || frame.height() == 0 => {
        let reason = format!("空帧 {}x{}", frame.width(), frame.height());
        warn!("第 {} 帧无效，视为流结束: {}", self.next_index, reason);
        self.close(EndReason::DecodeFailure(reason));
        None
      }
      Some(Ok(frame)) => Some(self.process(frame)),
    }
  }
}

impl<D, S> Drop for VideoRun<'_, D, S> {
  fn drop(&mut self) {
    // 消费者提前停止拉取帧
    if self.end.is_none() {
      self.close(EndReason::Cancelled);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;
  use image::Rgb;
  use std::convert::Infallible;

  struct Fixed(Vec<Detection>);

  impl Detector for Fixed {
    type Error = Infallible;

    fn detect(&self, _: &RgbImage, _: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  struct Failing;

  impl Detector for Failing {
    type Error = String;

    fn detect(&self, _: &RgbImage, _: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
      Err("model exploded".to_string())
    }
  }

  struct Frames(std::vec::IntoIter<Result<RgbImage, DecodeError>>);

  impl Iterator for Frames {
    type Item = Result<RgbImage, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.0.next()
    }
  }

  impl FrameSource for Frames {
    fn fps(&self) -> Option<f64> {
      Some(25.0)
    }
  }

  fn frames(n: usize) -> Frames {
    Frames(
      (0..n)
        .map(|_| Ok(RgbImage::from_pixel(32, 32, Rgb([9, 9, 9]))))
        .collect::<Vec<_>>()
        .into_iter(),
    )
  }

  fn pipeline<D>(detector: D, counting: CountingPolicy) -> MediaPipeline<D> {
    let config = PipelineConfig::builder().counting(counting).build().unwrap();
    MediaPipeline::new(
      config,
      ClassRegistry::urban(),
      Annotator::without_font(),
      detector,
    )
  }

  #[test]
  fn image_path_filters_before_counting() {
    let pipeline = pipeline(
      Fixed(vec![
        Detection::new(2, 0.9, BBox::new(1, 1, 10, 10)),
        Detection::new(14, 0.9, BBox::new(1, 1, 10, 10)),
      ]),
      CountingPolicy::PerFrame,
    );
    let report = pipeline
      .run_image(RgbImage::from_pixel(20, 20, Rgb([0, 0, 0])))
      .unwrap();
    assert_eq!(report.overlay.len(), 1);
    assert_eq!(report.counts.get("Carro"), Some(1));
    assert_eq!(report.empty_state(), None);
  }

  #[test]
  fn image_inference_failure_aborts() {
    let pipeline = pipeline(Failing, CountingPolicy::PerFrame);
    let err = pipeline.run_image(RgbImage::new(8, 8)).unwrap_err();
    assert!(matches!(err, PipelineError::Inference(ref msg) if msg == "model exploded"));
  }

  #[test]
  fn empty_image_is_rejected_before_inference() {
    let pipeline = pipeline(Fixed(Vec::new()), CountingPolicy::PerFrame);
    assert!(matches!(
      pipeline.run_image(RgbImage::new(0, 0)),
      Err(PipelineError::InvalidFrame(0, 0))
    ));
  }

  #[test]
  fn undecodable_image_bytes_are_unsupported() {
    let pipeline = pipeline(Fixed(Vec::new()), CountingPolicy::PerFrame);
    assert!(matches!(
      pipeline.run_image_bytes(b"not an image"),
      Err(PipelineError::UnsupportedMedia(_))
    ));
  }

  #[test]
  fn video_inference_failure_degrades_frames() {
    let pipeline = pipeline(Failing, CountingPolicy::PerFrame);
    let mut run = pipeline.stream(frames(3), CancelToken::new());
    let reports: Vec<FrameReport> = run.by_ref().collect();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.degraded && r.counts.is_empty()));
    assert_eq!(
      reports.iter().map(|r| r.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );

    let summary = run.finish();
    assert_eq!(summary.degraded_frames, 3);
    assert_eq!(summary.end, EndReason::EndOfStream);
  }

  #[test]
  fn cumulative_policy_keeps_running_totals() {
    let pipeline = pipeline(
      Fixed(vec![Detection::new(0, 0.9, BBox::new(1, 1, 5, 5))]),
      CountingPolicy::Cumulative,
    );
    let mut run = pipeline.stream(frames(4), CancelToken::new());
    let last = run.by_ref().last().unwrap();
    assert_eq!(last.counts.get("Persona"), Some(1));
    assert_eq!(last.totals.as_ref().and_then(|t| t.get("Persona")), Some(4));

    let summary = run.finish();
    assert_eq!(summary.totals.unwrap().get("Persona"), Some(4));
  }

  #[test]
  fn per_frame_policy_has_no_totals() {
    let pipeline = pipeline(
      Fixed(vec![Detection::new(0, 0.9, BBox::new(1, 1, 5, 5))]),
      CountingPolicy::PerFrame,
    );
    let mut run = pipeline.stream(frames(2), CancelToken::new());
    assert!(run.by_ref().all(|r| r.totals.is_none()));
    assert_eq!(run.finish().totals, None);
  }

  #[test]
  fn cancellation_stops_before_next_decode() {
    let pipeline = pipeline(Fixed(Vec::new()), CountingPolicy::PerFrame);
    let cancel = CancelToken::new();
    let mut run = pipeline.stream(frames(10), cancel.clone());
    assert!(run.next().is_some());
    assert!(run.next().is_some());
    cancel.cancel();
    assert!(run.next().is_none());
    assert_eq!(run.state(), PipelineState::Done);

    let summary = run.finish();
    assert_eq!(summary.frames_emitted, 2);
    assert_eq!(summary.end, EndReason::Cancelled);
  }
}
