// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/model/deadline.rs - 带超时的推理调用
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
  time::Duration,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{DetectParams, Detection, Detector};

#[derive(Error, Debug)]
pub enum DeadlineError<E> {
  #[error("推理超时: {0:?}")]
  Timeout(Duration),
  #[error("上一次推理仍未结束")]
  Busy,
  #[error("检测器错误: {0}")]
  Inner(E),
  #[error("推理线程创建失败: {0}")]
  Spawn(std::io::Error),
  #[error("推理线程异常退出")]
  Disconnected,
}

struct Job<E> {
  frame: RgbImage,
  params: DetectParams,
  reply: mpsc::Sender<Result<Vec<Detection>, E>>,
}

/// 为同步检测器加上调用超时
///
/// 检测器在唯一的后台线程中按顺序执行，同一时刻最多只有一次调用。
/// 超时的调用被放弃但仍在后台执行，在它结束之前的调用直接返回
/// [`DeadlineError::Busy`]，调用者把两者都当作单帧失败处理。
pub struct Deadline<D: Detector> {
  jobs: mpsc::Sender<Job<D::Error>>,
  busy: Arc<AtomicBool>,
  timeout: Duration,
}

impl<D> Deadline<D>
where
  D: Detector + Send + 'static,
  D::Error: Send + 'static,
{
  pub fn new(inner: D, timeout: Duration) -> Result<Self, DeadlineError<D::Error>> {
    let (jobs, queue) = mpsc::channel::<Job<D::Error>>();
    let busy = Arc::new(AtomicBool::new(false));
    let worker_busy = Arc::clone(&busy);

    thread::Builder::new()
      .name("jiedao-infer".to_string())
      .spawn(move || {
        // 发送端释放后队列结束，线程随之退出
        for job in queue {
          let result = inner.detect(&job.frame, &job.params);
          worker_busy.store(false, Ordering::SeqCst);
          // 超时的调用已经不再接收结果
          let _ = job.reply.send(result);
        }
        debug!("推理线程退出");
      })
      .map_err(DeadlineError::Spawn)?;

    Ok(Self {
      jobs,
      busy,
      timeout,
    })
  }
}

impl<D: Detector> Deadline<D> {
  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// 后台线程是否仍在执行一次调用
  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::SeqCst)
  }
}

impl<D: Detector> Detector for Deadline<D> {
  type Error = DeadlineError<D::Error>;

  fn detect(&self, frame: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
    if self
      .busy
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      warn!("上一次推理仍未结束，跳过本次调用");
      return Err(DeadlineError::Busy);
    }

    let (reply, result) = mpsc::channel();
    let job = Job {
      frame: frame.clone(),
      params: params.clone(),
      reply,
    };
    if self.jobs.send(job).is_err() {
      self.busy.store(false, Ordering::SeqCst);
      return Err(DeadlineError::Disconnected);
    }

    match result.recv_timeout(self.timeout) {
      Ok(result) => result.map_err(DeadlineError::Inner),
      Err(mpsc::RecvTimeoutError::Timeout) => {
        warn!("推理超过 {:?} 未返回", self.timeout);
        Err(DeadlineError::Timeout(self.timeout))
      }
      Err(mpsc::RecvTimeoutError::Disconnected) => {
        self.busy.store(false, Ordering::SeqCst);
        Err(DeadlineError::Disconnected)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;
  use std::{
    sync::{Mutex, atomic::AtomicUsize},
    thread::ThreadId,
    time::Instant,
  };

  #[derive(Default)]
  struct CallStats {
    started: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    threads: Mutex<Vec<ThreadId>>,
  }

  struct Sleepy {
    delay: Duration,
    stats: Arc<CallStats>,
  }

  impl Sleepy {
    fn new(delay: Duration) -> (Self, Arc<CallStats>) {
      let stats = Arc::new(CallStats::default());
      (
        Self {
          delay,
          stats: Arc::clone(&stats),
        },
        stats,
      )
    }
  }

  impl Detector for Sleepy {
    type Error = String;

    fn detect(&self, frame: &RgbImage, _: &DetectParams) -> Result<Vec<Detection>, Self::Error> {
      self.stats.started.fetch_add(1, Ordering::SeqCst);
      let running = self.stats.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.stats.peak.fetch_max(running, Ordering::SeqCst);
      self.stats.threads.lock().unwrap().push(thread::current().id());
      thread::sleep(self.delay);
      self.stats.running.fetch_sub(1, Ordering::SeqCst);
      if frame.width() == 0 {
        return Err("empty frame".to_string());
      }
      Ok(vec![Detection::new(0, 0.5, BBox::new(0, 0, 1, 1))])
    }
  }

  fn params() -> DetectParams {
    DetectParams {
      confidence: 0.35,
      iou: 0.6,
      input_size: 960,
      classes: vec![0],
      agnostic_nms: false,
    }
  }

  fn wait_idle<D: Detector>(detector: &Deadline<D>) {
    let start = Instant::now();
    while detector.is_busy() && start.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(5));
    }
  }

  #[test]
  fn fast_detector_runs_on_one_worker() {
    let (inner, stats) = Sleepy::new(Duration::ZERO);
    let detector = Deadline::new(inner, Duration::from_secs(5)).unwrap();
    for _ in 0..3 {
      let result = detector.detect(&RgbImage::new(2, 2), &params()).unwrap();
      assert_eq!(result.len(), 1);
    }

    let threads = stats.threads.lock().unwrap();
    assert_eq!(threads.len(), 3);
    assert!(threads.iter().all(|id| *id == threads[0]));
    assert_ne!(threads[0], thread::current().id());
  }

  #[test]
  fn detector_errors_pass_through() {
    let (inner, _) = Sleepy::new(Duration::ZERO);
    let detector = Deadline::new(inner, Duration::from_secs(5)).unwrap();
    let err = detector.detect(&RgbImage::new(0, 0), &params()).unwrap_err();
    assert!(matches!(err, DeadlineError::Inner(ref msg) if msg == "empty frame"));
    assert!(!detector.is_busy());
  }

  #[test]
  fn hung_call_blocks_later_calls_without_piling_up() {
    let (inner, stats) = Sleepy::new(Duration::from_millis(300));
    let detector = Deadline::new(inner, Duration::from_millis(20)).unwrap();
    let frame = RgbImage::new(64, 48);

    let err = detector.detect(&frame, &params()).unwrap_err();
    assert!(matches!(err, DeadlineError::Timeout(_)));

    for _ in 0..20 {
      assert!(matches!(
        detector.detect(&frame, &params()),
        Err(DeadlineError::Busy)
      ));
    }
    assert_eq!(stats.started.load(Ordering::SeqCst), 1);

    wait_idle(&detector);
    assert!(matches!(
      detector.detect(&frame, &params()),
      Err(DeadlineError::Timeout(_))
    ));
    wait_idle(&detector);

    assert_eq!(stats.started.load(Ordering::SeqCst), 2);
    assert_eq!(stats.peak.load(Ordering::SeqCst), 1);
  }
}
