// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/input/staging.rs - 上传视频的临时文件
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
  io::Write,
  path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::input::InputError;

const STAGING_PREFIX: &str = "jiedao-upload-";

/// 解码器只能按路径打开视频，上传内容先写入一个唯一命名的临时文件
///
/// 文件随 `StagedMedia` 一起销毁；删除失败只记录日志。
#[derive(Debug)]
pub struct StagedMedia {
  file: NamedTempFile,
}

impl StagedMedia {
  pub fn stage(bytes: &[u8], suffix: &str) -> Result<Self, InputError> {
    let mut file = tempfile::Builder::new()
      .prefix(STAGING_PREFIX)
      .suffix(suffix)
      .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    info!(
      "上传内容已暂存: {} ({} 字节)",
      file.path().display(),
      bytes.len()
    );
    Ok(Self { file })
  }

  pub fn path(&self) -> &Path {
    self.file.path()
  }

  /// 删除临时文件，返回被删除的路径
  pub fn remove(self) -> PathBuf {
    let path = self.file.path().to_path_buf();
    match self.file.close() {
      Ok(()) => debug!("临时文件已删除: {}", path.display()),
      Err(e) => warn!("临时文件删除失败 {}: {}", path.display(), e),
    }
    path
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn staged_bytes_are_readable_then_removed() {
    let staged = StagedMedia::stage(b"fake video", ".mp4").unwrap();
    let path = staged.path().to_path_buf();
    assert_eq!(std::fs::read(&path).unwrap(), b"fake video");
    assert!(
      path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(STAGING_PREFIX) && n.ends_with(".mp4"))
    );

    let removed = staged.remove();
    assert_eq!(removed, path);
    assert!(!path.exists());
  }

  #[test]
  fn concurrent_runs_get_distinct_paths() {
    let a = StagedMedia::stage(b"a", ".mp4").unwrap();
    let b = StagedMedia::stage(b"b", ".mp4").unwrap();
    assert_ne!(a.path(), b.path());
  }

  #[test]
  fn dropping_removes_the_file() {
    let staged = StagedMedia::stage(b"x", ".mkv").unwrap();
    let path = staged.path().to_path_buf();
    drop(staged);
    assert!(!path.exists());
  }
}
