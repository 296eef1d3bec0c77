// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/filter.rs - 检测结果类别过滤
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

use tracing::trace;

use crate::{model::Detection, registry::ClassRegistry};

/// 丢弃不在白名单中的检测结果，保持原有顺序
pub fn filter_detections(raw: Vec<Detection>, registry: &ClassRegistry) -> Vec<Detection> {
  let before = raw.len();
  let kept: Vec<Detection> = raw
    .into_iter()
    .filter(|det| registry.lookup(det.class_id).is_some())
    .collect();
  trace!("类别过滤: {} -> {}", before, kept.len());
  kept
}
