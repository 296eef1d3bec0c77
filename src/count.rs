// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/count.rs - 按类别统计检测数量
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

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{model::Detection, registry::ClassRegistry};

/// 没有检测到任何目标时显示的文字
pub const NO_OBJECTS_MESSAGE: &str = "No se detectaron objetos.";

/// 显示名称到检测数量的映射
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DetectionCounts(BTreeMap<String, u64>);

impl DetectionCounts {
  pub fn new() -> Self {
    Self::default()
  }

  /// 每个检测结果使对应类别加一，未注册的类别被忽略
  pub fn accumulate(&mut self, detections: &[Detection], registry: &ClassRegistry) {
    for det in detections {
      if let Some(spec) = registry.lookup(det.class_id) {
        *self.0.entry(spec.display_name.clone()).or_insert(0) += 1;
      }
    }
  }

  pub fn merge(&mut self, other: &DetectionCounts) {
    for (name, count) in other.iter() {
      *self.0.entry(name.to_string()).or_insert(0) += count;
    }
  }

  pub fn get(&self, name: &str) -> Option<u64> {
    self.0.get(name).copied()
  }

  pub fn total(&self) -> u64 {
    self.0.values().sum()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
    self.0.iter().map(|(name, count)| (name.as_str(), *count))
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!(self.0)
  }
}

/// 在已有计数的基础上累加一批检测结果
pub fn accumulate(
  mut counts: DetectionCounts,
  detections: &[Detection],
  registry: &ClassRegistry,
) -> DetectionCounts {
  counts.accumulate(detections, registry);
  counts
}
