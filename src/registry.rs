// 该文件是 Jiedao （街道目标检测） 项目的一部分。
// src/registry.rs - 类别注册表
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

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("类别编号重复: {0}")]
  DuplicateId(u32),
  #[error("显示名称重复: {0}")]
  DuplicateName(String),
  #[error("类别表解析错误: {0}")]
  Parse(#[from] serde_json::Error),
}

/// 单个类别的显示信息
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassSpec {
  pub class_id: u32,
  pub display_name: String,
  pub color: [u8; 3],
  #[serde(default = "included_by_default")]
  pub included: bool,
}

fn included_by_default() -> bool {
  true
}

impl ClassSpec {
  pub fn new(class_id: u32, display_name: &str, color: [u8; 3]) -> Self {
    Self {
      class_id,
      display_name: display_name.to_string(),
      color,
      included: true,
    }
  }
}

/// 检测器类别编号到显示名称和颜色的静态映射
#[derive(Debug, Clone)]
pub struct ClassRegistry {
  classes: BTreeMap<u32, ClassSpec>,
}

impl ClassRegistry {
  pub fn new(specs: Vec<ClassSpec>) -> Result<Self, RegistryError> {
    let mut classes = BTreeMap::new();
    let mut names = HashSet::new();
    for spec in specs {
      if !names.insert(spec.display_name.clone()) {
        return Err(RegistryError::DuplicateName(spec.display_name));
      }
      if classes.contains_key(&spec.class_id) {
        return Err(RegistryError::DuplicateId(spec.class_id));
      }
      classes.insert(spec.class_id, spec);
    }
    Ok(Self { classes })
  }

  /// 城市道路场景的六个类别（COCO 编号）
  pub fn urban() -> Self {
    let classes = [
      ClassSpec::new(0, "Persona", [0, 255, 0]),
      ClassSpec::new(2, "Carro", [255, 0, 0]),
      ClassSpec::new(3, "Motocicleta", [255, 0, 255]),
      ClassSpec::new(5, "Autobús", [0, 255, 255]),
      ClassSpec::new(7, "Camión", [255, 165, 0]),
      ClassSpec::new(9, "Semáforo", [255, 255, 0]),
    ]
    .into_iter()
    .map(|spec| (spec.class_id, spec))
    .collect();

    Self { classes }
  }

  /// 从 JSON 数组加载类别表
  pub fn from_json(json: &str) -> Result<Self, RegistryError> {
    let specs: Vec<ClassSpec> = serde_json::from_str(json)?;
    Self::new(specs)
  }

  /// 只返回被纳入白名单的类别
  pub fn lookup(&self, class_id: u32) -> Option<&ClassSpec> {
    self.classes.get(&class_id).filter(|spec| spec.included)
  }

  pub fn allowed_ids(&self) -> Vec<u32> {
    self
      .classes
      .values()
      .filter(|spec| spec.included)
      .map(|spec| spec.class_id)
      .collect()
  }

  pub fn len(&self) -> usize {
    self.classes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.classes.is_empty()
  }
}

impl Default for ClassRegistry {
  fn default() -> Self {
    Self::urban()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn urban_table_has_six_distinct_classes() {
    let registry = ClassRegistry::urban();
    assert_eq!(registry.allowed_ids(), vec![0, 2, 3, 5, 7, 9]);

    let colors: HashSet<[u8; 3]> = registry
      .allowed_ids()
      .into_iter()
      .filter_map(|id| registry.lookup(id).map(|spec| spec.color))
      .collect();
    assert_eq!(colors.len(), 6);
  }

  #[test]
  fn lookup_car() {
    let registry = ClassRegistry::urban();
    let car = registry.lookup(2).unwrap();
    assert_eq!(car.display_name, "Carro");
    assert_eq!(car.color, [255, 0, 0]);
    assert!(registry.lookup(1).is_none());
  }

  #[test]
  fn excluded_entries_are_not_found() {
    let registry = ClassRegistry::from_json(
      r#"[
        {"class_id": 0, "display_name": "Persona", "color": [0, 255, 0]},
        {"class_id": 1, "display_name": "Bicicleta", "color": [0, 0, 255], "included": false}
      ]"#,
    )
    .unwrap();
    assert!(registry.lookup(0).is_some());
    assert!(registry.lookup(1).is_none());
    assert_eq!(registry.allowed_ids(), vec![0]);
  }

  #[test]
  fn duplicates_are_rejected() {
    let err = ClassRegistry::new(vec![
      ClassSpec::new(2, "Carro", [255, 0, 0]),
      ClassSpec::new(2, "Auto", [0, 0, 255]),
    ])
    .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateId(2)));

    let err = ClassRegistry::new(vec![
      ClassSpec::new(2, "Carro", [255, 0, 0]),
      ClassSpec::new(3, "Carro", [0, 0, 255]),
    ])
    .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName(ref name) if name == "Carro"));
  }
}
