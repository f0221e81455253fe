// 该文件是 Liuying （流影） 项目的一部分。
// src/config.rs - 阶段配置
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

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置解析失败: {0}")]
  Parse(#[from] serde_json::Error),
  #[error("类别名称列表为空: {0}")]
  EmptyClassNames(String),
}

/// 阶段配置
///
/// 初始化时从 JSON 读取一次，字段与推理阶段的配置面一一对应。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// 类别名称文件路径，每行一个名称，行号即类别索引
  pub class_names_file: String,
  /// 置信度阈值
  pub threshold_conf: f32,
  /// NMS IOU 阈值
  pub threshold_nms: f32,
  /// 是否把输入转换为 RGB 平面排布
  #[serde(default = "default_bgr2rgb")]
  pub bgr2rgb: bool,
  /// 逐通道均值，必须为 3 个
  pub mean: Vec<f32>,
  /// 逐通道标准差，必须为 3 个
  #[serde(rename = "std")]
  pub stdd: Vec<f32>,
  /// 模型标识，由执行服务解释
  pub model_path: String,
  /// 本实例启用的子阶段，缺省为全部启用
  #[serde(default = "default_stage")]
  pub stage: Vec<String>,
}

fn default_bgr2rgb() -> bool {
  true
}

fn default_stage() -> Vec<String> {
  vec!["pre".to_string(), "infer".to_string(), "post".to_string()]
}

impl Config {
  /// 从 JSON 文件加载配置
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  /// 从 JSON 字符串解析配置
  pub fn from_json(text: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(text)?;
    Ok(config)
  }

  /// 读取类别名称列表
  pub fn load_class_names(&self) -> Result<Vec<String>, ConfigError> {
    let file = std::fs::File::open(&self.class_names_file)?;
    let reader = BufReader::new(file);
    let mut names = Vec::new();
    for line in reader.lines() {
      names.push(line?);
    }
    if names.is_empty() {
      return Err(ConfigError::EmptyClassNames(self.class_names_file.clone()));
    }
    info!("类别名称加载完成: {} 个", names.len());
    Ok(names)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "class_names_file": "classes.txt",
    "threshold_conf": 0.5,
    "threshold_nms": 0.5,
    "bgr2rgb": true,
    "mean": [0.0, 0.0, 0.0],
    "std": [1.0, 1.0, 1.0],
    "model_path": "models/ppyoloe_plus.bin",
    "stage": ["pre", "infer", "post"]
  }"#;

  #[test]
  fn parses_full_config() {
    let config = Config::from_json(SAMPLE).unwrap();
    assert_eq!(config.threshold_conf, 0.5);
    assert_eq!(config.mean.len(), 3);
    assert_eq!(config.stage, vec!["pre", "infer", "post"]);
  }

  #[test]
  fn stage_and_bgr2rgb_have_defaults() {
    let config = Config::from_json(
      r#"{
        "class_names_file": "classes.txt",
        "threshold_conf": 0.3,
        "threshold_nms": 0.45,
        "mean": [0.0, 0.0, 0.0],
        "std": [1.0, 1.0, 1.0],
        "model_path": "m.bin"
      }"#,
    )
    .unwrap();
    assert!(config.bgr2rgb);
    assert_eq!(config.stage.len(), 3);
  }

  #[test]
  fn missing_required_field_fails() {
    let result = Config::from_json(r#"{ "threshold_conf": 0.5 }"#);
    assert!(matches!(result, Err(ConfigError::Parse(_))));
  }
}
