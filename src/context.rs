// 该文件是 Liuying （流影） 项目的一部分。
// src/context.rs - 阶段共享上下文
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
use tracing::{debug, error, info};

use crate::config::{Config, ConfigError};
use crate::engine::NetworkInfo;
use crate::frame::PixelFormat;
use crate::normalize::{ConvertAttr, NormalizeError};

/// 模型输入张量数量：图像 + 缩放比例
pub const PPYOLOE_NUM_INPUTS: usize = 2;
/// 模型输出张量数量：坐标 + 得分
pub const PPYOLOE_NUM_OUTPUTS: usize = 2;

#[derive(Error, Debug)]
pub enum ContextError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("归一化参数错误: {0}")]
  Normalize(#[from] NormalizeError),
  #[error("预期模型输入数量为 {expected}, 实际为 {actual}")]
  BadInputNum { expected: usize, actual: usize },
  #[error("预期模型输出数量为 {expected}, 实际为 {actual}")]
  BadOutputNum { expected: usize, actual: usize },
}

/// 阶段共享上下文
///
/// 初始化时构建一次，之后只读，可被多个工作线程并发访问。
#[derive(Debug, Clone)]
pub struct Context {
  /// 网络输入宽度
  pub net_w: u32,
  /// 网络输入高度
  pub net_h: u32,
  /// 网络输入通道数
  pub net_channels: u32,
  /// 单次前向的最大批大小
  pub max_batch: usize,
  /// 输出张量数量
  pub output_num: usize,
  /// 类别名称，索引即类别
  pub class_names: Vec<String>,
  /// 置信度阈值
  pub thresh_conf: f32,
  /// NMS IOU 阈值
  pub thresh_nms: f32,
  /// 是否把输入转换为 RGB 平面排布
  pub bgr2rgb: bool,
  /// 逐通道均值
  pub mean: Vec<f32>,
  /// 逐通道标准差
  pub stdd: Vec<f32>,
  /// 折算后的归一化仿射参数
  pub converto_attr: ConvertAttr,
}

impl Context {
  /// 由配置与网络信息构建上下文，类别名称从配置指定的文件读取
  pub fn build(config: &Config, info: &NetworkInfo) -> Result<Self, ContextError> {
    let class_names = config.load_class_names()?;
    Self::with_class_names(config, class_names, info)
  }

  /// 由配置、既有类别名称列表与网络信息构建上下文
  pub fn with_class_names(
    config: &Config,
    class_names: Vec<String>,
    info: &NetworkInfo,
  ) -> Result<Self, ContextError> {
    if info.input_num != PPYOLOE_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        PPYOLOE_NUM_INPUTS, info.input_num
      );
      return Err(ContextError::BadInputNum {
        expected: PPYOLOE_NUM_INPUTS,
        actual: info.input_num,
      });
    }
    if info.output_num != PPYOLOE_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        PPYOLOE_NUM_OUTPUTS, info.output_num
      );
      return Err(ContextError::BadOutputNum {
        expected: PPYOLOE_NUM_OUTPUTS,
        actual: info.output_num,
      });
    }

    let converto_attr = ConvertAttr::build(&config.mean, &config.stdd, info.input_scale)?;

    debug!(
      "网络输入: {}x{}x{}, 最大批大小: {}",
      info.net_channels, info.net_h, info.net_w, info.max_batch
    );
    info!("上下文构建完成: {} 个类别", class_names.len());

    Ok(Context {
      net_w: info.net_w,
      net_h: info.net_h,
      net_channels: info.net_channels,
      max_batch: info.max_batch,
      output_num: info.output_num,
      class_names,
      thresh_conf: config.threshold_conf,
      thresh_nms: config.threshold_nms,
      bgr2rgb: config.bgr2rgb,
      mean: config.mean.clone(),
      stdd: config.stdd.clone(),
      converto_attr,
    })
  }

  /// 预处理的目标像素排布
  pub fn target_format(&self) -> PixelFormat {
    if self.bgr2rgb {
      PixelFormat::RgbPlanar
    } else {
      PixelFormat::BgrPlanar
    }
  }
}
