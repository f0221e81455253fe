// 该文件是 Liuying （流影） 项目的一部分。
// src/engine.rs - 网络执行服务抽象
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

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
  Float32,
  Float16,
  Int8,
}

/// 设备常驻张量
///
/// 形状、元素类型与量化比例为元数据，缓冲区由张量独占持有，
/// 随张量释放而释放。
#[derive(Debug, Clone)]
pub struct DeviceTensor {
  shape: Vec<usize>,
  kind: TensorKind,
  scale: f32,
  data: Box<[f32]>,
}

impl DeviceTensor {
  /// 创建零填充张量
  pub fn new(shape: Vec<usize>, kind: TensorKind, scale: f32) -> Self {
    let len: usize = shape.iter().product();
    DeviceTensor {
      shape,
      kind,
      scale,
      data: vec![0.0f32; len].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn kind(&self) -> TensorKind {
    self.kind
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

/// 网络的静态几何信息
#[derive(Debug, Clone)]
pub struct NetworkInfo {
  /// 网络输入宽度
  pub net_w: u32,
  /// 网络输入高度
  pub net_h: u32,
  /// 网络输入通道数
  pub net_channels: u32,
  /// 单次前向的最大批大小
  pub max_batch: usize,
  /// 输入张量数量
  pub input_num: usize,
  /// 输出张量数量
  pub output_num: usize,
  /// 输入张量的量化比例，全精度为 1.0
  pub input_scale: f32,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("设备内存分配失败: 请求 {0} 个元素")]
  AllocFail(usize),
  #[error("推理执行失败: 状态码 {0}")]
  Forward(i32),
  #[error("张量数量不匹配: 期望 {expected}, 实际 {actual}")]
  TensorCount { expected: usize, actual: usize },
}

/// 网络执行服务
///
/// 对加速器运行时的不透明封装：批大小不超过 `max_batch` 的一组输入张量
/// 换一组输出张量，输入输出按批索引一一对应。前向调用是同步的，
/// 只挂起当前工作线程。
pub trait Engine {
  /// 网络几何信息，初始化后不变
  fn info(&self) -> &NetworkInfo;

  /// 分配设备张量
  ///
  /// 默认实现直接分配；模拟设备容量限制的实现可以覆盖。
  fn alloc_tensor(
    &self,
    shape: &[usize],
    kind: TensorKind,
    scale: f32,
  ) -> Result<DeviceTensor, EngineError> {
    Ok(DeviceTensor::new(shape.to_vec(), kind, scale))
  }

  /// 按批大小分配整组输出张量
  fn alloc_outputs(&self, batch: usize) -> Result<Vec<DeviceTensor>, EngineError>;

  /// 执行一次前向
  fn forward(
    &self,
    inputs: &[DeviceTensor],
    outputs: &mut [DeviceTensor],
  ) -> Result<(), EngineError>;
}
