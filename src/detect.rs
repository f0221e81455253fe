// 该文件是 Liuying （流影） 项目的一部分。
// src/detect.rs - 检测子阶段定义
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

use tracing::{debug, error};

use crate::context::Context;
use crate::engine::{Engine, EngineError};
use crate::frame::{ErrorCode, FrameMeta};

mod inference;
mod postprocess;
mod preprocess;

pub use self::inference::PpyoloePlusInference;
pub use self::postprocess::{PostProcessError, PpyoloePlusPostProcess, RawBox, nms};
pub use self::preprocess::{PreProcessError, PpyoloePlusPreProcess};

/// 预处理子阶段
pub trait PreProcess<E: Engine> {
  fn pre_process(
    &self,
    context: &Context,
    engine: &E,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), PreProcessError>;
}

/// 推理子阶段
pub trait Inference<E: Engine> {
  fn predict(
    &self,
    context: &Context,
    engine: &E,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), EngineError>;
}

/// 后处理子阶段
pub trait PostProcess {
  fn post_process(
    &self,
    context: &Context,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), PostProcessError>;
}

/// 本实例启用的子阶段集合
///
/// 三个子阶段可以拆到不同的阶段实例上独立调度，
/// 任意子集都是合法的。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
  pub pre: bool,
  pub infer: bool,
  pub post: bool,
}

impl StageSet {
  /// 全部启用
  pub fn all() -> Self {
    StageSet {
      pre: true,
      infer: true,
      post: true,
    }
  }

  /// 由配置的阶段名称列表解析
  pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
    let mut set = StageSet {
      pre: false,
      infer: false,
      post: false,
    };
    for name in names {
      match name.as_ref() {
        "pre" => set.pre = true,
        "infer" => set.infer = true,
        "post" => set.post = true,
        _ => {}
      }
    }
    set
  }
}

impl Default for StageSet {
  fn default() -> Self {
    Self::all()
  }
}

/// 检测器
///
/// 按启用集合依次运行预处理、推理与后处理。任一子阶段失败时，
/// 当前批内的每一帧都记录对应错误码，其余子阶段跳过。
pub struct Detector<E> {
  engine: E,
  stages: StageSet,
  pre: PpyoloePlusPreProcess,
  infer: PpyoloePlusInference,
  post: PpyoloePlusPostProcess,
}

impl<E: Engine> Detector<E> {
  pub fn new(engine: E, stages: StageSet) -> Self {
    Detector {
      engine,
      stages,
      pre: PpyoloePlusPreProcess,
      infer: PpyoloePlusInference,
      post: PpyoloePlusPostProcess,
    }
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn stages(&self) -> StageSet {
    self.stages
  }

  /// 处理一个批次
  pub fn process(&self, context: &Context, batch: &mut [&mut FrameMeta]) {
    if batch.is_empty() {
      return;
    }

    if self.stages.pre {
      debug!("预处理 {} 帧", batch.len());
      if let Err(e) = self.pre.pre_process(context, &self.engine, batch) {
        error!("预处理失败: {}", e);
        mark_batch(batch, e.error_code());
        return;
      }
    }

    if self.stages.infer {
      debug!("推理 {} 帧", batch.len());
      if let Err(e) = self.infer.predict(context, &self.engine, batch) {
        error!("推理失败: {}", e);
        mark_batch(batch, ErrorCode::InferFail);
        return;
      }
    }

    if self.stages.post {
      debug!("后处理 {} 帧", batch.len());
      if let Err(e) = self.post.post_process(context, batch) {
        error!("后处理失败: {}", e);
        mark_batch(batch, ErrorCode::PostProcessFail);
      }
    }
  }
}

fn mark_batch(batch: &mut [&mut FrameMeta], code: ErrorCode) {
  for meta in batch.iter_mut() {
    meta.error = Some(code);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stage_set_from_names() {
    let set = StageSet::from_names(&["pre", "post"]);
    assert!(set.pre);
    assert!(!set.infer);
    assert!(set.post);

    let set = StageSet::from_names(&["infer", "unknown"]);
    assert!(!set.pre);
    assert!(set.infer);
    assert!(!set.post);
  }
}
