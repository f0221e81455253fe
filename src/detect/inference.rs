// 该文件是 Liuying （流影） 项目的一部分。
// src/detect/inference.rs - 推理子阶段
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

use tracing::debug;

use crate::context::Context;
use crate::detect::Inference;
use crate::engine::{DeviceTensor, Engine, EngineError};
use crate::frame::FrameMeta;

/// 推理子阶段
///
/// 最大批大小超过 1 时，把各帧的输入张量沿批维拼接成一个多帧缓冲区，
/// 前向一次后按批索引切分回各帧；等于 1 时逐帧独立前向，
/// 省去拼接与切分的开销。输入输出按批索引一一对应，不发生重排。
pub struct PpyoloePlusInference;

impl<E: Engine> Inference<E> for PpyoloePlusInference {
  fn predict(
    &self,
    context: &Context,
    engine: &E,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), EngineError> {
    if batch.is_empty() {
      return Ok(());
    }

    if context.max_batch > 1 {
      let merged = merge_inputs(engine, batch)?;
      if let Some((inputs, count)) = merged {
        debug!("批量前向: {} 帧", count);
        let mut outputs = engine.alloc_outputs(count)?;
        engine.forward(&inputs, &mut outputs)?;
        split_outputs(engine, batch, &outputs, count)?;
      }
    } else {
      for meta in batch.iter_mut() {
        let Some(inputs) = meta.input_tensors.as_ref() else {
          continue;
        };
        debug!("单帧前向: 帧 {}", meta.frame.frame_id);
        let mut outputs = engine.alloc_outputs(1)?;
        engine.forward(inputs, &mut outputs)?;
        meta.output_tensors = Some(outputs);
      }
    }

    // 输入张量已被前向消费，释放
    for meta in batch.iter_mut() {
      meta.input_tensors = None;
    }

    Ok(())
  }
}

/// 沿批维拼接各帧的输入张量
///
/// 返回拼接后的输入组与参与前向的帧数；批内没有可推理的帧时返回 None。
fn merge_inputs<E: Engine>(
  engine: &E,
  batch: &[&mut FrameMeta],
) -> Result<Option<(Vec<DeviceTensor>, usize)>, EngineError> {
  let frames: Vec<&Vec<DeviceTensor>> = batch
    .iter()
    .filter_map(|meta| meta.input_tensors.as_ref())
    .collect();
  let count = frames.len();
  if count == 0 {
    return Ok(None);
  }

  let slots = frames[0].len();
  let mut merged = Vec::with_capacity(slots);
  for slot in 0..slots {
    let proto = &frames[0][slot];
    let mut shape = proto.shape().to_vec();
    shape[0] = count;
    let chunk = proto.len();
    let mut tensor = engine.alloc_tensor(&shape, proto.kind(), proto.scale())?;
    for (k, frame) in frames.iter().enumerate() {
      tensor.as_mut_slice()[k * chunk..(k + 1) * chunk].copy_from_slice(frame[slot].as_slice());
    }
    merged.push(tensor);
  }

  Ok(Some((merged, count)))
}

/// 把多帧输出缓冲区按批索引切分回各帧
///
/// 批序与输入一致：跳过未参与前向的帧，其余帧按原顺序对应切片。
fn split_outputs<E: Engine>(
  engine: &E,
  batch: &mut [&mut FrameMeta],
  outputs: &[DeviceTensor],
  count: usize,
) -> Result<(), EngineError> {
  let mut k = 0usize;
  for meta in batch.iter_mut() {
    if meta.input_tensors.is_none() {
      continue;
    }
    let mut views = Vec::with_capacity(outputs.len());
    for output in outputs {
      let mut shape = output.shape().to_vec();
      shape[0] = 1;
      let chunk = output.len() / count;
      let mut view = engine.alloc_tensor(&shape, output.kind(), output.scale())?;
      view
        .as_mut_slice()
        .copy_from_slice(&output.as_slice()[k * chunk..(k + 1) * chunk]);
      views.push(view);
    }
    meta.output_tensors = Some(views);
    k += 1;
  }
  Ok(())
}
