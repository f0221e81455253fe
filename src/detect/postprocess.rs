// 该文件是 Liuying （流影） 项目的一部分。
// src/detect/postprocess.rs - 后处理子阶段
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
use tracing::debug;

use crate::context::Context;
use crate::detect::PostProcess;
use crate::frame::{DetectionBox, FrameMeta};
use crate::geometry::Letterbox;

#[derive(Error, Debug)]
pub enum PostProcessError {
  #[error("输出张量数量不匹配: 期望 {expected}, 实际 {actual}")]
  BadOutputCount { expected: usize, actual: usize },
  #[error("输出张量形状无效")]
  BadShape,
}

/// 解码中间框
///
/// 坐标已回到源图像像素空间，尚未解析类别名称。
#[derive(Debug, Clone)]
pub struct RawBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
  pub score: f32,
  pub class_id: usize,
}

/// 后处理子阶段
///
/// 对每帧的输出张量做类别解码、置信度过滤、坐标还原与 NMS，
/// 幸存框连同解析后的类别名称写入帧结果。
pub struct PpyoloePlusPostProcess;

impl PostProcess for PpyoloePlusPostProcess {
  fn post_process(
    &self,
    context: &Context,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), PostProcessError> {
    for meta in batch.iter_mut() {
      if meta.frame.end_of_stream {
        continue;
      }
      let Some(outputs) = meta.output_tensors.take() else {
        continue;
      };
      let Some(image) = meta.frame.image.as_ref() else {
        continue;
      };

      if outputs.len() != context.output_num {
        return Err(PostProcessError::BadOutputCount {
          expected: context.output_num,
          actual: outputs.len(),
        });
      }

      // 输出 0: 坐标 (1, box_num, 4)；输出 1: 得分 (1, class_num, box_num)，类别主序
      let coords = &outputs[0];
      let scores = &outputs[1];
      let box_num = *coords.shape().get(1).ok_or(PostProcessError::BadShape)?;
      let class_num = *scores.shape().get(1).ok_or(PostProcessError::BadShape)?;
      if coords.len() < box_num * 4 || scores.len() < class_num * box_num {
        return Err(PostProcessError::BadShape);
      }

      let frame_w = image.width() as i32;
      let frame_h = image.height() as i32;

      // 重算信箱几何，留边换算回源图像像素
      let letterbox = Letterbox::new(image.width(), image.height(), context.net_w, context.net_h);
      let dx = letterbox.pad_x_in_source();
      let dy = letterbox.pad_y_in_source();

      let coord_data = coords.as_slice();
      let score_data = scores.as_slice();

      let mut candidates = Vec::new();
      for i in 0..box_num {
        let (class_id, confidence) = argmax_interval(score_data, i, class_num, box_num);
        if confidence > context.thresh_conf {
          let raw = &coord_data[i * 4..i * 4 + 4];
          let x1 = (raw[0].round() as i32 - dx).clamp(0, frame_w - 1);
          let y1 = (raw[1].round() as i32 - dy).clamp(0, frame_h - 1);
          let x2 = (raw[2].round() as i32 - dx).clamp(x1, frame_w);
          let y2 = (raw[3].round() as i32 - dy).clamp(y1, frame_h);
          candidates.push(RawBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score: confidence,
            class_id,
          });
        }
      }

      nms(&mut candidates, context.thresh_nms);
      debug!(
        "帧 {}: 检测到 {} 个物体",
        meta.frame.frame_id,
        candidates.len()
      );

      for raw in candidates {
        let class_name = context
          .class_names
          .get(raw.class_id)
          .map(String::as_str)
          .unwrap_or("unknown")
          .to_string();
        meta.result.boxes.push(DetectionBox {
          x: raw.x,
          y: raw.y,
          width: raw.width,
          height: raw.height,
          score: raw.score,
          class_id: raw.class_id,
          class_name,
        });
      }
    }

    Ok(())
  }
}

/// 类别主序得分的逐框 argmax
///
/// 类别 c、框 i 的得分位于 `c * box_num + i`。
fn argmax_interval(scores: &[f32], box_idx: usize, class_num: usize, box_num: usize) -> (usize, f32) {
  let mut max_value = f32::NEG_INFINITY;
  let mut max_index = 0usize;
  for c in 0..class_num {
    let value = scores[c * box_num + box_idx];
    if value > max_value {
      max_value = value;
      max_index = c;
    }
  }
  (max_index, max_value)
}

/// 贪心非极大值抑制
///
/// 候选框按置信度升序排序，从尾部取最高置信度的框作为锚，
/// 抑制与锚交并比超过阈值的低置信度框，直到每个框都做过一次锚。
pub fn nms(dets: &mut Vec<RawBox>, thresh: f32) {
  if dets.is_empty() {
    return;
  }
  dets.sort_by(|a, b| a.score.total_cmp(&b.score));

  let mut index = dets.len() - 1;
  while index > 0 {
    let mut i = 0;
    while i < index {
      if iou(&dets[index], &dets[i]) > thresh {
        dets.remove(i);
        index -= 1;
      } else {
        i += 1;
      }
    }
    if index == 0 {
      break;
    }
    index -= 1;
  }
}

/// 交并比
pub fn iou(a: &RawBox, b: &RawBox) -> f32 {
  let left = a.x.max(b.x);
  let top = a.y.max(b.y);
  let right = (a.x + a.width).min(b.x + b.width);
  let bottom = (a.y + a.height).min(b.y + b.height);

  let overlap = (right - left).max(0) as f32 * (bottom - top).max(0) as f32;
  let area_a = (a.width * a.height) as f32;
  let area_b = (b.width * b.height) as f32;
  let union = area_a + area_b - overlap;

  if union > 0.0 { overlap / union } else { 0.0 }
}
