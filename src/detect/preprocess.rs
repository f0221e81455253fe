// 该文件是 Liuying （流影） 项目的一部分。
// src/detect/preprocess.rs - 预处理子阶段
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
use crate::detect::PreProcess;
use crate::engine::{Engine, EngineError, TensorKind};
use crate::frame::{ErrorCode, FrameMeta, PixelFormat, PlanarImage};
use crate::geometry::Letterbox;

/// 加速器要求的行间距对齐
pub const STRIDE_ALIGN: u32 = 64;
/// 信箱留边的填充灰度
const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug)]
pub enum PreProcessError {
  #[error("设备内存分配失败: {0}")]
  Alloc(#[from] EngineError),
}

impl PreProcessError {
  pub fn error_code(&self) -> ErrorCode {
    match self {
      PreProcessError::Alloc(_) => ErrorCode::AllocFail,
    }
  }
}

/// 预处理子阶段
///
/// 逐帧执行：颜色顺序转换、行间距对齐、信箱缩放、仿射归一化，
/// 产出模型的图像输入张量（槽 0）与缩放比例张量（槽 1）。
/// 无图像的帧静默跳过；分配失败中止整个批次。
pub struct PpyoloePlusPreProcess;

impl<E: Engine> PreProcess<E> for PpyoloePlusPreProcess {
  fn pre_process(
    &self,
    context: &Context,
    engine: &E,
    batch: &mut [&mut FrameMeta],
  ) -> Result<(), PreProcessError> {
    if batch.is_empty() {
      return Ok(());
    }

    let target = context.target_format();
    let input_scale = engine.info().input_scale;

    for meta in batch.iter_mut() {
      let Some(image) = meta.frame.image.as_ref() else {
        continue;
      };

      // 1、颜色顺序转换，排布一致时原样使用
      let converted;
      let image = if image.format() != target {
        converted = convert_color_order(image, target);
        &converted
      } else {
        image
      };

      // 2、行间距对齐，只是内存排布要求，不改变像素
      let aligned;
      let image = if image.stride() % STRIDE_ALIGN != 0 {
        aligned = align_stride(image);
        &aligned
      } else {
        image
      };

      // 3、等比缩放填充
      let letterbox = Letterbox::new(image.width(), image.height(), context.net_w, context.net_h);
      let resized = letterbox_resize(image, &letterbox, context.net_w, context.net_h);
      debug!(
        "帧 {}: {}x{} -> {}x{}, 比例 {:.4}, 留边 ({}, {})",
        meta.frame.frame_id,
        image.width(),
        image.height(),
        letterbox.scaled_w,
        letterbox.scaled_h,
        letterbox.ratio,
        letterbox.pad_x,
        letterbox.pad_y
      );

      // 4、归一化到模型输入张量（NCHW 平面排布）
      let net_w = context.net_w as usize;
      let net_h = context.net_h as usize;
      let channels = context.net_channels as usize;
      let mut tensor =
        engine.alloc_tensor(&[1, channels, net_h, net_w], TensorKind::Float32, input_scale)?;
      {
        let data = tensor.as_mut_slice();
        let attr = &context.converto_attr;
        for c in 0..channels {
          for y in 0..net_h {
            for x in 0..net_w {
              let raw = resized.sample(c, x as u32, y as u32);
              data[(c * net_h + y) * net_w + x] = attr.apply(c, raw);
            }
          }
        }
      }

      // 5、缩放比例张量，网络据此回算坐标
      let mut ratio_tensor = engine.alloc_tensor(&[1, 2], TensorKind::Float32, 1.0)?;
      ratio_tensor
        .as_mut_slice()
        .copy_from_slice(&[letterbox.ratio, letterbox.ratio]);

      meta.input_tensors = Some(vec![tensor, ratio_tensor]);
    }

    Ok(())
  }
}

fn ffalign(value: u32, align: u32) -> u32 {
  (value + align - 1) & !(align - 1)
}

/// R/B 平面互换，G 平面不变
fn convert_color_order(image: &PlanarImage, target: PixelFormat) -> PlanarImage {
  let mut out = PlanarImage::with_stride(image.width(), image.height(), image.stride(), target);
  out.plane_mut(0).copy_from_slice(image.plane(2));
  out.plane_mut(1).copy_from_slice(image.plane(1));
  out.plane_mut(2).copy_from_slice(image.plane(0));
  out
}

/// 行间距对齐拷贝，行尾填充零
fn align_stride(image: &PlanarImage) -> PlanarImage {
  let stride = ffalign(image.stride(), STRIDE_ALIGN);
  let mut out = PlanarImage::with_stride(image.width(), image.height(), stride, image.format());
  let width = image.width() as usize;
  for c in 0..3 {
    for y in 0..image.height() {
      let src_row = y as usize * image.stride() as usize;
      let dst_row = y as usize * stride as usize;
      let src = &image.plane(c)[src_row..src_row + width];
      out.plane_mut(c)[dst_row..dst_row + width].copy_from_slice(src);
    }
  }
  out
}

/// 最近邻等比缩放，缩放结果居中，留边填充中性灰
fn letterbox_resize(
  image: &PlanarImage,
  letterbox: &Letterbox,
  net_w: u32,
  net_h: u32,
) -> PlanarImage {
  let stride = ffalign(net_w, STRIDE_ALIGN);
  let mut out = PlanarImage::with_stride(net_w, net_h, stride, image.format());
  for c in 0..3 {
    out.plane_mut(c).fill(LETTERBOX_FILL);
  }

  let src_w = image.width();
  let src_h = image.height();
  for c in 0..3 {
    for y in 0..letterbox.scaled_h {
      let src_y = ((y as f32 / letterbox.ratio) as u32).min(src_h - 1);
      for x in 0..letterbox.scaled_w {
        let src_x = ((x as f32 / letterbox.ratio) as u32).min(src_w - 1);
        out.put(
          c,
          x + letterbox.pad_x,
          y + letterbox.pad_y,
          image.sample(c, src_x, src_y),
        );
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::engine::{DeviceTensor, NetworkInfo};
  use crate::frame::Frame;

  struct TestEngine {
    info: NetworkInfo,
  }

  impl TestEngine {
    fn new() -> Self {
      TestEngine {
        info: NetworkInfo {
          net_w: 640,
          net_h: 640,
          net_channels: 3,
          max_batch: 4,
          input_num: 2,
          output_num: 2,
          input_scale: 1.0,
        },
      }
    }
  }

  impl Engine for TestEngine {
    fn info(&self) -> &NetworkInfo {
      &self.info
    }

    fn alloc_outputs(&self, _batch: usize) -> Result<Vec<DeviceTensor>, EngineError> {
      Ok(Vec::new())
    }

    fn forward(
      &self,
      _inputs: &[DeviceTensor],
      _outputs: &mut [DeviceTensor],
    ) -> Result<(), EngineError> {
      Ok(())
    }
  }

  fn test_context() -> Context {
    let config = Config::from_json(
      r#"{
        "class_names_file": "classes.txt",
        "threshold_conf": 0.5,
        "threshold_nms": 0.5,
        "bgr2rgb": true,
        "mean": [0.0, 0.0, 0.0],
        "std": [1.0, 1.0, 1.0],
        "model_path": "m.bin"
      }"#,
    )
    .unwrap();
    let engine = TestEngine::new();
    Context::with_class_names(&config, vec!["thing".to_string()], engine.info()).unwrap()
  }

  #[test]
  fn color_order_swaps_outer_planes() {
    let mut image = PlanarImage::new(2, 2, PixelFormat::BgrPlanar);
    image.put(0, 0, 0, 10); // B
    image.put(1, 0, 0, 20); // G
    image.put(2, 0, 0, 30); // R
    let rgb = convert_color_order(&image, PixelFormat::RgbPlanar);
    assert_eq!(rgb.format(), PixelFormat::RgbPlanar);
    assert_eq!(rgb.sample(0, 0, 0), 30);
    assert_eq!(rgb.sample(1, 0, 0), 20);
    assert_eq!(rgb.sample(2, 0, 0), 10);
  }

  #[test]
  fn stride_alignment_pads_rows() {
    let mut image = PlanarImage::new(100, 2, PixelFormat::RgbPlanar);
    image.put(0, 99, 1, 0x55);
    let aligned = align_stride(&image);
    assert_eq!(aligned.stride(), 128);
    assert_eq!(aligned.width(), 100);
    assert_eq!(aligned.sample(0, 99, 1), 0x55);
    // 行尾的填充字节为零
    assert_eq!(aligned.plane(0)[128 + 100], 0);
  }

  #[test]
  fn letterbox_fills_neutral_gray_and_centers() {
    let image = PlanarImage::new(1280, 720, PixelFormat::RgbPlanar);
    let letterbox = Letterbox::new(1280, 720, 640, 640);
    let resized = letterbox_resize(&image, &letterbox, 640, 640);
    // 1280x720 -> 640x360, 上下各留 140 行灰边
    assert_eq!(letterbox.pad_y, 140);
    assert_eq!(resized.sample(0, 320, 0), LETTERBOX_FILL);
    assert_eq!(resized.sample(0, 320, 139), LETTERBOX_FILL);
    assert_eq!(resized.sample(0, 320, 140), 0);
    assert_eq!(resized.sample(0, 320, 639), LETTERBOX_FILL);
  }

  #[test]
  fn nearest_resize_maps_known_pixel() {
    // 320x320 源图放大两倍，无留边
    let mut image = PlanarImage::new(320, 320, PixelFormat::RgbPlanar);
    image.put(1, 10, 10, 200);
    let letterbox = Letterbox::new(320, 320, 640, 640);
    assert_eq!(letterbox.pad_x, 0);
    assert_eq!(letterbox.pad_y, 0);
    let resized = letterbox_resize(&image, &letterbox, 640, 640);
    assert_eq!(resized.sample(1, 20, 20), 200);
  }

  #[test]
  fn produces_both_input_slots() {
    let context = test_context();
    let engine = TestEngine::new();
    let image = PlanarImage::new(1280, 720, PixelFormat::RgbPlanar);
    let mut meta = FrameMeta::new(Frame::new(image, 0, 0));
    let mut batch = [&mut meta];

    PpyoloePlusPreProcess
      .pre_process(&context, &engine, &mut batch)
      .unwrap();

    let tensors = meta.input_tensors.as_ref().unwrap();
    assert_eq!(tensors.len(), 2);
    assert_eq!(tensors[0].shape(), &[1, 3, 640, 640]);
    assert_eq!(tensors[1].shape(), &[1, 2]);
    let ratio = 640.0 / 1280.0;
    assert!((tensors[1].as_slice()[0] - ratio).abs() < 1e-6);
    assert!((tensors[1].as_slice()[1] - ratio).abs() < 1e-6);
  }

  #[test]
  fn normalization_rescales_pixels() {
    let context = test_context();
    let engine = TestEngine::new();
    // 全白图像，均值 0 标准差 1 时归一化为 1.0
    let mut image = PlanarImage::new(640, 640, PixelFormat::RgbPlanar);
    for c in 0..3 {
      image.plane_mut(c).fill(255);
    }
    let mut meta = FrameMeta::new(Frame::new(image, 0, 0));
    let mut batch = [&mut meta];
    PpyoloePlusPreProcess
      .pre_process(&context, &engine, &mut batch)
      .unwrap();
    let tensor = &meta.input_tensors.as_ref().unwrap()[0];
    assert!((tensor.as_slice()[0] - 1.0).abs() < 1e-6);
    assert!((tensor.as_slice()[tensor.len() - 1] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn frame_without_image_is_skipped() {
    let context = test_context();
    let engine = TestEngine::new();
    let mut meta = FrameMeta::new(Frame::end_of_stream(9, 0));
    let mut batch = [&mut meta];
    PpyoloePlusPreProcess
      .pre_process(&context, &engine, &mut batch)
      .unwrap();
    assert!(meta.input_tensors.is_none());
  }
}
