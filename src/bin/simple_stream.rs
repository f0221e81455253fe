// 该文件是 Liuying （流影） 项目的一部分。
// src/bin/simple_stream.rs - 流水线阶段演示
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use liuying::config::Config;
use liuying::context::Context;
use liuying::detect::{Detector, StageSet};
use liuying::engine::{DeviceTensor, Engine, EngineError, NetworkInfo, TensorKind};
use liuying::frame::{Frame, FrameMeta, PixelFormat, PlanarImage};
use liuying::stage::{ChannelSink, StageWorker};

/// Liuying 流水线阶段演示参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 每个通道的帧数
  #[arg(long, default_value = "16", value_name = "COUNT")]
  pub frames: u64,

  /// 输入通道数
  #[arg(long, default_value = "2", value_name = "COUNT")]
  pub channels: usize,

  /// 最大批大小
  #[arg(long, default_value = "4", value_name = "SIZE")]
  pub batch: usize,

  /// 源图像宽度
  #[arg(long, default_value = "640", value_name = "PIXELS")]
  pub width: u32,

  /// 源图像高度
  #[arg(long, default_value = "360", value_name = "PIXELS")]
  pub height: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub nms_threshold: f32,
}

const DEMO_BOX_NUM: usize = 8;
const DEMO_CLASSES: [&str; 3] = ["person", "bicycle", "car"];

/// 演示用执行服务：每个批元素输出一个固定位置的高分框
struct DemoEngine {
  info: NetworkInfo,
}

impl DemoEngine {
  fn new(max_batch: usize) -> Self {
    DemoEngine {
      info: NetworkInfo {
        net_w: 640,
        net_h: 640,
        net_channels: 3,
        max_batch,
        input_num: 2,
        output_num: 2,
        input_scale: 1.0,
      },
    }
  }
}

impl Engine for DemoEngine {
  fn info(&self) -> &NetworkInfo {
    &self.info
  }

  fn alloc_outputs(&self, batch: usize) -> Result<Vec<DeviceTensor>, EngineError> {
    Ok(vec![
      DeviceTensor::new(vec![batch, DEMO_BOX_NUM, 4], TensorKind::Float32, 1.0),
      DeviceTensor::new(
        vec![batch, DEMO_CLASSES.len(), DEMO_BOX_NUM],
        TensorKind::Float32,
        1.0,
      ),
    ])
  }

  fn forward(
    &self,
    inputs: &[DeviceTensor],
    outputs: &mut [DeviceTensor],
  ) -> Result<(), EngineError> {
    let batch = inputs[0].shape()[0];
    let coord_chunk = outputs[0].len() / batch;
    let score_chunk = outputs[1].len() / batch;
    for k in 0..batch {
      let coords = &mut outputs[0].as_mut_slice()[k * coord_chunk..k * coord_chunk + 4];
      coords.copy_from_slice(&[160.0, 120.0, 480.0, 300.0]);
      let class_id = k % DEMO_CLASSES.len();
      outputs[1].as_mut_slice()[k * score_chunk + class_id * DEMO_BOX_NUM] = 0.87;
    }
    Ok(())
  }
}

/// 生成带简单渐变纹理的合成帧
fn synthetic_frame(width: u32, height: u32, frame_id: u64, channel_id: usize) -> FrameMeta {
  let mut image = PlanarImage::new(width, height, PixelFormat::BgrPlanar);
  for c in 0..3 {
    let plane = image.plane_mut(c);
    for (y, row) in plane.chunks_mut(width as usize).enumerate() {
      row.fill(((y as u64 + frame_id * 7) % 256) as u8);
    }
  }
  FrameMeta::new(Frame::new(image, frame_id, channel_id))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("通道数: {}, 每通道帧数: {}", args.channels, args.frames);
  info!("最大批大小: {}", args.batch);
  info!("置信度阈值: {}", args.confidence);
  info!("NMS 阈值: {}", args.nms_threshold);

  let config = Config {
    class_names_file: String::new(),
    threshold_conf: args.confidence,
    threshold_nms: args.nms_threshold,
    bgr2rgb: true,
    mean: vec![0.0, 0.0, 0.0],
    stdd: vec![1.0, 1.0, 1.0],
    model_path: "demo".to_string(),
    stage: vec!["pre".into(), "infer".into(), "post".into()],
  };

  let engine = DemoEngine::new(args.batch);
  let class_names = DEMO_CLASSES.iter().map(|s| s.to_string()).collect();
  let context = Arc::new(Context::with_class_names(&config, class_names, engine.info())?);
  let detector = Detector::new(engine, StageSet::from_names(&config.stage));

  let (input_tx, input_rx) = mpsc::channel();
  let mut sink_txs = Vec::new();
  let mut sink_rxs = Vec::new();
  for _ in 0..args.channels {
    let (tx, rx) = mpsc::channel();
    sink_txs.push(tx);
    sink_rxs.push(rx);
  }

  let running = Arc::new(AtomicBool::new(true));
  {
    let running = running.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      running.store(false, Ordering::Release);
    })
    .expect("Error setting Ctrl-C handler");
  }

  let worker = StageWorker::new(context, detector, input_rx, ChannelSink::new(sink_txs), running.clone());
  let handle = worker.spawn();

  // 送入合成帧，每个通道以流结束帧收尾
  let mut frame_id = 0u64;
  for _ in 0..args.frames {
    for channel_id in 0..args.channels {
      let _ = input_tx.send(synthetic_frame(args.width, args.height, frame_id, channel_id));
      frame_id += 1;
    }
  }
  for channel_id in 0..args.channels {
    let _ = input_tx.send(FrameMeta::new(Frame::end_of_stream(frame_id, channel_id)));
    frame_id += 1;
  }

  // 收集下游结果
  let expected = args.frames * args.channels as u64 + args.channels as u64;
  let mut received = 0u64;
  let mut total_detections = 0usize;
  'drain: while received < expected && running.load(Ordering::Acquire) {
    for (pipe_id, rx) in sink_rxs.iter().enumerate() {
      match rx.recv_timeout(Duration::from_millis(10)) {
        Ok(meta) => {
          received += 1;
          total_detections += meta.result.boxes.len();
          for b in &meta.result.boxes {
            info!(
              "管道 {} 通道 {} 帧 {}: {} {:.2}% at ({}, {}, {}x{})",
              pipe_id,
              meta.frame.channel_id,
              meta.frame.frame_id,
              b.class_name,
              b.score * 100.0,
              b.x,
              b.y,
              b.width,
              b.height
            );
          }
          if let Some(code) = meta.error {
            warn!("帧 {} 标记错误: {:?}", meta.frame.frame_id, code);
          }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {}
        Err(mpsc::RecvTimeoutError::Disconnected) => break 'drain,
      }
    }
  }

  running.store(false, Ordering::Release);
  handle.join().ok();

  info!("处理完成: 共 {} 帧, {} 个检测", received, total_detections);

  Ok(())
}
