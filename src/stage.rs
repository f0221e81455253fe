// 该文件是 Liuying （流影） 项目的一部分。
// src/stage.rs - 批次编排工作线程
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
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::detect::Detector;
use crate::engine::Engine;
use crate::frame::FrameMeta;

/// 空队列时单次等待的上限，兼顾输入延迟与停止响应
pub const PULL_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("输出管道 {0} 已关闭")]
  Closed(usize),
}

/// 上游拉取接口
///
/// 限时等待一帧；队列为空时在超时后返回 None，不会无限阻塞。
pub trait Source {
  fn pull(&mut self, timeout: Duration) -> Option<FrameMeta>;
}

impl Source for Receiver<FrameMeta> {
  fn pull(&mut self, timeout: Duration) -> Option<FrameMeta> {
    match self.recv_timeout(timeout) {
      Ok(meta) => Some(meta),
      Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
    }
  }
}

/// 下游推送接口
///
/// 按输出管道推送，尽力交付：失败由调用方记录，不产生反压。
pub trait Sink {
  /// 输出管道数量，恒为正
  fn capacity(&self) -> usize;

  fn push(&self, pipe_id: usize, meta: FrameMeta) -> Result<(), SinkError>;
}

/// 基于通道的下游推送
pub struct ChannelSink {
  pipes: Vec<Sender<FrameMeta>>,
}

impl ChannelSink {
  /// 由输出通道列表创建，列表不可为空
  pub fn new(pipes: Vec<Sender<FrameMeta>>) -> Self {
    debug_assert!(!pipes.is_empty(), "输出管道列表不可为空");
    ChannelSink { pipes }
  }
}

impl Sink for ChannelSink {
  fn capacity(&self) -> usize {
    self.pipes.len()
  }

  fn push(&self, pipe_id: usize, meta: FrameMeta) -> Result<(), SinkError> {
    self.pipes[pipe_id]
      .send(meta)
      .map_err(|_| SinkError::Closed(pipe_id))
  }
}

/// 批次编排工作线程
///
/// 循环执行累积、处理、分发三个阶段：逐帧拉取输入直到批满或
/// 流结束，按启用集合运行检测子阶段，再把每一个拉取到的帧
/// （含被过滤的帧）按通道分片转发下游。停止标记在每次拉取前
/// 检查，在途批次允许完成。
pub struct StageWorker<E, S, K> {
  context: Arc<Context>,
  detector: Detector<E>,
  source: S,
  sink: K,
  running: Arc<AtomicBool>,
}

impl<E, S, K> StageWorker<E, S, K>
where
  E: Engine,
  S: Source,
  K: Sink,
{
  pub fn new(
    context: Arc<Context>,
    detector: Detector<E>,
    source: S,
    sink: K,
    running: Arc<AtomicBool>,
  ) -> Self {
    StageWorker {
      context,
      detector,
      source,
      sink,
      running,
    }
  }

  /// 累积一个批次
  ///
  /// 返回按到达顺序排列的待转发帧列表。被过滤的帧不计入批大小；
  /// 流结束帧计入列表并立即终止累积。
  fn accumulate(&mut self) -> Vec<FrameMeta> {
    let mut pending = Vec::with_capacity(self.context.max_batch);
    let mut eligible = 0usize;

    while eligible < self.context.max_batch && self.running.load(Ordering::Acquire) {
      let Some(meta) = self.source.pull(PULL_TIMEOUT) else {
        continue;
      };

      if !meta.filter {
        eligible += 1;
      }
      let end_of_stream = meta.frame.end_of_stream;
      pending.push(meta);

      if end_of_stream {
        debug!("收到流结束帧，终止本批累积");
        break;
      }
    }

    pending
  }

  /// 把待转发帧按通道分片推送下游
  fn dispatch(&mut self, pending: Vec<FrameMeta>) {
    let capacity = self.sink.capacity();
    for meta in pending {
      let pipe_id = meta.frame.channel_id % capacity;
      if let Err(e) = self.sink.push(pipe_id, meta) {
        // 尽力交付，本帧丢弃，阶段继续
        warn!("下游推送失败: {}", e);
      }
    }
  }

  /// 一次累积-处理-分发循环
  pub fn work_once(&mut self) {
    let mut pending = self.accumulate();
    if pending.is_empty() {
      return;
    }

    let now = Instant::now();
    {
      let mut batch: Vec<&mut FrameMeta> =
        pending.iter_mut().filter(|meta| !meta.filter).collect();
      self.detector.process(&self.context, &mut batch);
    }
    debug!("批次处理完成: {} 帧, 耗时 {:.2?}", pending.len(), now.elapsed());

    self.dispatch(pending);
  }

  /// 运行工作循环直到停止标记清除
  pub fn run(mut self) {
    info!("阶段工作线程启动");
    while self.running.load(Ordering::Acquire) {
      self.work_once();
    }
    info!("阶段工作线程退出");
  }

  /// 在独立线程上运行工作循环
  pub fn spawn(self) -> std::thread::JoinHandle<()>
  where
    E: Send + 'static,
    S: Send + 'static,
    K: Send + 'static,
  {
    std::thread::spawn(move || self.run())
  }
}
