// 该文件是 Liuying （流影） 项目的一部分。
// src/normalize.rs - 逐通道归一化参数
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

/// 归一化通道数，固定为 RGB 三通道
pub const NORM_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("均值/标准差长度必须为 {NORM_CHANNELS}: mean={0}, std={1}")]
  BadLength(usize, usize),
  #[error("通道 {0} 的标准差为零")]
  ZeroStd(usize),
}

/// 逐通道仿射归一化参数
///
/// 归一化 [0-255] -> [0-1]: y = (1/255) * x + 0
/// 标准化: z = (1/std) * y + (-mean/std)
/// 合并: z = (scale/(255*std)) * x + (-mean/std)
///
/// `scale` 为输入张量的量化比例，全精度输入时为 1.0。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertAttr {
  pub alpha: [f32; NORM_CHANNELS],
  pub beta: [f32; NORM_CHANNELS],
}

impl ConvertAttr {
  /// 由配置的均值/标准差与输入量化比例折算仿射参数
  pub fn build(mean: &[f32], std: &[f32], input_scale: f32) -> Result<Self, NormalizeError> {
    if mean.len() != NORM_CHANNELS || std.len() != NORM_CHANNELS {
      return Err(NormalizeError::BadLength(mean.len(), std.len()));
    }

    let mut alpha = [0.0f32; NORM_CHANNELS];
    let mut beta = [0.0f32; NORM_CHANNELS];
    for c in 0..NORM_CHANNELS {
      if std[c] == 0.0 {
        return Err(NormalizeError::ZeroStd(c));
      }
      alpha[c] = input_scale / (255.0 * std[c]);
      beta[c] = -mean[c] / std[c];
    }

    Ok(ConvertAttr { alpha, beta })
  }

  /// 对单个样本应用仿射变换
  #[inline]
  pub fn apply(&self, channel: usize, raw: u8) -> f32 {
    self.alpha[channel] * raw as f32 + self.beta[channel]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_mean_std_rescales_to_unit() {
    let attr = ConvertAttr::build(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0], 1.0).unwrap();
    assert!((attr.apply(0, 255) - 1.0).abs() < 1e-6);
    assert!((attr.apply(1, 0) - 0.0).abs() < 1e-6);
  }

  #[test]
  fn imagenet_style_standardization() {
    let mean = [0.485, 0.456, 0.406];
    let std = [0.229, 0.224, 0.225];
    let attr = ConvertAttr::build(&mean, &std, 1.0).unwrap();
    // 像素值等于 255*mean 时归一化结果应为 0
    for c in 0..NORM_CHANNELS {
      let raw = (255.0 * mean[c]).round() as u8;
      assert!(attr.apply(c, raw).abs() < 0.02);
    }
  }

  #[test]
  fn quantization_scale_folds_into_alpha() {
    let a1 = ConvertAttr::build(&[0.0; 3], &[1.0; 3], 1.0).unwrap();
    let a2 = ConvertAttr::build(&[0.0; 3], &[1.0; 3], 0.5).unwrap();
    assert!((a1.alpha[0] - 2.0 * a2.alpha[0]).abs() < 1e-9);
    // beta 与量化比例无关
    assert_eq!(a1.beta, a2.beta);
  }

  #[test]
  fn zero_std_is_rejected() {
    let err = ConvertAttr::build(&[0.0; 3], &[1.0, 0.0, 1.0], 1.0).unwrap_err();
    assert!(matches!(err, NormalizeError::ZeroStd(1)));
  }

  #[test]
  fn wrong_length_is_rejected() {
    let err = ConvertAttr::build(&[0.0; 2], &[1.0; 3], 1.0).unwrap_err();
    assert!(matches!(err, NormalizeError::BadLength(2, 3)));
  }
}
