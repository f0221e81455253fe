// 该文件是 Liuying （流影） 项目的一部分。
// src/geometry.rs - 等比缩放几何计算
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

/// 等比缩放比例
///
/// 源图像缩放进网络输入画布时，宽高共用同一个比例，
/// `align_width` 标记哪个轴是铺满的轴（另一个轴留边）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectScale {
  /// 缩放比例，宽高一致，恒为正
  pub ratio: f32,
  /// 宽度是否为铺满轴
  pub align_width: bool,
}

/// 计算等比缩放比例
///
/// 调用方保证源尺寸为正。
pub fn aspect_scaled_ratio(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> AspectScale {
  let ratio_w = dst_w as f32 / src_w as f32;
  let ratio_h = dst_h as f32 / src_h as f32;

  if ratio_w <= ratio_h {
    AspectScale {
      ratio: ratio_w,
      align_width: true,
    }
  } else {
    AspectScale {
      ratio: ratio_h,
      align_width: false,
    }
  }
}

/// 信箱式缩放的几何描述
///
/// 记录缩放比例、缩放后的尺寸以及两个方向的留边（网络输入像素空间）。
/// 留边对称分布，只有非铺满轴的留边非零。
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
  /// 缩放比例
  pub ratio: f32,
  /// 缩放后的图像宽度
  pub scaled_w: u32,
  /// 缩放后的图像高度
  pub scaled_h: u32,
  /// 水平留边（左侧，网络输入像素）
  pub pad_x: u32,
  /// 垂直留边（顶部，网络输入像素）
  pub pad_y: u32,
}

impl Letterbox {
  /// 由源尺寸和网络输入尺寸计算信箱几何
  pub fn new(src_w: u32, src_h: u32, net_w: u32, net_h: u32) -> Self {
    let scale = aspect_scaled_ratio(src_w, src_h, net_w, net_h);

    if scale.align_width {
      let scaled_h = (src_h as f32 * scale.ratio) as u32;
      Letterbox {
        ratio: scale.ratio,
        scaled_w: net_w,
        scaled_h,
        pad_x: 0,
        pad_y: (net_h - scaled_h) / 2,
      }
    } else {
      let scaled_w = (src_w as f32 * scale.ratio) as u32;
      Letterbox {
        ratio: scale.ratio,
        scaled_w,
        scaled_h: net_h,
        pad_x: (net_w - scaled_w) / 2,
        pad_y: 0,
      }
    }
  }

  /// 水平留边换算到源图像像素空间
  ///
  /// 与原始坐标解码一致，换算时向零截断。
  pub fn pad_x_in_source(&self) -> i32 {
    (self.pad_x as f32 / self.ratio) as i32
  }

  /// 垂直留边换算到源图像像素空间
  pub fn pad_y_in_source(&self) -> i32 {
    (self.pad_y as f32 / self.ratio) as i32
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ratio_is_positive_and_bounded() {
    let cases = [
      (1920, 1080, 640, 640),
      (1080, 1920, 640, 640),
      (640, 640, 640, 640),
      (100, 2000, 640, 640),
      (2000, 100, 640, 640),
      (3, 5, 640, 640),
    ];
    for (sw, sh, dw, dh) in cases {
      let scale = aspect_scaled_ratio(sw, sh, dw, dh);
      assert!(scale.ratio > 0.0);
      // 两个轴缩放后都不超过目标尺寸（容许一个像素的舍入）
      assert!(sw as f32 * scale.ratio <= dw as f32 + 1.0);
      assert!(sh as f32 * scale.ratio <= dh as f32 + 1.0);
    }
  }

  #[test]
  fn binding_axis_matches_smaller_ratio() {
    let scale = aspect_scaled_ratio(1920, 1080, 640, 640);
    assert!(scale.align_width);
    let scale = aspect_scaled_ratio(1080, 1920, 640, 640);
    assert!(!scale.align_width);
    // 相等时按宽度铺满处理
    let scale = aspect_scaled_ratio(320, 320, 640, 640);
    assert!(scale.align_width);
  }

  #[test]
  fn exactly_one_axis_padded() {
    let cases = [(1920, 1080), (1080, 1920), (800, 600), (600, 800)];
    for (sw, sh) in cases {
      let lb = Letterbox::new(sw, sh, 640, 640);
      assert!(lb.pad_x == 0 || lb.pad_y == 0);
      assert!(lb.pad_x > 0 || lb.pad_y > 0);
    }
    // 正方形输入两个方向都无留边
    let lb = Letterbox::new(320, 320, 640, 640);
    assert_eq!(lb.pad_x, 0);
    assert_eq!(lb.pad_y, 0);
  }

  #[test]
  fn padding_is_centered() {
    let lb = Letterbox::new(1920, 1080, 640, 640);
    assert_eq!(lb.scaled_w, 640);
    // 1080 * (640/1920) = 360, 留边 (640-360)/2 = 140
    assert_eq!(lb.scaled_h, 360);
    assert_eq!(lb.pad_y, 140);
    assert_eq!(lb.pad_x, 0);
  }

  #[test]
  fn source_space_padding_round_trip() {
    // 源空间与网络空间往返误差不超过一个像素
    let lb = Letterbox::new(1280, 720, 640, 640);
    let x_src = 100.0f32;
    let x_net = x_src * lb.ratio + lb.pad_x as f32;
    let back = x_net / lb.ratio - lb.pad_x_in_source() as f32;
    assert!((back - x_src).abs() <= 1.0);

    let y_src = 300.0f32;
    let y_net = y_src * lb.ratio + lb.pad_y as f32;
    let back = (y_net - lb.pad_y as f32) / lb.ratio;
    assert!((back - y_src).abs() <= 1.0);
  }
}
