// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Fenshi Authors

use crate::model::DetectItem;

/// 计算两个 [x_min, y_min, x_max, y_max] 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 按类别的非极大值抑制，结果按置信度降序，最多保留 `max_det` 个
pub fn nms(mut items: Vec<DetectItem>, iou_threshold: f32, max_det: usize) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::with_capacity(items.len().min(max_det));
  for item in items {
    if kept.len() >= max_det {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|best| best.class_id == item.class_id && iou(&best.bbox, &item.bbox) >= iou_threshold);
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn test_iou_identical_and_disjoint() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }

  #[test]
  fn test_nms_suppresses_same_class_overlap() {
    let items = vec![
      item(0, 0.6, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
      item(1, 0.5, [0.0, 0.0, 10.0, 10.0]),
    ];

    let kept = nms(items, 0.45, 300);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].class_id, 1);
  }

  #[test]
  fn test_nms_keeps_low_overlap() {
    let items = vec![
      item(0, 0.9, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.8, [8.0, 8.0, 18.0, 18.0]),
    ];
    assert_eq!(nms(items, 0.45, 300).len(), 2);
  }

  #[test]
  fn test_nms_caps_detections() {
    // 互不重叠的小框，按置信度保留前三个
    let items: Vec<_> = (0..50)
      .map(|i| {
        let x = i as f32 * 20.0;
        item(0, 0.01 * i as f32, [x, 0.0, x + 10.0, 10.0])
      })
      .collect();

    let kept = nms(items, 0.45, 3);
    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].bbox[0], 980.0);
    assert_eq!(kept[2].bbox[0], 940.0);
    assert!(nms(Vec::new(), 0.45, 0).is_empty());
  }
}
