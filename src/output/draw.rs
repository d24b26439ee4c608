// 该文件是 Fenshi （粉虱） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::detection::DetectionRecord;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

// 点阵字体：5x7 字形，按倍数放大
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
const GLYPH_SCALE: i32 = 2;

pub const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
pub const TEXT_COLOR: [u8; 3] = [255, 255, 255];
pub const INSTRUCTION_COLOR: [u8; 3] = [255, 0, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  box_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
    }
  }
}

impl Draw {
  /// 使用 TTF/OTF 字体绘制标签
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| DrawError::InvalidFont(path.as_ref().display().to_string()))?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  /// 配置了字体路径就加载，否则使用内置点阵字体
  pub fn from_font_option(path: Option<&str>) -> Result<Self, DrawError> {
    match path {
      Some(path) => Self::with_font_file(path),
      None => Ok(Self::default()),
    }
  }

  /// 标签背景的 (宽, 高)，高度含上下留白
  fn label_size(&self, text: &str) -> (i32, i32) {
    let (width, height) = match &self.font {
      Some(font) => {
        let (w, h) = text_size(PxScale::from(self.font_size), font, text);
        (w as i32, h as i32)
      }
      None => (
        text.chars().count() as i32 * (GLYPH_WIDTH + 1) * GLYPH_SCALE,
        GLYPH_HEIGHT * GLYPH_SCALE,
      ),
    };
    (width, height + 2 * LABEL_TEXT_VERTICAL_PADDING)
  }

  pub fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: [u8; 3]) {
    match &self.font {
      Some(font) => draw_text_mut(
        image,
        Rgb(color),
        x,
        y,
        PxScale::from(self.font_size),
        font,
        text,
      ),
      None => draw_bitmap_text(image, x, y, text, Rgb(color)),
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, record: &DetectionRecord) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    if w == 0 || h == 0 {
      return;
    }

    // 仅在绘制时裁剪，记录中的坐标保持不变
    let x_min = record.bbox[0].clamp(0, w - 1) as i32;
    let y_min = record.bbox[1].clamp(0, h - 1) as i32;
    let x_max = record.bbox[2].clamp(0, w - 1) as i32;
    let y_max = record.bbox[3].clamp(0, h - 1) as i32;

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }

    let label = format!("{} {:.2}", record.class_name, record.confidence);
    let (text_width, text_height) = self.label_size(&label);
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w as i32 - label_x);

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, text_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(self.box_color));
      self.draw_text(
        image,
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        &label,
        TEXT_COLOR,
      );
    }
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, records: &[DetectionRecord]) {
    for record in records {
      self.draw_bbox_with_label(image, record);
    }
  }

  /// 返回带标注的副本，不修改原图
  pub fn annotate(&self, image: &RgbImage, records: &[DetectionRecord]) -> RgbImage {
    let mut annotated = image.clone();
    self.draw_detections_on_image(&mut annotated, records);
    annotated
  }
}

fn draw_bitmap_text(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
  let (width, height) = (image.width() as i32, image.height() as i32);
  let advance = (GLYPH_WIDTH + 1) * GLYPH_SCALE;

  for (i, ch) in text.chars().flat_map(char::to_uppercase).enumerate() {
    let Some(glyph) = glyph_bits(ch) else {
      continue;
    };
    let origin_x = x + i as i32 * advance;

    for (row, pattern) in glyph.iter().enumerate() {
      for col in 0..GLYPH_WIDTH {
        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
          continue;
        }
        for dy in 0..GLYPH_SCALE {
          for dx in 0..GLYPH_SCALE {
            let px = origin_x + col * GLYPH_SCALE + dx;
            let py = y + row as i32 * GLYPH_SCALE + dy;
            if px >= 0 && px < width && py >= 0 && py < height {
              image.put_pixel(px as u32, py as u32, color);
            }
          }
        }
      }
    }
  }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
  let bits = match ch {
    'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
    'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
    'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
    'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
    'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
    'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
    'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
    'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
    'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
    'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
    'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
    'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
    'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
    'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
    'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
    'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
    'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
    'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
    'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
    'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
    'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
    'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
    'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
    'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
    'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
    'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
    '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
    '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
    '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
    '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
    '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
    '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
    '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
    '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
    '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
    '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
    '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
    ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
    '\'' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
    '-' => [0, 0, 0, 0b11111, 0, 0, 0],
    '_' => [0, 0, 0, 0, 0, 0, 0b11111],
    '/' => [0, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0],
    '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
    ' ' => [0; 7],
    _ => return None,
  };
  Some(bits)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(bbox: [i64; 4]) -> DetectionRecord {
    DetectionRecord {
      class_name: "whitefly".to_string(),
      confidence: 0.87,
      bbox,
    }
  }

  #[test]
  fn test_annotate_leaves_source_untouched() {
    let source = RgbImage::from_pixel(64, 64, Rgb([10, 10, 10]));
    let annotated = Draw::default().annotate(&source, &[record([8, 30, 40, 60])]);

    assert!(source.pixels().all(|p| *p == Rgb([10, 10, 10])));
    assert_eq!(*annotated.get_pixel(8, 45), Rgb(BOX_COLOR));
    assert_eq!(*annotated.get_pixel(9, 45), Rgb(BOX_COLOR));
    assert_eq!(*annotated.get_pixel(20, 45), Rgb([10, 10, 10]));
  }

  #[test]
  fn test_out_of_bounds_box_is_clipped() {
    let source = RgbImage::new(64, 64);
    let annotated = Draw::default().annotate(&source, &[record([-20, -20, 100, 100])]);
    assert_eq!(*annotated.get_pixel(63, 40), Rgb(BOX_COLOR));
    assert_eq!(*annotated.get_pixel(30, 40), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_degenerate_box_skipped() {
    let source = RgbImage::new(16, 16);
    let annotated = Draw::default().annotate(&source, &[record([5, 5, 5, 9])]);
    assert_eq!(annotated, source);
  }

  #[test]
  fn test_bitmap_text_draws_pixels() {
    let mut image = RgbImage::new(200, 40);
    Draw::default().draw_text(&mut image, 10, 10, "Press 'q' to exit", INSTRUCTION_COLOR);
    assert!(image.pixels().any(|p| *p == Rgb(INSTRUCTION_COLOR)));
  }

  #[test]
  fn test_known_glyphs() {
    for ch in "ABCXYZ0123456789.:'-_/% ".chars() {
      assert!(glyph_bits(ch).is_some(), "missing glyph {ch}");
    }
    assert!(glyph_bits('@').is_none());
  }

  #[test]
  fn test_font_label_background_fits_text() {
    let path = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";
    if !Path::new(path).is_file() {
      return;
    }
    let draw = Draw::with_font_file(path).unwrap();
    let (measured, height) = draw.label_size("whitefly 0.87");
    let (narrow, _) = draw.label_size("iiiiiiii 0.87");
    assert!(narrow < measured);
    assert!(height > 2 * LABEL_TEXT_VERTICAL_PADDING);

    let source = RgbImage::new(240, 120);
    let annotated = draw.annotate(&source, &[record([10, 60, 200, 110])]);
    let label_y = (60 - height) as u32;
    assert_eq!(
      *annotated.get_pixel(10 + measured as u32 - 1, label_y),
      Rgb(BOX_COLOR)
    );
    assert_eq!(*annotated.get_pixel(10 + measured as u32, label_y), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_invalid_font_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::with_font_file(&path),
      Err(DrawError::InvalidFont(_))
    ));
  }
}
