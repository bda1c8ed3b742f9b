#![allow(dead_code)]

use std::path::Path;

use image::{ImageFormat, Rgb, RgbImage};
use image_triage_lib::ml::{Backbone, BackboneInput, BackboneOutput, Embedder};
use image_triage_lib::Result;

pub const EMBEDDING_DIM: usize = 1024;

/// チャネル平均を繰り返して並べる決定的なバックボーン
pub struct ChannelMeanBackbone;

impl Backbone for ChannelMeanBackbone {
    fn name(&self) -> &str {
        "channel_mean"
    }

    fn input_size(&self) -> u32 {
        32
    }

    fn infer(&self, input: BackboneInput) -> Result<BackboneOutput> {
        let mut sums = [0.0f32; 3];
        for (i, v) in input.data.iter().enumerate() {
            sums[i % 3] += v;
        }
        let n = (input.data.len() / 3).max(1) as f32;
        let means = sums.map(|s| s / n);

        Ok(BackboneOutput {
            data: (0..EMBEDDING_DIM).map(|i| means[i % 3]).collect(),
            shape: vec![1, EMBEDDING_DIM],
        })
    }
}

pub fn embedder() -> Embedder {
    Embedder::new(Box::new(ChannelMeanBackbone), EMBEDDING_DIM)
}

pub fn write_jpeg(path: &Path, width: u32, height: u32, color: [u8; 3]) {
    RgbImage::from_fn(width, height, |x, y| {
        let jitter = ((x + y) % 4) as u8;
        Rgb([
            color[0].saturating_add(jitter),
            color[1].saturating_add(jitter),
            color[2].saturating_add(jitter),
        ])
    })
    .save_with_format(path, ImageFormat::Jpeg)
    .unwrap();
}

/// kept/ に明るい画像、deleted/ に暗い画像を置いた学習データ
pub fn write_training_data(data_dir: &Path, per_class: usize) {
    let kept = data_dir.join("kept");
    let deleted = data_dir.join("deleted");
    std::fs::create_dir_all(&kept).unwrap();
    std::fs::create_dir_all(&deleted).unwrap();

    for i in 0..per_class {
        let shade = (i * 3) as u8;
        write_jpeg(&kept.join(format!("bright_{i:02}.jpg")), 20 + i as u32, 16, [230 - shade, 220, 210]);
        write_jpeg(&deleted.join(format!("dark_{i:02}.jpg")), 16, 20 + i as u32, [20 + shade, 25, 30]);
    }
    std::fs::write(kept.join(".hidden"), b"not an image").unwrap();
}
