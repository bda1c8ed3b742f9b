//! 画像から埋め込みベクトルを得る
//!
//! 処理の流れ:
//! 1. バックボーンの入力解像度（正方形）へバイリニア補間でリサイズ
//! 2. 255で割って [0, 1] に正規化
//! 3. 先頭にバッチ次元を追加してバックボーンで推論
//! 4. サイズ1の次元をすべて取り除いて1次元の埋め込みにする
//!
//! 途中のバッファ（リサイズ画像・正規化済み配列・推論出力）はすべて
//! `embed` のスコープ内で所有され、エラー時も含めて抜けた時点で解放されます。

use std::path::Path;

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};
use crate::ml::image_loader::{load_pixels, PixelTensor};

/// バックボーン入力テンソルの並び
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [1, H, W, 3]（TF系のMobileNet）
    #[default]
    Nhwc,
    /// [1, 3, H, W]
    Nchw,
}

impl TensorLayout {
    pub fn batched_shape(self, size: u32) -> [usize; 4] {
        let s = size as usize;
        match self {
            TensorLayout::Nhwc => [1, s, s, 3],
            TensorLayout::Nchw => [1, 3, s, s],
        }
    }
}

/// バックボーンへの入力（バッチ次元付き）
#[derive(Debug)]
pub struct BackboneInput {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

/// バックボーンの生の出力
#[derive(Debug)]
pub struct BackboneOutput {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

/// 学習済みで凍結された特徴抽出器
///
/// 読み込み後は読み取り専用として扱います。
pub trait Backbone {
    /// 識別名（メタデータに記録される）
    fn name(&self) -> &str;

    /// 入力解像度（正方形）
    fn input_size(&self) -> u32;

    fn layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    /// 1バッチ分の順伝播
    fn infer(&self, input: BackboneInput) -> Result<BackboneOutput>;
}

/// 1枚の画像の特徴ベクトル
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// バックボーンをラップして固定長の埋め込みを返す
pub struct Embedder {
    backbone: Box<dyn Backbone>,
    embedding_dim: usize,
}

impl Embedder {
    pub fn new(backbone: Box<dyn Backbone>, embedding_dim: usize) -> Self {
        Self { backbone, embedding_dim }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn input_size(&self) -> u32 {
        self.backbone.input_size()
    }

    pub fn backbone_name(&self) -> &str {
        self.backbone.name()
    }

    /// 画像テンソルから埋め込みを計算
    pub fn embed(&self, pixels: &PixelTensor) -> Result<Embedding> {
        let size = self.backbone.input_size();
        let layout = self.backbone.layout();

        let input = BackboneInput {
            data: preprocess(pixels, size, layout),
            shape: layout.batched_shape(size),
        };
        let output = self.backbone.infer(input)?;
        let values = squeeze(output)?;

        if values.len() != self.embedding_dim {
            return Err(TriageError::ShapeMismatch(format!(
                "埋め込み次元が {} ではなく {} です",
                self.embedding_dim,
                values.len()
            )));
        }

        Ok(Embedding(values))
    }

    /// ファイルを読み込んで埋め込みを計算
    pub fn embed_path(&self, path: &Path) -> Result<Embedding> {
        let pixels = load_pixels(path)?;
        self.embed(&pixels)
    }
}

/// リサイズと [0, 1] 正規化
fn preprocess(pixels: &PixelTensor, size: u32, layout: TensorLayout) -> Vec<f32> {
    let resized = imageops::resize(pixels.as_image(), size, size, FilterType::Triangle);
    let s = size as usize;

    match layout {
        TensorLayout::Nhwc => resized.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        TensorLayout::Nchw => {
            let mut data = Vec::with_capacity(3 * s * s);
            for channel in 0..3 {
                for pixel in resized.pixels() {
                    data.push(pixel[channel] as f32 / 255.0);
                }
            }
            data
        }
    }
}

/// サイズ1の次元を取り除いて1次元にする
fn squeeze(output: BackboneOutput) -> Result<Vec<f32>> {
    let expected: usize = output.shape.iter().product();
    if expected != output.data.len() {
        return Err(TriageError::ShapeMismatch(format!(
            "出力形状 {:?} とデータ長 {} が一致しません",
            output.shape,
            output.data.len()
        )));
    }

    let non_unit = output.shape.iter().filter(|&&d| d != 1).count();
    if non_unit > 1 {
        return Err(TriageError::ShapeMismatch(format!(
            "出力 {:?} は1次元に縮約できません",
            output.shape
        )));
    }

    Ok(output.data)
}
