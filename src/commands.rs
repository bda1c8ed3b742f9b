//! CLIから呼ばれる学習・仕分け・情報表示の入口
//!
//! 設定に従ってバックボーンとバックエンドを選び、各処理を組み立てます。

use std::path::Path;
use std::sync::atomic::AtomicBool;

use tracing::info;

use crate::error::Result;
use crate::ml::backend::{resolve_device_type, CpuBackend, CpuTrainBackend};
#[cfg(feature = "wgpu")]
use crate::ml::backend::{gpu_device, GpuBackend, GpuTrainBackend};
use crate::ml::embedder::Embedder;
use crate::ml::inference::ClassifierEngine;
use crate::ml::onnx_backbone::OnnxBackbone;
use crate::ml::training::{train_from_directory, TrainingReport};
#[cfg(feature = "wgpu")]
use crate::model::config::DeviceType;
use crate::model::config::{BackboneSettings, TriageConfig};
use crate::model::{artifact_path, load_metadata, ModelMetadata};
use crate::sorter::{SortReport, Sorter};

/// 設定からバックボーンを読み込んで埋め込み器を作る
pub fn load_embedder(settings: &BackboneSettings) -> Result<Embedder> {
    let backbone = OnnxBackbone::from_settings(settings)?;
    Ok(Embedder::new(Box::new(backbone), settings.embedding_dim))
}

/// 学習データから分類器を学習して `config.model_path` に保存
pub fn train(config: &TriageConfig) -> Result<TrainingReport> {
    config.validate()?;
    let embedder = load_embedder(&config.backbone)?;
    train_with_embedder(config, &embedder)
}

pub fn train_with_embedder(config: &TriageConfig, embedder: &Embedder) -> Result<TrainingReport> {
    let device_type = resolve_device_type(&config.device_type);
    info!("計算デバイス: {}", device_type);

    match device_type {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            train_from_directory::<GpuTrainBackend>(embedder, &config.training, &config.model_path, &gpu_device())
        }
        _ => train_from_directory::<CpuTrainBackend>(
            embedder,
            &config.training,
            &config.model_path,
            &Default::default(),
        ),
    }
}

/// `source` のファイルを `dest_root` 配下の kept / deleted / ignored に仕分ける
pub fn classify(config: &TriageConfig, source: &Path, dest_root: &Path, cancel: &AtomicBool) -> Result<SortReport> {
    let embedder = load_embedder(&config.backbone)?;
    classify_with_embedder(config, &embedder, source, dest_root, cancel)
}

pub fn classify_with_embedder(
    config: &TriageConfig,
    embedder: &Embedder,
    source: &Path,
    dest_root: &Path,
    cancel: &AtomicBool,
) -> Result<SortReport> {
    let model_path = artifact_path(&config.model_path);
    let dim = embedder.embedding_dim();

    match resolve_device_type(&config.device_type) {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            let engine = ClassifierEngine::<GpuBackend>::load_for_embedding_dim(&model_path, dim, &gpu_device())?;
            let sorter = Sorter::new(embedder, &engine, config.sort.clone())?;
            sorter.sort_directory(source, dest_root, cancel)
        }
        _ => {
            let engine = ClassifierEngine::<CpuBackend>::load_for_embedding_dim(&model_path, dim, &Default::default())?;
            let sorter = Sorter::new(embedder, &engine, config.sort.clone())?;
            sorter.sort_directory(source, dest_root, cancel)
        }
    }
}

/// 分類器アーティファクトのメタデータ
pub fn model_info(model_path: &Path) -> Result<ModelMetadata> {
    load_metadata(&artifact_path(model_path))
}
