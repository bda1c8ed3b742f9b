//! モデル推論機能

use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use crate::error::{Result, TriageError};
use crate::ml::embedder::Embedding;
use crate::ml::ml_model::{ClassifierConfig, TriageClassifier};
use crate::model::{load_model_with_metadata, ModelMetadata};
use crate::types::ImageKind;

/// 埋め込みから2クラスの確率を返すもの
pub trait EmbeddingClassifier {
    /// [p(kept), p(deleted)]
    fn probabilities(&self, embedding: &Embedding) -> Result<Vec<f32>>;

    /// 確率が最大のクラス（同値なら kept）
    fn classify(&self, embedding: &Embedding) -> Result<ImageKind> {
        let probabilities = self.probabilities(embedding)?;
        ImageKind::from_probabilities(&probabilities).ok_or_else(|| {
            TriageError::ShapeMismatch(format!("確率ベクトルが不正です: {:?}", probabilities))
        })
    }
}

/// 推論エンジン
pub struct ClassifierEngine<B: Backend> {
    model: TriageClassifier<B>,
    metadata: ModelMetadata,
    device: B::Device,
}

impl<B: Backend> ClassifierEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load(model_path: &Path, device: &B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path)?;

        let model = ClassifierConfig::new(metadata.embedding_dim)
            .with_hidden_dim(metadata.hidden_dim)
            .init::<B>(device);

        // モデルの重みを復元
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, model_binary, device)
            .map_err(|e| TriageError::Persistence(format!("モデル重みの読み込みエラー: {:?}", e)))?;
        let model = model.load_record(record);

        info!(
            "分類器を読み込みました: {} (入力 {} 次元, 隠れ層 {})",
            model_path.display(),
            metadata.embedding_dim,
            metadata.hidden_dim
        );

        Ok(Self {
            model,
            metadata,
            device: device.clone(),
        })
    }

    /// 読み込み後にバックボーンの出力次元と照合する
    pub fn load_for_embedding_dim(model_path: &Path, embedding_dim: usize, device: &B::Device) -> Result<Self> {
        let engine = Self::load(model_path, device)?;
        engine.metadata.check_embedding_dim(embedding_dim)?;
        Ok(engine)
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// 1件の埋め込みを推論
    pub fn predict(&self, embedding: &Embedding) -> Result<Vec<f32>> {
        let dim = self.metadata.embedding_dim;
        if embedding.len() != dim {
            return Err(TriageError::ShapeMismatch(format!(
                "埋め込み次元が {} ではなく {} です",
                dim,
                embedding.len()
            )));
        }

        let tensor = Tensor::<B, 1>::from_floats(embedding.as_slice(), &self.device).reshape([1, dim]);
        self.model
            .forward_probabilities(tensor)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TriageError::ShapeMismatch(format!("推論結果の取得エラー: {:?}", e)))
    }
}

impl<B: Backend> EmbeddingClassifier for ClassifierEngine<B> {
    fn probabilities(&self, embedding: &Embedding) -> Result<Vec<f32>> {
        self.predict(embedding)
    }
}
