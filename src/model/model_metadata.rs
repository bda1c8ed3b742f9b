//! モデルメタデータの定義
//!
//! tar.gz形式で分類器と一緒に保存され、読み込み時にアーキテクチャの復元と
//! 埋め込み次元の整合性チェックに使われます。

use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};
use crate::types::ImageKind;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// 出力クラスの順序
    /// 例: ["kept", "deleted"]
    pub class_labels: Vec<String>,

    /// 入力となる埋め込みの次元（バックボーンの出力次元と一致する必要がある）
    pub embedding_dim: usize,

    /// 隠れ層のユニット数
    pub hidden_dim: usize,

    /// 学習時に使ったバックボーンの識別名
    pub backbone: String,

    /// バックボーンの入力解像度
    pub input_size: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 1エポックあたりのバッチ数
    pub batches_per_epoch: u32,

    /// 学習に使った例の数
    #[serde(default)]
    pub num_examples: u32,

    /// 最終エポックの損失
    #[serde(default)]
    pub final_loss: f64,

    /// 最終エポックの正解率 (0.0-1.0)
    #[serde(default)]
    pub final_accuracy: f64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        embedding_dim: usize,
        hidden_dim: usize,
        backbone: String,
        input_size: u32,
        num_epochs: u32,
        batches_per_epoch: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels: ImageKind::ALL.iter().map(|k| k.dir_name().to_string()).collect(),
            embedding_dim,
            hidden_dim,
            backbone,
            input_size,
            num_epochs,
            batches_per_epoch,
            num_examples: 0,
            final_loss: 0.0,
            final_accuracy: 0.0,
            trained_at,
        }
    }

    pub fn with_results(mut self, num_examples: u32, final_loss: f64, final_accuracy: f64) -> Self {
        self.num_examples = num_examples;
        self.final_loss = final_loss;
        self.final_accuracy = final_accuracy;
        self
    }

    /// 読み込んだ分類器を指定の埋め込み次元で使えるか確認
    pub fn check_embedding_dim(&self, embedding_dim: usize) -> Result<()> {
        if self.embedding_dim != embedding_dim {
            return Err(TriageError::ShapeMismatch(format!(
                "分類器の入力次元 {} とバックボーンの出力次元 {} が一致しません",
                self.embedding_dim, embedding_dim
            )));
        }
        Ok(())
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
