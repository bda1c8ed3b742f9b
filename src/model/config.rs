//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・バックボーン・学習・仕分けの設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::ml::embedder::TensorLayout;
use crate::ml::generator::IndexMode;
use crate::sorter::TransferMode;

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// バックボーン設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneSettings {
    /// ONNXモデルのローカルパス（キャッシュ先を兼ねる）
    pub model_path: PathBuf,
    /// ローカルに無い場合の取得元URL
    #[serde(default)]
    pub url: Option<String>,
    /// 入力解像度（正方形）
    pub input_size: u32,
    /// 埋め込み次元
    pub embedding_dim: usize,
    /// 入力テンソルの並び
    #[serde(default)]
    pub layout: TensorLayout,
    /// ONNX Runtimeのスレッド数
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_intra_threads() -> usize {
    4
}

impl Default for BackboneSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/mobilenet_v3_small_100_224_feature_vector.onnx"),
            url: None,
            input_size: 224,
            embedding_dim: 1024,
            layout: TensorLayout::default(),
            intra_threads: default_intra_threads(),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// kept/ と deleted/ を含む学習データディレクトリ
    pub data_dir: PathBuf,
    /// 隠れ層のユニット数
    pub hidden_dim: usize,
    /// エポック数
    pub num_epochs: usize,
    /// 1エポックあたりのバッチ数
    pub batches_per_epoch: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ジェネレータの総ドロー数
    pub num_draws: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    #[serde(default)]
    pub index_mode: IndexMode,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("train_assets"),
            hidden_dim: 100,
            num_epochs: 10,
            batches_per_epoch: 4,
            batch_size: 1,
            num_draws: 100,
            learning_rate: 1e-3,
            seed: 42,
            index_mode: IndexMode::default(),
        }
    }
}

/// 仕分け設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SortSettings {
    /// 分類対象とするMIMEタイプ
    pub accepted_mime_types: Vec<String>,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    /// 1ファイルあたりのデコード制限時間（ミリ秒、0で無制限）
    pub file_timeout_ms: u64,
}

impl Default for SortSettings {
    fn default() -> Self {
        Self {
            accepted_mime_types: vec!["image/jpeg".to_string()],
            transfer_mode: TransferMode::default(),
            file_timeout_ms: 30_000,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// 分類器アーティファクトのパス
    pub model_path: PathBuf,
    pub backbone: BackboneSettings,
    pub training: TrainingSettings,
    pub sort: SortSettings,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            model_path: PathBuf::from("models/triage_model.tar.gz"),
            backbone: BackboneSettings::default(),
            training: TrainingSettings::default(),
            sort: SortSettings::default(),
        }
    }
}

impl TriageConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("triage_config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TriageError::Config(format!("{} を読み込めません: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            TriageError::Config(format!("{} の解析に失敗しました: {}", path.display(), e))
        })
    }

    /// 指定パスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("設定ファイルの読み込みに失敗しました: {}", e);
                    warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// 学習前の値チェック
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if t.hidden_dim == 0 || t.batch_size == 0 || t.num_epochs == 0 || t.batches_per_epoch == 0 {
            return Err(TriageError::Config(
                "hidden_dim / batch_size / num_epochs / batches_per_epoch は1以上が必要です".to_string(),
            ));
        }
        if self.backbone.embedding_dim == 0 || self.backbone.input_size == 0 {
            return Err(TriageError::Config(
                "embedding_dim と input_size は1以上が必要です".to_string(),
            ));
        }
        if self.sort.accepted_mime_types.is_empty() {
            warn!("accepted_mime_types が空です。すべてのファイルが ignored に送られます");
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("分類器モデル: {}", self.model_path.display());
        println!("\n--- バックボーン ---");
        println!("ONNXモデル: {}", self.backbone.model_path.display());
        println!("入力サイズ: {}x{}", self.backbone.input_size, self.backbone.input_size);
        println!("埋め込み次元: {}", self.backbone.embedding_dim);
        println!("\n--- トレーニング設定 ---");
        println!("学習データ: {}", self.training.data_dir.display());
        println!("隠れ層: {}", self.training.hidden_dim);
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチ数/エポック: {}", self.training.batches_per_epoch);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("シード: {}", self.training.seed);
        println!("\n--- 仕分け設定 ---");
        println!("対象MIME: {}", self.sort.accepted_mime_types.join(", "));
        println!("転送方式: {:?}", self.sort.transfer_mode);
        println!("タイムアウト: {}ms", self.sort.file_timeout_ms);
        println!("========================\n");
    }
}
