//! エラー型の定義

use thiserror::Error;

/// パイプライン全体で使うエラー
#[derive(Error, Debug)]
pub enum TriageError {
    /// 画像として読み込めない（形式不明・破損・権限）
    #[error("画像のデコードに失敗しました: {0}")]
    Decode(String),

    /// 埋め込みやラベルの次元が合わない
    #[error("形状が一致しません: {0}")]
    ShapeMismatch(String),

    /// モデルアーティファクトの読み書きに失敗
    #[error("永続化エラー: {0}")]
    Persistence(String),

    /// バックボーンの読み込み・推論に失敗
    #[error("バックボーンエラー: {0}")]
    Backbone(String),

    /// 学習データの構成が不正
    #[error("データセットエラー: {0}")]
    Dataset(String),

    #[error("設定エラー: {0}")]
    Config(String),

    /// ファイル単位の処理が制限時間を超えた
    #[error("処理がタイムアウトしました ({millis}ms): {path}")]
    Timeout { path: String, millis: u64 },

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for TriageError {
    fn from(err: image::ImageError) -> Self {
        TriageError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
