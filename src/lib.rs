//! 画像の「残す / 消す」仕分けパイプライン
//!
//! 凍結したバックボーンで画像を埋め込みに変換し、その上に小さな分類器を学習して、
//! フォルダ内の画像を `kept/` `deleted/` `ignored/` に仕分けます。

pub mod commands;
pub mod error;
pub mod ml;
pub mod model;
pub mod sorter;
pub mod types;

pub use error::{Result, TriageError};
pub use ml::{
    BalancedExampleGenerator, ClassifierEngine, Embedder, Embedding, EmbeddingClassifier, IndexMode,
    LabeledExample, TrainingReport,
};
pub use model::{ModelMetadata, TriageConfig};
pub use sorter::{SortReport, Sorter, TransferMode};
pub use types::{ImageKind, SortBucket};
