//! 仕分け用の分類ヘッド
//!
//! バックボーンの埋め込みを受け取り、kept / deleted の2クラスに分類します。

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use tracing::debug;

use crate::types::ImageKind;

/// クラス数
pub const NUM_CLASSES: usize = ImageKind::ALL.len();

/// モデル設定
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// 入力（埋め込み）の次元
    pub embedding_dim: usize,
    /// 隠れ層のユニット数
    #[config(default = 100)]
    pub hidden_dim: usize,
    #[config(default = 2)]
    pub num_classes: usize,
}

impl ClassifierConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> TriageClassifier<B> {
        debug!(
            "[Model] FC1: {} -> {} (ReLU), FC2: {} -> {} (Softmax)",
            self.embedding_dim, self.hidden_dim, self.hidden_dim, self.num_classes
        );

        TriageClassifier {
            fc1: LinearConfig::new(self.embedding_dim, self.hidden_dim).init(device),
            fc2: LinearConfig::new(self.hidden_dim, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 埋め込みを2クラスに分類する全結合ネットワーク
///
/// # アーキテクチャ
/// - FC: embedding_dim -> hidden_dim + ReLU
/// - FC: hidden_dim -> 2
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct TriageClassifier<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> TriageClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `embeddings`: [batch_size, embedding_dim]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(embeddings);
        let x = self.activation.forward(x);
        self.fc2.forward(x)
    }

    /// クラスごとの確率（各行の和は1）
    pub fn forward_probabilities(&self, embeddings: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(embeddings), 1)
    }

    /// 入力次元
    pub fn embedding_dim(&self) -> usize {
        let [d_input, _] = self.fc1.weight.dims();
        d_input
    }

    /// 順伝播と損失計算（学習用）
    ///
    /// 損失はソフトマックス出力とone-hotラベルの交差エントロピーです。
    pub fn forward_classification(
        &self,
        embeddings: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(embeddings);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
