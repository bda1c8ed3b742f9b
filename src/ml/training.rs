//! 分類ヘッドの学習

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::ml::embedder::Embedder;
use crate::ml::generator::{BalancedExampleGenerator, LabeledExample, TrainingPools};
use crate::ml::ml_model::{ClassifierConfig, TriageClassifier};
use crate::model::config::TrainingSettings;
use crate::model::{save_model_with_metadata, ModelMetadata};
use crate::types::argmax_first;

/// バッチデータ
#[derive(Clone, Debug)]
pub struct LabeledBatch<B: Backend> {
    pub embeddings: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

/// 学習例をテンソルにまとめる
#[derive(Clone)]
pub struct LabeledBatcher<B: Backend> {
    device: B::Device,
    embedding_dim: usize,
}

impl<B: Backend> LabeledBatcher<B> {
    pub fn new(device: B::Device, embedding_dim: usize) -> Self {
        Self { device, embedding_dim }
    }

    /// 次元やラベルが不正な例が1つでもあればバッチ全体を拒否します。
    pub fn batch(&self, items: &[LabeledExample]) -> Result<LabeledBatch<B>> {
        let batch_size = items.len();
        let mut all_values = Vec::with_capacity(batch_size * self.embedding_dim);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            if item.embedding.len() != self.embedding_dim {
                return Err(TriageError::ShapeMismatch(format!(
                    "埋め込み次元が {} ではなく {} です",
                    self.embedding_dim,
                    item.embedding.len()
                )));
            }
            let kind = item.kind().ok_or_else(|| {
                TriageError::ShapeMismatch(format!("one-hotラベルではありません: {:?}", item.label))
            })?;

            all_values.extend_from_slice(item.embedding.as_slice());
            targets_vec.push(kind.index() as i64);
        }

        let embeddings = Tensor::<B, 1>::from_floats(all_values.as_slice(), &self.device)
            .reshape([batch_size, self.embedding_dim]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        Ok(LabeledBatch { embeddings, targets })
    }
}

/// 1エポック分の結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// バッチ損失の平均
    pub loss: f64,
    pub accuracy: f64,
    pub num_examples: usize,
}

/// 学習全体の結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: Vec<EpochStats>,
    pub num_examples: usize,
    /// ジェネレータが途中で尽きたか
    pub exhausted: bool,
    pub model_path: PathBuf,
}

impl TrainingReport {
    pub fn final_epoch(&self) -> Option<&EpochStats> {
        self.epochs.last()
    }
}

/// 学習例の列から分類器を学習して保存する
///
/// `settings.num_epochs` × `settings.batches_per_epoch` 回だけパラメータを更新します。
/// 途中で学習例が尽きた場合はそこで打ち切り、それまでの重みを保存します。
/// 学習例の読み込みエラーは致命的です。
pub fn train_classifier<B, I>(
    examples: I,
    settings: &TrainingSettings,
    metadata: ModelMetadata,
    output_path: &Path,
    device: &B::Device,
) -> Result<TrainingReport>
where
    B: AutodiffBackend,
    I: IntoIterator<Item = Result<LabeledExample>>,
{
    if settings.batch_size == 0 {
        return Err(TriageError::Config("training.batch_size は1以上が必要です".to_string()));
    }

    let embedding_dim = metadata.embedding_dim;
    let mut model: TriageClassifier<B> = ClassifierConfig::new(embedding_dim)
        .with_hidden_dim(metadata.hidden_dim)
        .init(device);
    let mut optimizer = AdamConfig::new().init();
    let batcher = LabeledBatcher::<B>::new(device.clone(), embedding_dim);

    info!(
        "学習を開始します: エポック数 {}, バッチ数/エポック {}, バッチサイズ {}, 学習率 {}",
        settings.num_epochs, settings.batches_per_epoch, settings.batch_size, settings.learning_rate
    );

    let mut examples = examples.into_iter();
    let mut history = Vec::with_capacity(settings.num_epochs);
    let mut total_examples = 0usize;
    let mut exhausted = false;

    for epoch in 0..settings.num_epochs {
        let mut epoch_loss = 0.0f64;
        let mut num_batches = 0usize;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for _ in 0..settings.batches_per_epoch {
            let items = examples
                .by_ref()
                .take(settings.batch_size)
                .collect::<Result<Vec<_>>>()?;
            if items.is_empty() {
                exhausted = true;
                break;
            }

            let batch = batcher.batch(&items)?;
            let output = model.forward_classification(batch.embeddings, batch.targets);

            let loss_value: f64 = output.loss.clone().into_scalar().elem();
            let logits = output
                .output
                .clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| TriageError::ShapeMismatch(format!("ロジットを取得できません: {:?}", e)))?;
            correct += count_correct(&logits, &items);
            seen += items.len();

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(settings.learning_rate, model, grads);

            epoch_loss += loss_value;
            num_batches += 1;
        }

        if num_batches > 0 {
            let stats = EpochStats {
                epoch: epoch + 1,
                loss: epoch_loss / num_batches as f64,
                accuracy: correct as f64 / seen as f64,
                num_examples: seen,
            };
            info!(
                "Epoch {}/{}: loss = {:.4}, acc = {:.2}%",
                stats.epoch,
                settings.num_epochs,
                stats.loss,
                stats.accuracy * 100.0
            );
            total_examples += seen;
            history.push(stats);
        }

        if exhausted {
            warn!("学習例が尽きたため {} エポック目で打ち切ります", epoch + 1);
            break;
        }
    }

    if total_examples == 0 {
        return Err(TriageError::Dataset("学習例が1つもありません".to_string()));
    }

    let (final_loss, final_accuracy) = history
        .last()
        .map(|s| (s.loss, s.accuracy))
        .unwrap_or_default();
    let metadata = metadata.with_results(total_examples as u32, final_loss, final_accuracy);

    let model_binary = model_to_bytes(model.valid())?;
    let model_path = save_model_with_metadata(output_path, &metadata, &model_binary)?;
    info!("学習完了: {} に保存しました", model_path.display());

    Ok(TrainingReport {
        epochs: history,
        num_examples: total_examples,
        exhausted,
        model_path,
    })
}

/// 学習データディレクトリから学習を実行する
pub fn train_from_directory<B: AutodiffBackend>(
    embedder: &Embedder,
    settings: &TrainingSettings,
    output_path: &Path,
    device: &B::Device,
) -> Result<TrainingReport> {
    let pools = TrainingPools::from_directory(&settings.data_dir)?;
    info!(
        "学習データ: kept {} 枚, deleted {} 枚 ({})",
        pools.kept.len(),
        pools.deleted.len(),
        settings.data_dir.display()
    );

    let generator = BalancedExampleGenerator::new(
        embedder,
        pools,
        settings.num_draws,
        settings.index_mode,
        settings.seed,
    )?;
    let metadata = ModelMetadata::new(
        embedder.embedding_dim(),
        settings.hidden_dim,
        embedder.backbone_name().to_string(),
        embedder.input_size(),
        settings.num_epochs as u32,
        settings.batches_per_epoch as u32,
    );

    train_classifier::<B, _>(generator, settings, metadata, output_path, device)
}

/// 重みをf32精度のバイト列にする
pub fn model_to_bytes<B: Backend>(model: TriageClassifier<B>) -> Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.into_record(), ())
        .map_err(|e| TriageError::Persistence(format!("モデル重みのシリアライズエラー: {:?}", e)))
}

fn count_correct(logits: &[f32], items: &[LabeledExample]) -> usize {
    logits
        .chunks(2)
        .zip(items)
        .filter(|(row, item)| argmax_first(row).map(|i| item.label[i] == 1.0).unwrap_or(false))
        .count()
}
