//! 2クラスを均等に混ぜる学習例ジェネレータ
//!
//! 1回のドローごとに公平なコインを投げ、表なら kept、裏なら deleted の
//! プールからファイルを1つ選び、読み込み・埋め込みを行って返します。
//! 遅延評価の単位は画像ではなくドローです。

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TriageError};
use crate::ml::embedder::{Embedder, Embedding};
use crate::types::{ImageKind, ImageRecord, RecordKind};

/// プール内の位置の進め方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// 1つのカーソルをどちらのプールを引いても進める
    Shared,
    /// プールごとに独立したカーソル
    #[default]
    PerPool,
}

/// (埋め込み, one-hotラベル)
#[derive(Debug, Clone)]
pub struct LabeledExample {
    pub embedding: Embedding,
    pub label: [f32; 2],
}

impl LabeledExample {
    pub fn kind(&self) -> Option<ImageKind> {
        ImageKind::ALL.into_iter().find(|kind| kind.one_hot() == self.label)
    }
}

/// kept / deleted の2つのファイルプール
#[derive(Debug, Clone, Default)]
pub struct TrainingPools {
    pub kept: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
}

impl TrainingPools {
    /// `<data_dir>/kept` と `<data_dir>/deleted` から読み込む
    ///
    /// 名前が `.` で始まるファイルは除外し、順序はファイル名順に固定します。
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let kept = list_pool(data_dir, ImageKind::Kept)?;
        let deleted = list_pool(data_dir, ImageKind::Deleted)?;
        Ok(Self {
            kept: kept.into_iter().map(|r| r.path).collect(),
            deleted: deleted.into_iter().map(|r| r.path).collect(),
        })
    }

    pub fn pool(&self, kind: ImageKind) -> &[PathBuf] {
        match kind {
            ImageKind::Kept => &self.kept,
            ImageKind::Deleted => &self.deleted,
        }
    }

    pub fn len(&self) -> usize {
        self.kept.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// クラスディレクトリ内のファイルを列挙
pub fn list_pool(data_dir: &Path, kind: ImageKind) -> Result<Vec<ImageRecord>> {
    let class_dir = data_dir.join(kind.dir_name());
    if !class_dir.is_dir() {
        return Err(TriageError::Dataset(format!(
            "クラスディレクトリが存在しません: {}",
            class_dir.display()
        )));
    }

    let mut records = Vec::new();
    for entry in std::fs::read_dir(&class_dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !entry.file_type()?.is_file() {
            continue;
        }
        records.push(ImageRecord::new(entry.path(), RecordKind::from(kind)));
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));

    debug!("クラス '{}': {} 件", kind, records.len());
    Ok(records)
}

/// 有限のドロー数だけ学習例を返すイテレータ
///
/// 再スタートはできません。範囲外になったカーソルはプール長で折り返します。
pub struct BalancedExampleGenerator<'a> {
    embedder: &'a Embedder,
    pools: TrainingPools,
    remaining: usize,
    mode: IndexMode,
    shared_cursor: usize,
    cursors: [usize; 2],
    rng: StdRng,
}

impl<'a> BalancedExampleGenerator<'a> {
    pub fn new(
        embedder: &'a Embedder,
        pools: TrainingPools,
        num_draws: usize,
        mode: IndexMode,
        seed: u64,
    ) -> Result<Self> {
        for kind in ImageKind::ALL {
            if pools.pool(kind).is_empty() {
                return Err(TriageError::Dataset(format!("'{}' のプールが空です", kind)));
            }
        }

        Ok(Self {
            embedder,
            pools,
            remaining: num_draws,
            mode,
            shared_cursor: 0,
            cursors: [0, 0],
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// 次に使うファイルを選んでカーソルを進める
    fn next_draw(&mut self) -> (ImageKind, PathBuf) {
        let kind = if self.rng.gen_bool(0.5) {
            ImageKind::Kept
        } else {
            ImageKind::Deleted
        };

        let pool = self.pools.pool(kind);
        let cursor = match self.mode {
            IndexMode::Shared => &mut self.shared_cursor,
            IndexMode::PerPool => &mut self.cursors[kind.index()],
        };
        let path = pool[*cursor % pool.len()].clone();
        *cursor += 1;

        (kind, path)
    }
}

impl Iterator for BalancedExampleGenerator<'_> {
    type Item = Result<LabeledExample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let (kind, path) = self.next_draw();
        debug!("ドロー: {} <- {}", kind, path.display());

        Some(self.embedder.embed_path(&path).map(|embedding| LabeledExample {
            embedding,
            label: kind.one_hot(),
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
