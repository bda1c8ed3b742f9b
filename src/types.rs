use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 学習ラベル（2クラス）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Kept,
    Deleted,
}

impl ImageKind {
    /// 出力層のクラス順序
    pub const ALL: [ImageKind; 2] = [ImageKind::Kept, ImageKind::Deleted];

    /// クラスインデックス（kept = 0, deleted = 1）
    pub fn index(self) -> usize {
        match self {
            ImageKind::Kept => 0,
            ImageKind::Deleted => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// one-hotラベル（[1,0] = kept, [0,1] = deleted）
    pub fn one_hot(self) -> [f32; 2] {
        match self {
            ImageKind::Kept => [1.0, 0.0],
            ImageKind::Deleted => [0.0, 1.0],
        }
    }

    /// 出力確率から最大値のクラスを選ぶ（同値なら先頭を優先）
    ///
    /// NaN や無限大を含む場合は `None`
    pub fn from_probabilities(probabilities: &[f32]) -> Option<Self> {
        if probabilities.iter().any(|p| !p.is_finite()) {
            return None;
        }
        argmax_first(probabilities).and_then(Self::from_index)
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            ImageKind::Kept => "kept",
            ImageKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// 最大値の最初のインデックス
pub fn argmax_first(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// 仕分け先
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBucket {
    Kept,
    Deleted,
    /// 画像以外のファイル
    Ignored,
}

impl SortBucket {
    pub const ALL: [SortBucket; 3] = [SortBucket::Kept, SortBucket::Deleted, SortBucket::Ignored];

    pub fn dir_name(self) -> &'static str {
        match self {
            SortBucket::Kept => "kept",
            SortBucket::Deleted => "deleted",
            SortBucket::Ignored => "ignored",
        }
    }
}

impl From<ImageKind> for SortBucket {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Kept => SortBucket::Kept,
            ImageKind::Deleted => SortBucket::Deleted,
        }
    }
}

/// ディレクトリ走査時のファイル種別タグ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Kept,
    Deleted,
    Unlabeled,
}

impl From<ImageKind> for RecordKind {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Kept => RecordKind::Kept,
            ImageKind::Deleted => RecordKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub kind: RecordKind,
}

impl ImageRecord {
    pub fn new(path: impl Into<PathBuf>, kind: RecordKind) -> Self {
        Self { path: path.into(), kind }
    }
}
