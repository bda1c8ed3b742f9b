//! 学習済み分類器によるフォルダ仕分け
//!
//! 入力ディレクトリ直下のファイルを1つずつ判定し、出力先の
//! `kept/` `deleted/` `ignored/` に転送します。
//! 1ファイルの失敗は記録してスキップし、残りの処理は続けます。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::ml::embedder::Embedder;
use crate::ml::image_loader::{load_pixels, sniff_mime_type_of, PixelTensor};
use crate::ml::inference::EmbeddingClassifier;
use crate::model::config::SortSettings;
use crate::types::{ImageKind, ImageRecord, RecordKind, SortBucket};

/// 出力先への転送方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// 元ファイルを残す
    #[default]
    Copy,
    /// コピー後に元ファイルを削除
    Move,
}

/// 仕分けに失敗したファイル
#[derive(Debug, Clone)]
pub struct SortFailure {
    pub path: PathBuf,
    pub error: String,
}

/// 仕分け結果
#[derive(Debug, Clone, Default)]
pub struct SortReport {
    pub kept: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub failures: Vec<SortFailure>,
    /// 途中でキャンセルされたか
    pub cancelled: bool,
}

impl SortReport {
    pub fn count(&self, bucket: SortBucket) -> usize {
        match bucket {
            SortBucket::Kept => self.kept,
            SortBucket::Deleted => self.deleted,
            SortBucket::Ignored => self.ignored,
        }
    }

    pub fn transferred(&self) -> usize {
        self.kept + self.deleted + self.ignored
    }

    fn record(&mut self, bucket: SortBucket) {
        match bucket {
            SortBucket::Kept => self.kept += 1,
            SortBucket::Deleted => self.deleted += 1,
            SortBucket::Ignored => self.ignored += 1,
        }
    }
}

/// 埋め込み器と分類器を使ってファイルを仕分ける
pub struct Sorter<'a> {
    embedder: &'a Embedder,
    classifier: &'a dyn EmbeddingClassifier,
    settings: SortSettings,
    decode: fn(&Path) -> Result<PixelTensor>,
    // Drop で shutdown_background する
    runtime: Option<tokio::runtime::Runtime>,
}

impl<'a> Sorter<'a> {
    pub fn new(
        embedder: &'a Embedder,
        classifier: &'a dyn EmbeddingClassifier,
        settings: SortSettings,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        Ok(Self {
            embedder,
            classifier,
            settings,
            decode: load_pixels,
            runtime: Some(runtime),
        })
    }

    #[cfg(test)]
    fn with_decoder(mut self, decode: fn(&Path) -> Result<PixelTensor>) -> Self {
        self.decode = decode;
        self
    }

    /// `source` 直下のファイルを `dest_root` 配下に仕分ける
    ///
    /// 出力ディレクトリは最初に3つとも作成します。サブディレクトリは対象外です。
    /// `cancel` はファイルの境界ごとに確認し、立っていればそこで終了します。
    pub fn sort_directory(&self, source: &Path, dest_root: &Path, cancel: &AtomicBool) -> Result<SortReport> {
        for bucket in SortBucket::ALL {
            fs::create_dir_all(dest_root.join(bucket.dir_name()))?;
        }

        let files = list_files(source)?;
        info!("仕分けを開始します: {} ({} ファイル)", source.display(), files.len());

        let mut report = SortReport::default();
        for ImageRecord { path, .. } in files {
            if cancel.load(Ordering::SeqCst) {
                info!("キャンセルされました。残りのファイルは処理しません");
                report.cancelled = true;
                break;
            }

            match self.sort_file(&path, dest_root) {
                Ok(bucket) => report.record(bucket),
                Err(e) => {
                    warn!("スキップ: {}: {}", path.display(), e);
                    report.failures.push(SortFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "仕分け完了: kept {}, deleted {}, ignored {}, 失敗 {}",
            report.kept,
            report.deleted,
            report.ignored,
            report.failures.len()
        );
        Ok(report)
    }

    /// 1ファイルを判定して転送
    pub fn sort_file(&self, path: &Path, dest_root: &Path) -> Result<SortBucket> {
        let bucket = match sniff_mime_type_of(path)? {
            Some(mime) if self.accepts(mime) => {
                let pixels = self.decode_with_timeout(path)?;
                let embedding = self.embedder.embed(&pixels)?;
                let probabilities = self.classifier.probabilities(&embedding)?;
                let kind = ImageKind::from_probabilities(&probabilities).ok_or_else(|| {
                    TriageError::ShapeMismatch(format!("確率ベクトルが不正です: {:?}", probabilities))
                })?;
                info!("{}: {:?} -> {}", path.display(), probabilities, kind);
                SortBucket::from(kind)
            }
            mime => {
                debug!("{}: 対象外 ({:?})", path.display(), mime);
                SortBucket::Ignored
            }
        };

        transfer(path, &dest_root.join(bucket.dir_name()), self.settings.transfer_mode)?;
        Ok(bucket)
    }

    fn accepts(&self, mime: &str) -> bool {
        self.settings.accepted_mime_types.iter().any(|m| m == mime)
    }

    /// デコードを別スレッドで実行し、制限時間を超えたら諦める
    ///
    /// `file_timeout_ms` が0なら無制限。
    fn decode_with_timeout(&self, path: &Path) -> Result<PixelTensor> {
        let decode = self.decode;
        let Some(runtime) = self.runtime.as_ref() else {
            return decode(path);
        };
        let millis = self.settings.file_timeout_ms;
        let owned = path.to_path_buf();
        let task = runtime.spawn_blocking(move || decode(&owned));

        runtime.block_on(async {
            let joined = if millis == 0 {
                task.await
            } else {
                match tokio::time::timeout(Duration::from_millis(millis), task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        return Err(TriageError::Timeout {
                            path: path.display().to_string(),
                            millis,
                        })
                    }
                }
            };
            joined.map_err(|e| TriageError::Decode(format!("{}: {}", path.display(), e)))?
        })
    }
}

impl Drop for Sorter<'_> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// ディレクトリ直下の通常ファイルをファイル名順に返す
fn list_files(source: &Path) -> Result<Vec<ImageRecord>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(source)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(ImageRecord::new(path, RecordKind::Unlabeled));
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// 内容を変えずに `dest_dir` へ転送する
///
/// 同じディレクトリ内の一時ファイルに書き込んでからリネームするため、
/// 転送先に書きかけのファイルが残ることはありません。同名ファイルは上書きします。
pub fn transfer(source: &Path, dest_dir: &Path, mode: TransferMode) -> Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        TriageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("ファイル名がありません: {}", source.display()),
        ))
    })?;
    let target = dest_dir.join(file_name);

    let mut reader = fs::File::open(source)?;
    let mut temp = NamedTempFile::new_in(dest_dir)?;
    std::io::copy(&mut reader, temp.as_file_mut())?;
    temp.as_file().set_permissions(reader.metadata()?.permissions())?;
    temp.as_file().sync_all()?;
    temp.persist(&target).map_err(|e| TriageError::Io(e.error))?;

    if mode == TransferMode::Move {
        fs::remove_file(source)?;
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::embedder::{Backbone, BackboneInput, BackboneOutput, Embedding};
    use image::{ImageFormat, Rgb, RgbImage};

    /// 平均輝度をそのまま埋め込みにする
    struct BrightnessBackbone;

    impl Backbone for BrightnessBackbone {
        fn name(&self) -> &str {
            "brightness"
        }

        fn input_size(&self) -> u32 {
            8
        }

        fn infer(&self, input: BackboneInput) -> Result<BackboneOutput> {
            let mean = input.data.iter().sum::<f32>() / input.data.len() as f32;
            Ok(BackboneOutput { data: vec![mean], shape: vec![1, 1] })
        }
    }

    /// 明るければ kept
    struct ThresholdClassifier;

    impl EmbeddingClassifier for ThresholdClassifier {
        fn probabilities(&self, embedding: &Embedding) -> Result<Vec<f32>> {
            if embedding.as_slice()[0] > 0.5 {
                Ok(vec![0.9, 0.1])
            } else {
                Ok(vec![0.2, 0.8])
            }
        }
    }

    fn write_jpeg(path: &Path, value: u8) {
        RgbImage::from_pixel(12, 10, Rgb([value, value, value]))
            .save_with_format(path, ImageFormat::Jpeg)
            .unwrap();
    }

    fn sort(source: &Path, dest: &Path, settings: SortSettings, cancel: bool) -> SortReport {
        let embedder = Embedder::new(Box::new(BrightnessBackbone), 1);
        let sorter = Sorter::new(&embedder, &ThresholdClassifier, settings).unwrap();
        sorter.sort_directory(source, dest, &AtomicBool::new(cancel)).unwrap()
    }

    #[test]
    fn test_sort_into_buckets() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_jpeg(&src.path().join("bright.jpg"), 250);
        write_jpeg(&src.path().join("dark.jpg"), 5);
        std::fs::write(src.path().join("notes.txt"), b"plain text").unwrap();
        std::fs::create_dir(src.path().join("nested")).unwrap();

        let report = sort(src.path(), dest.path(), SortSettings::default(), false);

        assert_eq!((report.kept, report.deleted, report.ignored), (1, 1, 1));
        assert!(report.failures.is_empty());
        assert!(dest.path().join("kept/bright.jpg").exists());
        assert!(dest.path().join("deleted/dark.jpg").exists());
        assert_eq!(
            std::fs::read(dest.path().join("ignored/notes.txt")).unwrap(),
            b"plain text"
        );
        assert!(!dest.path().join("ignored/nested").exists());
        // コピーなので元は残る
        assert!(src.path().join("bright.jpg").exists());
    }

    #[test]
    fn test_move_removes_source() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let path = src.path().join("a.jpg");
        write_jpeg(&path, 200);
        let original = std::fs::read(&path).unwrap();

        let settings = SortSettings { transfer_mode: TransferMode::Move, ..SortSettings::default() };
        let report = sort(src.path(), dest.path(), settings, false);

        assert_eq!(report.kept, 1);
        assert!(!path.exists());
        assert_eq!(std::fs::read(dest.path().join("kept/a.jpg")).unwrap(), original);
    }

    #[test]
    fn test_png_is_ignored_by_default() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))
            .save_with_format(src.path().join("x.png"), ImageFormat::Png)
            .unwrap();

        let report = sort(src.path(), dest.path(), SortSettings::default(), false);
        assert_eq!(report.count(SortBucket::Ignored), 1);

        let dest2 = tempfile::tempdir().unwrap();
        let settings = SortSettings {
            accepted_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
            ..SortSettings::default()
        };
        let report = sort(src.path(), dest2.path(), settings, false);
        assert_eq!(report.count(SortBucket::Ignored), 0);
        assert_eq!(report.transferred(), 1);
    }

    #[test]
    fn test_broken_jpeg_is_skipped() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a_broken.jpg"), [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap();
        write_jpeg(&src.path().join("b_ok.jpg"), 250);

        let report = sort(src.path(), dest.path(), SortSettings::default(), false);

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("a_broken.jpg"));
        assert_eq!(report.kept, 1);
        assert!(!dest.path().join("kept/a_broken.jpg").exists());
        assert!(!dest.path().join("deleted/a_broken.jpg").exists());
    }

    #[test]
    fn test_cancel_before_first_file() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_jpeg(&src.path().join("a.jpg"), 250);

        let report = sort(src.path(), dest.path(), SortSettings::default(), true);

        assert!(report.cancelled);
        assert_eq!(report.transferred(), 0);
        for bucket in SortBucket::ALL {
            assert!(dest.path().join(bucket.dir_name()).is_dir());
        }
    }

    fn slow_decode(path: &Path) -> Result<PixelTensor> {
        std::thread::sleep(Duration::from_millis(300));
        load_pixels(path)
    }

    fn stuck_decode(_path: &Path) -> Result<PixelTensor> {
        std::thread::sleep(Duration::from_secs(5));
        Err(TriageError::Decode("unreachable".to_string()))
    }

    #[test]
    fn test_decode_timeout_skips_file() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_jpeg(&src.path().join("slow.jpg"), 250);

        let embedder = Embedder::new(Box::new(BrightnessBackbone), 1);
        let settings = SortSettings { file_timeout_ms: 20, ..SortSettings::default() };
        let sorter = Sorter::new(&embedder, &ThresholdClassifier, settings)
            .unwrap()
            .with_decoder(stuck_decode);

        let err = sorter.sort_file(&src.path().join("slow.jpg"), dest.path()).unwrap_err();
        assert!(matches!(err, TriageError::Timeout { millis: 20, .. }));

        let report = sorter.sort_directory(src.path(), dest.path(), &AtomicBool::new(false)).unwrap();
        assert_eq!(report.transferred(), 0);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("slow.jpg"));
        for bucket in SortBucket::ALL {
            assert_eq!(std::fs::read_dir(dest.path().join(bucket.dir_name())).unwrap().count(), 0);
        }
        assert!(src.path().join("slow.jpg").exists());
    }

    #[test]
    fn test_zero_timeout_waits_for_decode() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        write_jpeg(&src.path().join("slow.jpg"), 250);

        let embedder = Embedder::new(Box::new(BrightnessBackbone), 1);
        let settings = SortSettings { file_timeout_ms: 0, ..SortSettings::default() };
        let sorter = Sorter::new(&embedder, &ThresholdClassifier, settings)
            .unwrap()
            .with_decoder(slow_decode);

        let report = sorter.sort_directory(src.path(), dest.path(), &AtomicBool::new(false)).unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(report.kept, 1);
    }

    #[test]
    fn test_transfer_overwrites_existing() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let path = src.path().join("f.bin");
        std::fs::write(&path, b"new").unwrap();
        std::fs::write(dest.path().join("f.bin"), b"old contents").unwrap();

        let target = transfer(&path, dest.path(), TransferMode::Copy).unwrap();
        assert_eq!(std::fs::read(target).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 1);
    }
}
