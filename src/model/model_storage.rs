//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（次元、クラス順序、学習結果など）
//! - model.bin       - モデルの重み（バイナリ）
//!
//! 書き込みは同じディレクトリの一時ファイルに行い、完了後にリネームします。

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::debug;

use crate::error::{Result, TriageError};
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

fn persistence<E: std::fmt::Display>(context: &'static str, path: &Path) -> impl FnOnce(E) -> TriageError {
    let path = path.to_path_buf();
    move |e| TriageError::Persistence(format!("{}: {:?} ({})", context, path, e))
}

/// 保存先のパスを決める
///
/// output_pathがすでに.gzで終わっている場合はそのまま、そうでなければ拡張子を追加
pub fn artifact_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 戻り値は実際に書き込んだパス
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = artifact_path(output_path);

    let parent = match tar_gz_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .map_err(persistence("親ディレクトリを作成できません", &parent))?;

    let temp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(persistence("一時ファイルを作成できません", &parent))?;

    let json_str = metadata.to_json_string()?;

    {
        let encoder = GzEncoder::new(temp.as_file(), Compression::default());
        let mut tar_builder = Builder::new(encoder);

        append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())
            .map_err(persistence("metadata.json を追加できません", &tar_gz_path))?;
        append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)
            .map_err(persistence("model.bin を追加できません", &tar_gz_path))?;

        let encoder = tar_builder
            .into_inner()
            .map_err(persistence("tarアーカイブを完成できません", &tar_gz_path))?;
        encoder
            .finish()
            .map_err(persistence("gzip圧縮を完了できません", &tar_gz_path))?;
    }

    temp.as_file()
        .sync_all()
        .map_err(persistence("ディスクへの書き出しに失敗しました", &tar_gz_path))?;
    temp.persist(&tar_gz_path)
        .map_err(persistence("アーティファクトを配置できません", &tar_gz_path))?;

    debug!("モデルを保存しました: {}", tar_gz_path.display());
    Ok(tar_gz_path)
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file =
        File::open(tar_gz_path).map_err(persistence("tar.gzを開けません", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_entries(tar_gz_path, false)?;
    metadata.ok_or_else(|| TriageError::Persistence("metadata.json not found in tar.gz archive".to_string()))
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let (_, binary) = read_entries(tar_gz_path, true)?;
    binary.ok_or_else(|| TriageError::Persistence("model.bin not found in tar.gz archive".to_string()))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_entries(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(TriageError::Persistence("metadata.json not found in tar.gz archive".to_string())),
        (_, None) => Err(TriageError::Persistence("model.bin not found in tar.gz archive".to_string())),
    }
}

fn read_entries(tar_gz_path: &Path, want_binary: bool) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let mut archive = open_archive(tar_gz_path)?;
    let read_err = persistence("tar.gzの読み込みに失敗しました", tar_gz_path);
    let entries = archive.entries().map_err(read_err)?;

    let mut metadata_opt = None;
    let mut model_binary_opt = None;

    for entry in entries {
        let mut entry = entry.map_err(persistence("エントリを読めません", tar_gz_path))?;
        let name = entry
            .path()
            .map_err(persistence("エントリ名を読めません", tar_gz_path))?
            .to_string_lossy()
            .to_string();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry
                    .read_to_string(&mut json_str)
                    .map_err(persistence("metadata.json を読めません", tar_gz_path))?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY if want_binary => {
                let mut buffer = Vec::new();
                entry
                    .read_to_end(&mut buffer)
                    .map_err(persistence("model.bin を読めません", tar_gz_path))?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }

        if metadata_opt.is_some() && (!want_binary || model_binary_opt.is_some()) {
            break;
        }
    }

    Ok((metadata_opt, model_binary_opt))
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス: {}", metadata.class_labels.join(", "));
    println!("バックボーン: {} ({}x{})", metadata.backbone, metadata.input_size, metadata.input_size);
    println!("構成: {} -> {} (ReLU) -> {} (softmax)", metadata.embedding_dim, metadata.hidden_dim, metadata.class_labels.len());
    println!("学習エポック数: {} (バッチ数/エポック: {})", metadata.num_epochs, metadata.batches_per_epoch);
    println!("学習例数: {}", metadata.num_examples);
    println!("最終損失: {:.4}", metadata.final_loss);
    println!("最終正解率: {:.2}%", metadata.final_accuracy * 100.0);
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}
