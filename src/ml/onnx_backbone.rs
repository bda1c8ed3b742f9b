//! ONNX Runtimeで動くバックボーン
//!
//! MobileNet系の特徴ベクトルモデル（出力 [1, 1024]）を想定していますが、
//! 入力解像度と並びは設定から与えます。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::{info, warn};

use crate::error::{Result, TriageError};
use crate::ml::embedder::{Backbone, BackboneInput, BackboneOutput, TensorLayout};
use crate::model::config::BackboneSettings;

fn ort_err(path: &Path, e: impl std::fmt::Display) -> TriageError {
    TriageError::Backbone(format!("{}: {}", path.display(), e))
}

pub struct OnnxBackbone {
    // Session::run は &mut self を要求する
    session: Mutex<Session>,
    name: String,
    input_size: u32,
    layout: TensorLayout,
}

impl OnnxBackbone {
    /// ONNXファイルを読み込む
    pub fn load(path: &Path, input_size: u32, layout: TensorLayout, intra_threads: usize) -> Result<Self> {
        if !path.exists() {
            return Err(TriageError::Backbone(format!(
                "バックボーンモデルが見つかりません: {}",
                path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| ort_err(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ort_err(path, e))?
            .with_intra_threads(intra_threads.max(1))
            .map_err(|e| ort_err(path, e))?
            .commit_from_file(path)
            .map_err(|e| ort_err(path, e))?;

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "onnx".to_string());

        info!("バックボーンを読み込みました: {} ({}x{}, {:?})", path.display(), input_size, input_size, layout);

        Ok(Self {
            session: Mutex::new(session),
            name,
            input_size,
            layout,
        })
    }

    /// 設定に従って読み込む（必要ならダウンロードしてキャッシュ）
    pub fn from_settings(settings: &BackboneSettings) -> Result<Self> {
        if !settings.model_path.exists() {
            match &settings.url {
                Some(url) => download_to_cache(url, &settings.model_path)?,
                None => warn!("backbone.url が未設定のためダウンロードできません"),
            }
        }
        Self::load(&settings.model_path, settings.input_size, settings.layout, settings.intra_threads)
    }
}

impl Backbone for OnnxBackbone {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.layout
    }

    fn infer(&self, input: BackboneInput) -> Result<BackboneOutput> {
        let tensor = Tensor::from_array((input.shape, input.data))
            .map_err(|e| TriageError::Backbone(format!("入力テンソルを作成できません: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| TriageError::Backbone("セッションのロックが壊れています".to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| TriageError::Backbone(format!("推論に失敗しました: {}", e)))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TriageError::Backbone(format!("出力を取り出せません: {}", e)))?;

        Ok(BackboneOutput {
            data: data.to_vec(),
            shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
        })
    }
}

/// URLからモデルを取得して保存する
///
/// 一時ファイルに書き込んでからリネームするため、途中で失敗しても
/// 壊れたファイルがキャッシュに残ることはありません。
pub fn download_to_cache(url: &str, target: &Path) -> Result<()> {
    use std::io::Write;

    info!("バックボーンをダウンロードしています: {}", url);

    let response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| TriageError::Backbone(format!("ダウンロードに失敗しました: {}", e)))?;
    let bytes = response
        .bytes()
        .map_err(|e| TriageError::Backbone(format!("ダウンロードに失敗しました: {}", e)))?;

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(&bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| TriageError::Io(e.error))?;

    info!("キャッシュしました: {} ({} バイト)", target.display(), bytes.len());
    Ok(())
}
