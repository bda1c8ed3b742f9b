//! 分類器アーティファクトの確認用バイナリ

use std::path::PathBuf;

use image_triage_lib::model::{artifact_path, load_model_with_metadata, print_metadata_info, TriageConfig};

fn main() {
    println!("=== Triage Model Inspector ===\n");

    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        TriageConfig::load_or_default().model_path
    };
    let model_path = artifact_path(&model_path);

    match load_model_with_metadata(&model_path) {
        Ok((metadata, model_binary)) => {
            println!("✓ 読み込み成功: {}", model_path.display());
            print_metadata_info(&metadata);
            println!("重みサイズ: {} バイト ({:.2} KB)", model_binary.len(), model_binary.len() as f64 / 1024.0);
        }
        Err(e) => {
            eprintln!("✗ エラー: {}", e);
            std::process::exit(1);
        }
    }
}
