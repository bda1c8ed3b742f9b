use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use image_triage_lib::commands;
use image_triage_lib::model::{print_metadata_info, DeviceType, TriageConfig};
use image_triage_lib::types::SortBucket;
use image_triage_lib::{IndexMode, TransferMode};

#[derive(Parser, Debug)]
#[command(name = "image_triage", about = "画像を kept / deleted / ignored に仕分ける")]
struct Cli {
    /// 設定ファイル（無ければデフォルト設定）
    #[arg(long, global = true, default_value = "triage_config.json")]
    config: PathBuf,

    /// debug ログを出す
    #[arg(short, long, global = true)]
    verbose: bool,

    /// 計算デバイス
    #[arg(long, global = true, value_enum)]
    device: Option<DeviceArg>,

    /// 分類器アーティファクトのパス
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// kept/ と deleted/ の画像から分類器を学習
    Train {
        /// 学習データディレクトリ
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long)]
        epochs: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// 1つのカーソルを両プールで共有する
        #[arg(long)]
        shared_index: bool,
    },
    /// フォルダ内のファイルを仕分け
    Classify {
        /// 仕分け対象のディレクトリ
        source: PathBuf,

        /// 出力先（既定: 対象ディレクトリと同じ階層の output/）
        #[arg(long)]
        output: Option<PathBuf>,

        /// コピーではなく移動する
        #[arg(long = "move")]
        move_files: bool,
    },
    /// 分類器アーティファクトの情報を表示
    Info,
    /// 有効な設定を表示
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Cpu,
    Wgpu,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init()
        .context("ロガーを初期化できません")?;

    Ok(())
}

fn default_output_dir(source: &Path) -> PathBuf {
    match source.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("output"),
        _ => PathBuf::from("output"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let mut config = TriageConfig::load_or_default_from(&cli.config);
    if let Some(device) = cli.device {
        config.set_device_type(match device {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        });
    }
    if let Some(model) = cli.model {
        config.model_path = model;
    }

    match cli.command {
        Command::Train { data_dir, epochs, seed, shared_index } => {
            if let Some(data_dir) = data_dir {
                config.training.data_dir = data_dir;
            }
            if let Some(epochs) = epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            if shared_index {
                config.training.index_mode = IndexMode::Shared;
            }

            let report = commands::train(&config).context("学習に失敗しました")?;
            if report.exhausted {
                warn!("学習例が途中で尽きました");
            }
            if let Some(last) = report.final_epoch() {
                info!("最終損失: {:.4}, 最終正解率: {:.2}%", last.loss, last.accuracy * 100.0);
            }
            println!("学習完了: {}", report.model_path.display());
        }
        Command::Classify { source, output, move_files } => {
            if move_files {
                config.sort.transfer_mode = TransferMode::Move;
            }
            let dest_root = output.unwrap_or_else(|| default_output_dir(&source));

            let cancel = Arc::new(AtomicBool::new(false));
            let cancel_for_ctrlc = cancel.clone();
            ctrlc::set_handler(move || {
                cancel_for_ctrlc.store(true, Ordering::SeqCst);
            })
            .context("Ctrl-C ハンドラを設定できません")?;

            let report = commands::classify(&config, &source, &dest_root, &cancel)
                .with_context(|| format!("{} を仕分けできません", source.display()))?;

            for bucket in SortBucket::ALL {
                println!("{}: {}", bucket.dir_name(), report.count(bucket));
            }
            for failure in &report.failures {
                println!("失敗: {} ({})", failure.path.display(), failure.error);
            }
            if report.cancelled {
                println!("中断しました");
            }
        }
        Command::Info => {
            let metadata = commands::model_info(&config.model_path)
                .with_context(|| format!("{} を読み込めません", config.model_path.display()))?;
            print_metadata_info(&metadata);
        }
        Command::Config => config.display(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_dir() {
        assert_eq!(default_output_dir(Path::new("photos/inbox")), PathBuf::from("photos/output"));
        assert_eq!(default_output_dir(Path::new("inbox")), PathBuf::from("output"));
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::parse_from(["image_triage", "classify", "inbox", "--move", "--device", "cpu"]);
        assert!(matches!(cli.command, Command::Classify { move_files: true, .. }));
        assert!(matches!(cli.device, Some(DeviceArg::Cpu)));
    }

    #[test]
    fn test_parse_config() {
        let cli = Cli::parse_from(["image_triage", "config", "--config", "custom.json"]);
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.config, PathBuf::from("custom.json"));
    }
}
