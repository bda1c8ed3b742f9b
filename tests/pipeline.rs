mod common;

use std::sync::atomic::AtomicBool;

use common::{embedder, write_jpeg, write_training_data, EMBEDDING_DIM};
use image_triage_lib::commands;
use image_triage_lib::ml::backend::{CpuBackend, CpuTrainBackend};
use image_triage_lib::ml::{
    train_from_directory, BalancedExampleGenerator, ClassifierEngine, IndexMode, TrainingPools,
};
use image_triage_lib::model::{load_metadata, DeviceType, TriageConfig};
use image_triage_lib::TriageError;

fn config_for(root: &std::path::Path) -> TriageConfig {
    let mut config = TriageConfig::default();
    config.device_type = DeviceType::Cpu;
    config.model_path = root.join("models/triage_model.tar.gz");
    config.training.data_dir = root.join("train_assets");
    config.training.num_epochs = 3;
    config.training.batches_per_epoch = 4;
    config.training.batch_size = 2;
    config.training.num_draws = 40;
    config.training.learning_rate = 1e-2;
    config
}

#[test]
fn generator_yields_exactly_n_labeled_examples() {
    let dir = tempfile::tempdir().unwrap();
    write_training_data(dir.path(), 6);
    let embedder = embedder();

    let pools = TrainingPools::from_directory(dir.path()).unwrap();
    assert_eq!((pools.kept.len(), pools.deleted.len()), (6, 6));

    let examples: Vec<_> = BalancedExampleGenerator::new(&embedder, pools, 6, IndexMode::PerPool, 42)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(examples.len(), 6);
    for example in &examples {
        assert!(example.label == [1.0, 0.0] || example.label == [0.0, 1.0]);
        assert_eq!(example.embedding.len(), EMBEDDING_DIM);
    }
}

#[test]
fn shared_index_mode_also_yields_n_examples() {
    let dir = tempfile::tempdir().unwrap();
    write_training_data(dir.path(), 3);
    let embedder = embedder();

    let pools = TrainingPools::from_directory(dir.path()).unwrap();
    let count = BalancedExampleGenerator::new(&embedder, pools, 10, IndexMode::Shared, 1)
        .unwrap()
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(count, 10);
}

#[test]
fn training_writes_loadable_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_training_data(&config.training.data_dir, 5);
    let embedder = embedder();

    let report = train_from_directory::<CpuTrainBackend>(
        &embedder,
        &config.training,
        &config.model_path,
        &Default::default(),
    )
    .unwrap();

    assert_eq!(report.epochs.len(), 3);
    assert_eq!(report.num_examples, 3 * 4 * 2);
    assert_eq!(report.model_path, config.model_path);

    let metadata = load_metadata(&report.model_path).unwrap();
    assert_eq!(metadata.embedding_dim, EMBEDDING_DIM);
    assert_eq!(metadata.hidden_dim, 100);
    assert_eq!(metadata.class_labels, vec!["kept", "deleted"]);
    assert_eq!(metadata.backbone, "channel_mean");

    // 2回読み込んでも同じ予測になる
    let device = Default::default();
    let a = ClassifierEngine::<CpuBackend>::load(&report.model_path, &device).unwrap();
    let b = ClassifierEngine::<CpuBackend>::load(&report.model_path, &device).unwrap();
    let embedding = embedder.embed_path(&config.training.data_dir.join("kept/bright_00.jpg")).unwrap();
    let pa = a.predict(&embedding).unwrap();
    assert_eq!(pa, b.predict(&embedding).unwrap());
    assert_eq!(pa.len(), 2);
    assert!((pa.iter().sum::<f32>() - 1.0).abs() < 1e-5);
}

#[test]
fn training_fails_when_a_pool_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    std::fs::create_dir_all(config.training.data_dir.join("kept")).unwrap();
    std::fs::create_dir_all(config.training.data_dir.join("deleted")).unwrap();
    write_jpeg(&config.training.data_dir.join("kept/only.jpg"), 8, 8, [200, 200, 200]);

    let result = commands::train_with_embedder(&config, &embedder());
    assert!(matches!(result, Err(TriageError::Dataset(_))));
    assert!(!config.model_path.exists());
}

#[test]
fn train_then_classify_folder() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_training_data(&config.training.data_dir, 5);
    let embedder = embedder();

    commands::train_with_embedder(&config, &embedder).unwrap();

    let inbox = dir.path().join("inbox");
    std::fs::create_dir_all(&inbox).unwrap();
    write_jpeg(&inbox.join("photo.jpg"), 40, 30, [128, 128, 128]);
    std::fs::write(inbox.join("notes.txt"), b"shopping list").unwrap();
    let photo = std::fs::read(inbox.join("photo.jpg")).unwrap();

    let out = dir.path().join("output");
    let report =
        commands::classify_with_embedder(&config, &embedder, &inbox, &out, &AtomicBool::new(false)).unwrap();

    assert_eq!(report.kept + report.deleted, 1);
    assert_eq!(report.ignored, 1);
    assert!(report.failures.is_empty());
    assert_eq!(std::fs::read(out.join("ignored/notes.txt")).unwrap(), b"shopping list");

    let sorted = [out.join("kept/photo.jpg"), out.join("deleted/photo.jpg")];
    let placed: Vec<_> = sorted.iter().filter(|p| p.exists()).collect();
    assert_eq!(placed.len(), 1);
    assert_eq!(std::fs::read(placed[0]).unwrap(), photo);
    assert!(inbox.join("photo.jpg").exists());
}

#[test]
fn classifier_rejects_mismatched_backbone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    write_training_data(&config.training.data_dir, 3);
    let embedder = embedder();
    commands::train_with_embedder(&config, &embedder).unwrap();

    let result = ClassifierEngine::<CpuBackend>::load_for_embedding_dim(&config.model_path, 512, &Default::default());
    assert!(matches!(result, Err(TriageError::ShapeMismatch(_))));
}
