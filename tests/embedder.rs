mod common;

use common::{embedder, write_jpeg, EMBEDDING_DIM};
use image_triage_lib::ml::load_pixels;
use image_triage_lib::TriageError;

#[test]
fn embedding_has_fixed_length_for_any_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = embedder();

    for (i, (w, h)) in [(1, 1), (31, 17), (224, 224), (640, 480), (50, 900)].into_iter().enumerate() {
        let path = dir.path().join(format!("img_{i}.jpg"));
        write_jpeg(&path, w, h, [100, 150, 200]);

        let embedding = embedder.embed_path(&path).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM, "{}x{}", w, h);
        assert!(embedding.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn same_image_gives_same_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.jpg");
    write_jpeg(&path, 64, 48, [10, 20, 30]);

    let embedder = embedder();
    let pixels = load_pixels(&path).unwrap();
    assert_eq!(embedder.embed(&pixels).unwrap(), embedder.embed(&pixels).unwrap());
}

#[test]
fn non_image_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("readme.jpg");
    std::fs::write(&path, b"definitely not a jpeg").unwrap();

    assert!(matches!(embedder().embed_path(&path), Err(TriageError::Decode(_))));
}
