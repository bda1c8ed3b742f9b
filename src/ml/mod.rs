pub mod backend;
pub mod embedder;
pub mod generator;
pub mod image_loader;
pub mod inference;
pub mod ml_model;
pub mod onnx_backbone;
pub mod training;

pub use embedder::{Backbone, BackboneInput, BackboneOutput, Embedder, Embedding, TensorLayout};
pub use generator::{BalancedExampleGenerator, IndexMode, LabeledExample, TrainingPools};
pub use image_loader::{load_pixels, load_pixels_from_bytes, sniff_mime_type, PixelTensor};
pub use inference::{ClassifierEngine, EmbeddingClassifier};
pub use ml_model::{ClassifierConfig, TriageClassifier, NUM_CLASSES};
pub use onnx_backbone::OnnxBackbone;
pub use training::{train_classifier, train_from_directory, EpochStats, TrainingReport};
