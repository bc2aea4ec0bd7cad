#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! OCD dashboard core: patient loading, diagnosis labeling, random forest training and prediction.

/// Patient file schema and loading.
#[path = "../dataset.rs"]
pub mod dataset;

/// Y-BOCS threshold labeling.
#[path = "../labeler.rs"]
pub mod labeler;

/// Model feature extraction.
#[path = "../features.rs"]
pub mod features;

/// Classical ML pipeline.
#[path = "../ML/main.rs"]
pub mod classical_ml;

/// Scaler and model persistence.
#[path = "../artifacts.rs"]
pub mod artifacts;

/// Split, scale, fit and persist.
#[path = "../trainer.rs"]
pub mod trainer;

/// Single-record inference from persisted artifacts.
#[path = "../predictor.rs"]
pub mod predictor;

/// Descriptive aggregations for the dashboard pages.
#[path = "../insights.rs"]
pub mod insights;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry helpers for structured logging.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Dashboard session state.
#[path = "../session.rs"]
pub mod session;

pub use artifacts::{
    ArtifactError, ArtifactStore, FileArtifactStore, MemoryArtifactStore, MODEL_ARTIFACT,
    SCALER_ARTIFACT,
};
pub use config::{DashboardConfig, LabelerSettings, TrainingSettings};
pub use dataset::{DatasetError, PatientRecord, PatientTable};
pub use features::{FeatureFrame, FeaturePipeline, FEATURE_COLUMNS};
pub use labeler::{Diagnosis, DiagnosisLabeler, LabeledRecord, LabeledTable};
pub use predictor::{PatientFeatures, Prediction, PredictionError, Predictor};
pub use session::{DashboardSession, ModelState, Page, PageView, SessionError};
pub use telemetry::{DiagnosisTelemetry, DiagnosisTelemetryBuilder};
pub use trainer::{ModelTrainer, TrainedModel, TrainingError};
