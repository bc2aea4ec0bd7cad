//! Dashboard session: labeled data computed once, model trained on demand.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    artifacts::{ArtifactStore, FileArtifactStore},
    classical_ml::TrainingReport,
    config::{DashboardConfig, TrainingSettings},
    dataset::{DatasetError, PatientTable},
    features::{FeatureFrame, FeaturePipeline},
    insights::{self, KeyStatistics, SeverityByGender},
    labeler::{DiagnosisLabeler, LabeledTable},
    predictor::{PatientFeatures, Prediction, PredictionError, Predictor},
    telemetry::{log, DiagnosisTelemetry},
    trainer::{ModelTrainer, TrainingError},
};

/// Navigation destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Page {
    /// Demographics and monthly trend.
    Insights,
    /// Treatment and severity breakdowns.
    Visuals,
    /// Interactive prediction.
    Prediction,
}

impl std::str::FromStr for Page {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insights" | "data" => Ok(Self::Insights),
            "visuals" | "visual" => Ok(Self::Visuals),
            "prediction" | "predict" | "model" => Ok(Self::Prediction),
            other => Err(format!("unknown page `{other}`")),
        }
    }
}

/// What invalidates a trained model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrainingKey {
    fingerprint: u64,
    settings: TrainingSettings,
}

/// Lifecycle of the session's model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState {
    /// Nothing trained in this session.
    Untrained,
    /// Artifacts written by this session are current.
    Trained(Arc<TrainingReport>),
    /// The last attempt failed; the message is user-facing.
    Failed(String),
}

/// Data for the insights page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightsView {
    /// Patients per gender.
    pub genders: IndexMap<String, usize>,
    /// Patients per ethnicity.
    pub ethnicities: IndexMap<String, usize>,
    /// Diagnoses per calendar month.
    pub months: IndexMap<String, usize>,
}

/// Data for the visual-analysis page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualsView {
    /// Patients per medication class.
    pub medications: IndexMap<String, usize>,
    /// Sub-score spread per gender.
    pub severity: Vec<SeverityByGender>,
}

/// Rendered content of a page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageView {
    /// Insights page data.
    Insights(InsightsView),
    /// Visual-analysis page data.
    Visuals(VisualsView),
    /// Prediction page: current model state only, nothing is trained by navigating.
    Prediction(ModelState),
}

/// Owns the loaded data, the artifact store and the model lifecycle.
pub struct DashboardSession {
    table: LabeledTable,
    frame: FeatureFrame,
    fingerprint: u64,
    trainer: ModelTrainer,
    store: Arc<dyn ArtifactStore>,
    predictor: Predictor,
    telemetry: Option<DiagnosisTelemetry>,
    page: Page,
    model: ModelState,
    trained_key: Option<TrainingKey>,
}

impl std::fmt::Debug for DashboardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardSession")
            .field("rows", &self.table.len())
            .field("usable_rows", &self.frame.n_rows())
            .field("page", &self.page)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl DashboardSession {
    /// Labels `table` once and prepares the feature frame.
    #[must_use]
    pub fn new(
        table: &PatientTable,
        labeler: DiagnosisLabeler,
        settings: TrainingSettings,
        store: Arc<dyn ArtifactStore>,
        telemetry: Option<DiagnosisTelemetry>,
    ) -> Self {
        let labeled = labeler.apply(table);
        let frame = FeaturePipeline.build(&labeled);
        let fingerprint = fingerprint(&frame);
        let mut trainer = ModelTrainer::new(settings);
        let mut predictor = Predictor::new(Arc::clone(&store));
        if let Some(tel) = &telemetry {
            trainer = trainer.with_telemetry(tel.clone());
            predictor = predictor.with_telemetry(tel.clone());
        }
        log(
            telemetry.as_ref(),
            LogLevel::Info,
            "session.loaded",
            json!({
                "rows": labeled.len(),
                "usable_rows": frame.n_rows(),
                "threshold": labeler.threshold(),
            }),
        );
        Self {
            table: labeled,
            frame,
            fingerprint,
            trainer,
            store,
            predictor,
            telemetry,
            page: Page::Insights,
            model: ModelState::Untrained,
            trained_key: None,
        }
    }

    /// Loads the dataset and wires file-backed artifacts and logging from `config`.
    pub fn from_config(config: &DashboardConfig) -> Result<Self, SessionError> {
        let table = PatientTable::load(&config.dataset, config.delimiter_byte())?;
        let telemetry = match &config.log_path {
            Some(path) => Some(
                DiagnosisTelemetry::builder("dashboard")
                    .log_path(path)
                    .build()
                    .map_err(SessionError::Telemetry)?,
            ),
            None => None,
        };
        let store: Arc<dyn ArtifactStore> =
            Arc::new(FileArtifactStore::new(&config.artifact_dir));
        Ok(Self::new(
            &table,
            DiagnosisLabeler::new(config.labeler.threshold),
            config.training,
            store,
            telemetry,
        ))
    }

    /// Labeled rows.
    #[must_use]
    pub const fn table(&self) -> &LabeledTable {
        &self.table
    }

    /// Rows usable for training.
    #[must_use]
    pub const fn frame(&self) -> &FeatureFrame {
        &self.frame
    }

    /// Current page.
    #[must_use]
    pub const fn page(&self) -> Page {
        self.page
    }

    /// Current model state.
    #[must_use]
    pub const fn model_state(&self) -> &ModelState {
        &self.model
    }

    /// Store the session trains into.
    #[must_use]
    pub fn store(&self) -> Arc<dyn ArtifactStore> {
        Arc::clone(&self.store)
    }

    /// Headline numbers.
    #[must_use]
    pub fn key_statistics(&self) -> KeyStatistics {
        insights::key_statistics(&self.table)
    }

    /// Switches page and returns its content. Never trains.
    pub fn navigate(&mut self, page: Page) -> PageView {
        self.page = page;
        log(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "session.navigate",
            json!({ "page": page }),
        );
        match page {
            Page::Insights => PageView::Insights(InsightsView {
                genders: insights::gender_counts(&self.table),
                ethnicities: insights::ethnicity_counts(&self.table),
                months: insights::monthly_diagnoses(&self.table),
            }),
            Page::Visuals => PageView::Visuals(VisualsView {
                medications: insights::medication_counts(&self.table),
                severity: insights::severity_by_gender(&self.table),
            }),
            Page::Prediction => PageView::Prediction(self.model.clone()),
        }
    }

    /// Trains unless a model for the current data and settings already exists.
    pub fn ensure_model(&mut self) -> Result<Arc<TrainingReport>, TrainingError> {
        let key = self.key();
        if let (Some(trained_key), ModelState::Trained(report)) = (self.trained_key, &self.model) {
            if trained_key == key {
                log(
                    self.telemetry.as_ref(),
                    LogLevel::Debug,
                    "session.model_cached",
                    json!({ "run_id": report.run_id, "fingerprint": self.fingerprint }),
                );
                return Ok(Arc::clone(report));
            }
        }
        self.train(key)
    }

    /// Trains unconditionally.
    pub fn retrain(&mut self) -> Result<Arc<TrainingReport>, TrainingError> {
        let key = self.key();
        self.train(key)
    }

    /// Changes the split and forest settings; the next [`Self::ensure_model`] retrains.
    pub fn set_training_settings(&mut self, settings: TrainingSettings) {
        self.trainer = match &self.telemetry {
            Some(tel) => ModelTrainer::new(settings).with_telemetry(tel.clone()),
            None => ModelTrainer::new(settings),
        };
        self.drop_stale_model();
    }

    /// Replaces the dataset; labels and features are recomputed once.
    pub fn replace_table(&mut self, table: &PatientTable, labeler: DiagnosisLabeler) {
        self.table = labeler.apply(table);
        self.frame = FeaturePipeline.build(&self.table);
        self.fingerprint = fingerprint(&self.frame);
        self.drop_stale_model();
    }

    /// Classifies one record with the model trained in this session on the current data.
    pub fn predict(&self, features: &PatientFeatures) -> Result<Prediction, PredictionError> {
        if !self.model_is_current() {
            return Err(PredictionError::ModelNotFound);
        }
        self.predictor.predict(features)
    }

    fn model_is_current(&self) -> bool {
        matches!(self.model, ModelState::Trained(_)) && self.trained_key == Some(self.key())
    }

    fn drop_stale_model(&mut self) {
        if self.trained_key.is_some_and(|key| key != self.key()) {
            self.trained_key = None;
            self.model = ModelState::Untrained;
            log(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "session.model_invalidated",
                json!({ "fingerprint": self.fingerprint }),
            );
        }
    }

    fn key(&self) -> TrainingKey {
        TrainingKey {
            fingerprint: self.fingerprint,
            settings: *self.trainer.settings(),
        }
    }

    fn train(&mut self, key: TrainingKey) -> Result<Arc<TrainingReport>, TrainingError> {
        match self.trainer.train(&self.frame, self.store.as_ref()) {
            Ok(trained) => {
                let report = Arc::new(trained.report);
                self.model = ModelState::Trained(Arc::clone(&report));
                self.trained_key = Some(key);
                Ok(report)
            }
            Err(err) => {
                self.model = ModelState::Failed(err.to_string());
                self.trained_key = None;
                log(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "session.training_failed",
                    json!({ "error": err.to_string() }),
                );
                Err(err)
            }
        }
    }
}

fn fingerprint(frame: &FeatureFrame) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.columns.hash(&mut hasher);
    for value in &frame.features {
        value.to_bits().hash(&mut hasher);
    }
    frame.labels.hash(&mut hasher);
    hasher.finish()
}

/// Startup failures; these abort the dashboard.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Input file missing, unreadable, or missing a required column.
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    /// Log file could not be opened.
    #[error("telemetry error: {0}")]
    Telemetry(anyhow::Error),
}
