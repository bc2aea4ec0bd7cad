use chrono::Utc;
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    artifacts::{ArtifactError, ArtifactStore},
    classical_ml::{
        accuracy, train_test_split, ForestError, RandomForest, ScalerError, StandardScaler,
        TrainingReport,
    },
    config::TrainingSettings,
    features::FeatureFrame,
    telemetry::{log, DiagnosisTelemetry},
};

/// Fitted scaler and forest with the report of the run that produced them.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    /// Standardization fitted on the training partition.
    pub scaler: StandardScaler,
    /// Forest fitted on the scaled training partition.
    pub forest: RandomForest,
    /// Run summary.
    pub report: TrainingReport,
}

/// Split, scale, fit and persist.
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    settings: TrainingSettings,
    telemetry: Option<DiagnosisTelemetry>,
}

impl ModelTrainer {
    /// Creates a trainer with the given settings.
    #[must_use]
    pub const fn new(settings: TrainingSettings) -> Self {
        Self {
            settings,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: DiagnosisTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    /// Fits without touching any store.
    pub fn fit(&self, frame: &FeatureFrame) -> Result<TrainedModel, TrainingError> {
        self.settings
            .validate()
            .map_err(|err| TrainingError::InvalidSettings(err.to_string()))?;
        check_preconditions(frame)?;

        let split = train_test_split(frame, self.settings.test_ratio, self.settings.seed);
        if split.train.is_empty() {
            return Err(TrainingError::TooFewRows {
                rows: frame.n_rows(),
            });
        }
        let train = frame.select(&split.train);
        let test = frame.select(&split.test);
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "trainer.split",
            json!({
                "usable_rows": frame.n_rows(),
                "train_rows": train.n_rows(),
                "test_rows": test.n_rows(),
                "seed": self.settings.seed,
            }),
        );

        let scaler = StandardScaler::fit(train.features.view(), &frame.columns)?;
        let train_scaled = scaler.transform(train.features.view())?;
        let test_scaled = scaler.transform(test.features.view())?;

        log(
            self.telemetry.as_ref(),
            LogLevel::Debug,
            "trainer.fit_start",
            json!({ "n_trees": self.settings.n_trees, "max_depth": self.settings.max_depth }),
        );
        let forest = RandomForest::fit(
            train_scaled.view(),
            &train.labels,
            self.settings.forest_params(),
        )?;

        let held_out_predictions = forest.predict_batch(test_scaled.view());
        let held_out_accuracy = accuracy(&held_out_predictions, &test.labels);
        let report = TrainingReport {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            seed: self.settings.seed,
            usable_rows: frame.n_rows(),
            train_rows: train.n_rows(),
            test_rows: test.n_rows(),
            n_trees: forest.n_trees(),
            scaler_mean: scaler.mean().to_vec(),
            scaler_scale: scaler.scale().to_vec(),
            held_out_predictions,
            held_out_labels: test.labels,
            held_out_accuracy,
        };
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "trainer.fit_complete",
            json!({
                "run_id": report.run_id,
                "accuracy": report.held_out_accuracy,
                "avg_depth": forest.avg_depth(),
            }),
        );
        Ok(TrainedModel {
            scaler,
            forest,
            report,
        })
    }

    /// Fits and overwrites the stored scaler and forest.
    pub fn train(
        &self,
        frame: &FeatureFrame,
        store: &dyn ArtifactStore,
    ) -> Result<TrainedModel, TrainingError> {
        let trained = match self.fit(frame) {
            Ok(trained) => trained,
            Err(err) => {
                log(
                    self.telemetry.as_ref(),
                    LogLevel::Warn,
                    "trainer.rejected",
                    json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        store.save_scaler(&trained.scaler)?;
        store.save_model(&trained.forest)?;
        log(
            self.telemetry.as_ref(),
            LogLevel::Info,
            "trainer.artifacts_saved",
            json!({ "run_id": trained.report.run_id }),
        );
        Ok(trained)
    }
}

fn check_preconditions(frame: &FeatureFrame) -> Result<(), TrainingError> {
    match frame.n_rows() {
        0 => return Err(TrainingError::NoUsableRows),
        1 => return Err(TrainingError::TooFewRows { rows: 1 }),
        _ => {}
    }
    let distinct = frame.distinct_labels();
    if distinct.len() < 2 {
        return Err(TrainingError::SingleClass {
            label: distinct.first().copied().unwrap_or_default(),
        });
    }
    Ok(())
}

/// Training failures. None of them should take the dashboard down.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// Every row had a missing feature.
    #[error("no usable rows after dropping rows with missing features")]
    NoUsableRows,
    /// Not enough rows to split.
    #[error("need at least 2 usable rows to train, found {rows}")]
    TooFewRows {
        /// Usable rows.
        rows: usize,
    },
    /// All usable rows share one label.
    #[error("all usable rows carry label {label}; need both classes to train")]
    SingleClass {
        /// The only label present.
        label: usize,
    },
    /// Settings outside the accepted ranges.
    #[error("invalid training settings: {0}")]
    InvalidSettings(String),
    /// Scaler failure.
    #[error("scaler error: {0}")]
    Scaler(#[from] ScalerError),
    /// Forest failure.
    #[error("forest error: {0}")]
    Forest(#[from] ForestError),
    /// Persisting artifacts failed.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::MemoryArtifactStore,
        dataset::{PatientRecord, PatientTable},
        features::FeaturePipeline,
        labeler::DiagnosisLabeler,
    };
    use shared_logging::MemorySink;
    use std::sync::Arc;

    fn frame_from(records: Vec<PatientRecord>) -> FeatureFrame {
        FeaturePipeline.build(&DiagnosisLabeler::default().apply(&PatientTable::new(records)))
    }

    fn cohort(n: u32) -> FeatureFrame {
        frame_from(
            (0..n)
                .map(|i| {
                    let obs = (i * 7) % 41;
                    let comp = (i * 11) % 41;
                    PatientRecord::with_features(18 + (i * 13) % 60, (i * 5) % 120, obs, comp)
                })
                .collect(),
        )
    }

    fn quick() -> TrainingSettings {
        TrainingSettings {
            n_trees: 25,
            ..TrainingSettings::default()
        }
    }

    #[test]
    fn seventy_thirty_split_and_report() {
        let trainer = ModelTrainer::new(quick());
        let trained = trainer.fit(&cohort(100)).unwrap();
        assert_eq!(trained.report.train_rows, 70);
        assert_eq!(trained.report.test_rows, 30);
        assert_eq!(trained.report.held_out_predictions.len(), 30);
        assert_eq!(trained.scaler.n_samples_seen(), 70);
        assert!(trained.report.held_out_accuracy > 0.7);
    }

    #[test]
    fn identical_runs_are_bit_identical() {
        let data = cohort(120);
        let trainer = ModelTrainer::new(quick());
        let a = trainer.fit(&data).unwrap();
        let b = trainer.fit(&data).unwrap();
        assert_eq!(a.scaler, b.scaler);
        assert_eq!(
            a.report
                .scaler_mean
                .iter()
                .map(|v| v.to_bits())
                .collect::<Vec<_>>(),
            b.report
                .scaler_mean
                .iter()
                .map(|v| v.to_bits())
                .collect::<Vec<_>>()
        );
        assert_eq!(a.report.held_out_predictions, b.report.held_out_predictions);
        assert_eq!(a.forest, b.forest);
    }

    #[test]
    fn precondition_failures_are_typed() {
        let trainer = ModelTrainer::new(quick());

        let mut record = PatientRecord::with_features(30, 12, 20, 18);
        record.age = None;
        assert!(matches!(
            trainer.fit(&frame_from(vec![record])),
            Err(TrainingError::NoUsableRows)
        ));

        assert!(matches!(
            trainer.fit(&frame_from(vec![PatientRecord::with_features(30, 12, 20, 18)])),
            Err(TrainingError::TooFewRows { rows: 1 })
        ));

        let negatives = (0..10)
            .map(|i| PatientRecord::with_features(20 + i, i, 1, 2))
            .collect();
        assert!(matches!(
            trainer.fit(&frame_from(negatives)),
            Err(TrainingError::SingleClass { label: 0 })
        ));
    }

    #[test]
    fn two_rows_with_both_labels_train() {
        let data = frame_from(vec![
            PatientRecord::with_features(30, 12, 1, 1),
            PatientRecord::with_features(40, 24, 20, 20),
        ]);
        let trained = ModelTrainer::new(quick()).fit(&data).unwrap();
        assert_eq!(trained.report.train_rows, 1);
        assert_eq!(trained.report.test_rows, 1);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let trainer = ModelTrainer::new(TrainingSettings {
            test_ratio: 0.0,
            ..quick()
        });
        assert!(matches!(
            trainer.fit(&cohort(20)),
            Err(TrainingError::InvalidSettings(_))
        ));
    }

    #[test]
    fn train_persists_both_artifacts_and_logs() {
        let store = MemoryArtifactStore::new();
        let sink = Arc::new(MemorySink::new());
        let telemetry = DiagnosisTelemetry::builder("trainer")
            .sink(sink.clone())
            .build()
            .unwrap();
        let trainer = ModelTrainer::new(quick()).with_telemetry(telemetry);
        let trained = trainer.train(&cohort(60), &store).unwrap();
        assert_eq!(store.load_scaler().unwrap(), trained.scaler);
        assert_eq!(store.load_model().unwrap(), trained.forest);
        assert!(sink.contains("trainer.fit_complete"));
        assert!(sink.contains("trainer.artifacts_saved"));
    }
}
