use std::{ops::RangeInclusive, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    artifacts::{ArtifactError, ArtifactStore},
    classical_ml::{ForestPrediction, ScalerError},
    dataset::{AGE, COMPULSIONS, DURATION, OBSESSIONS},
    labeler::Diagnosis,
    telemetry::{log, DiagnosisTelemetry},
};

/// Accepted age range for interactive input.
pub const AGE_RANGE: RangeInclusive<f64> = 10.0..=100.0;
/// Accepted symptom duration range (months) for interactive input.
pub const DURATION_RANGE: RangeInclusive<f64> = 0.0..=120.0;
/// Accepted range of each Y-BOCS sub-score.
pub const SCORE_RANGE: RangeInclusive<f64> = 0.0..=40.0;

/// A single record to classify: feature name to value, in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientFeatures {
    values: IndexMap<String, f64>,
}

impl PatientFeatures {
    /// Record using the canonical model columns.
    #[must_use]
    pub fn new(age: f64, duration_months: f64, obsessions: f64, compulsions: f64) -> Self {
        Self::from_pairs([
            (AGE, age),
            (DURATION, duration_months),
            (OBSESSIONS, obsessions),
            (COMPULSIONS, compulsions),
        ])
    }

    /// Like [`PatientFeatures::new`] but rejects values outside the input ranges.
    pub fn checked(
        age: f64,
        duration_months: f64,
        obsessions: f64,
        compulsions: f64,
    ) -> Result<Self, PredictionError> {
        let checks = [
            (AGE, age, AGE_RANGE),
            (DURATION, duration_months, DURATION_RANGE),
            (OBSESSIONS, obsessions, SCORE_RANGE),
            (COMPULSIONS, compulsions, SCORE_RANGE),
        ];
        for (feature, value, range) in checks {
            if !range.contains(&value) {
                return Err(PredictionError::OutOfRange {
                    feature: feature.to_string(),
                    value,
                    min: *range.start(),
                    max: *range.end(),
                });
            }
        }
        Ok(Self::new(age, duration_months, obsessions, compulsions))
    }

    /// Record with arbitrary column names.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Value of a named feature.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Feature names in insertion order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    /// Values laid out in `schema` order, or `None` if the name sets differ.
    #[must_use]
    pub fn ordered(&self, schema: &[String]) -> Option<Vec<f64>> {
        if schema.len() != self.values.len() {
            return None;
        }
        schema.iter().map(|name| self.get(name)).collect()
    }
}

/// Classifier output for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted label.
    pub diagnosis: Diagnosis,
    /// Tree votes per class.
    pub votes: Vec<usize>,
    /// Fraction of trees agreeing with the label.
    pub confidence: f64,
}

impl From<ForestPrediction> for Prediction {
    fn from(value: ForestPrediction) -> Self {
        Self {
            diagnosis: Diagnosis::from_class(value.class),
            votes: value.votes,
            confidence: value.confidence,
        }
    }
}

/// Loads the persisted pair and classifies records.
#[derive(Clone)]
pub struct Predictor {
    store: Arc<dyn ArtifactStore>,
    telemetry: Option<DiagnosisTelemetry>,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl Predictor {
    /// Predictor reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            telemetry: None,
        }
    }

    /// Attaches telemetry.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: DiagnosisTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Scales `features` with the stored scaler (no refit) and runs the stored forest.
    pub fn predict(&self, features: &PatientFeatures) -> Result<Prediction, PredictionError> {
        let result = self.predict_inner(features);
        match &result {
            Ok(prediction) => log(
                self.telemetry.as_ref(),
                LogLevel::Info,
                "predictor.predict",
                json!({
                    "diagnosis": prediction.diagnosis.as_class(),
                    "confidence": prediction.confidence,
                }),
            ),
            Err(err) => log(
                self.telemetry.as_ref(),
                LogLevel::Warn,
                "predictor.failed",
                json!({ "error": err.to_string() }),
            ),
        }
        result
    }

    fn predict_inner(&self, features: &PatientFeatures) -> Result<Prediction, PredictionError> {
        let scaler = self.store.load_scaler().map_err(missing_as_model_not_found)?;
        let model = self.store.load_model().map_err(missing_as_model_not_found)?;

        let expected = scaler.feature_names().to_vec();
        let row = features
            .ordered(&expected)
            .ok_or_else(|| PredictionError::SchemaMismatch {
                expected: expected.clone(),
                found: features.names(),
            })?;
        if model.n_features() != expected.len() {
            return Err(PredictionError::ArtifactMismatch {
                scaler_features: expected.len(),
                model_features: model.n_features(),
            });
        }

        let scaled = scaler.transform_row(&row)?;
        Ok(model.predict_with_votes(&scaled).into())
    }
}

fn missing_as_model_not_found(err: ArtifactError) -> PredictionError {
    match err {
        ArtifactError::NotFound { .. } => PredictionError::ModelNotFound,
        other => PredictionError::Artifact(other),
    }
}

/// Prediction failures. All are recoverable from the caller's point of view.
#[derive(Debug, Error)]
pub enum PredictionError {
    /// No trained artifacts are available.
    #[error("model not found: train the model before predicting")]
    ModelNotFound,
    /// Input names differ from the names the scaler was fitted on.
    #[error("schema mismatch: expected features {expected:?}, found {found:?}")]
    SchemaMismatch {
        /// Fitted feature names.
        expected: Vec<String>,
        /// Provided feature names.
        found: Vec<String>,
    },
    /// Scaler and forest come from different fits.
    #[error("stored scaler has {scaler_features} features but model expects {model_features}")]
    ArtifactMismatch {
        /// Scaler width.
        scaler_features: usize,
        /// Forest width.
        model_features: usize,
    },
    /// Interactive input outside its accepted range.
    #[error("{feature} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        /// Feature name.
        feature: String,
        /// Offending value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Transform failure.
    #[error("scaler error: {0}")]
    Scaler(#[from] ScalerError),
    /// Artifact could not be read.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::MemoryArtifactStore,
        classical_ml::{ForestParams, RandomForest, StandardScaler},
        config::TrainingSettings,
        dataset::{PatientRecord, PatientTable},
        features::FeaturePipeline,
        labeler::DiagnosisLabeler,
        trainer::ModelTrainer,
    };
    use ndarray::array;

    fn trained_store() -> Arc<MemoryArtifactStore> {
        // sub-scores sweep both sides of the threshold
        let records = (0..200u32)
            .map(|i| PatientRecord::with_features(18 + i % 60, i % 100, (i * 3) % 41, (i * 7) % 41))
            .collect();
        let frame =
            FeaturePipeline.build(&DiagnosisLabeler::default().apply(&PatientTable::new(records)));
        let store = Arc::new(MemoryArtifactStore::new());
        ModelTrainer::new(TrainingSettings::default())
            .train(&frame, store.as_ref())
            .unwrap();
        store
    }

    #[test]
    fn untrained_store_reports_model_not_found() {
        let predictor = Predictor::new(Arc::new(MemoryArtifactStore::new()));
        let err = predictor
            .predict(&PatientFeatures::new(30.0, 12.0, 20.0, 18.0))
            .unwrap_err();
        assert!(matches!(err, PredictionError::ModelNotFound));
    }

    #[test]
    fn high_scores_predict_positive() {
        let predictor = Predictor::new(trained_store());
        let prediction = predictor
            .predict(&PatientFeatures::new(30.0, 12.0, 20.0, 18.0))
            .unwrap();
        assert_eq!(prediction.diagnosis, Diagnosis::Positive);
        assert!(prediction.confidence > 0.5);
        assert_eq!(prediction.votes.iter().sum::<usize>(), 100);
    }

    #[test]
    fn repeated_predictions_are_identical() {
        let predictor = Predictor::new(trained_store());
        let input = PatientFeatures::new(55.0, 40.0, 7.0, 9.0);
        let first = predictor.predict(&input).unwrap();
        for _ in 0..5 {
            assert_eq!(predictor.predict(&input).unwrap(), first);
        }
    }

    #[test]
    fn reordered_columns_are_accepted() {
        let predictor = Predictor::new(trained_store());
        let canonical = PatientFeatures::new(30.0, 12.0, 20.0, 18.0);
        let shuffled = PatientFeatures::from_pairs([
            (COMPULSIONS, 18.0),
            (AGE, 30.0),
            (OBSESSIONS, 20.0),
            (DURATION, 12.0),
        ]);
        assert_eq!(
            predictor.predict(&canonical).unwrap(),
            predictor.predict(&shuffled).unwrap()
        );
    }

    #[test]
    fn unknown_or_missing_columns_are_schema_mismatch() {
        let predictor = Predictor::new(trained_store());
        let renamed = PatientFeatures::from_pairs([
            ("Age (years)", 30.0),
            (DURATION, 12.0),
            (OBSESSIONS, 20.0),
            (COMPULSIONS, 18.0),
        ]);
        assert!(matches!(
            predictor.predict(&renamed),
            Err(PredictionError::SchemaMismatch { .. })
        ));
        let short = PatientFeatures::from_pairs([(AGE, 30.0), (DURATION, 12.0)]);
        assert!(matches!(
            predictor.predict(&short),
            Err(PredictionError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_pair_is_detected() {
        let store = Arc::new(MemoryArtifactStore::new());
        let names: Vec<String> = [AGE, DURATION, OBSESSIONS, COMPULSIONS]
            .iter()
            .map(ToString::to_string)
            .collect();
        let x4 = array![[1.0, 2.0, 3.0, 4.0], [2.0, 3.0, 4.0, 5.0]];
        store
            .save_scaler(&StandardScaler::fit(x4.view(), &names).unwrap())
            .unwrap();
        let x2 = array![[1.0, 2.0], [3.0, 4.0]];
        let params = ForestParams {
            n_trees: 3,
            ..ForestParams::default()
        };
        store
            .save_model(&RandomForest::fit(x2.view(), &[0, 1], params).unwrap())
            .unwrap();
        let predictor = Predictor::new(store);
        assert!(matches!(
            predictor.predict(&PatientFeatures::new(30.0, 12.0, 20.0, 18.0)),
            Err(PredictionError::ArtifactMismatch {
                scaler_features: 4,
                model_features: 2
            })
        ));
    }

    #[test]
    fn checked_input_enforces_ranges() {
        assert!(PatientFeatures::checked(30.0, 12.0, 20.0, 18.0).is_ok());
        assert!(matches!(
            PatientFeatures::checked(30.0, 12.0, 41.0, 18.0),
            Err(PredictionError::OutOfRange { ref feature, .. }) if feature == OBSESSIONS
        ));
        assert!(PatientFeatures::checked(9.0, 12.0, 20.0, 18.0).is_err());
    }
}
