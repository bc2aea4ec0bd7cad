use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{classical_ml::ForestParams, labeler::DEFAULT_THRESHOLD};

/// Dashboard configuration, usually read from `ocd.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    /// Delimited patient file.
    #[serde(default = "default_dataset")]
    pub dataset: PathBuf,
    /// Field delimiter of the patient file.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Directory holding `scaler.json` and `ocd_model.json`.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Optional JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Labeling rule.
    #[serde(default)]
    pub labeler: LabelerSettings,
    /// Split and forest settings.
    #[serde(default)]
    pub training: TrainingSettings,
}

/// Labeling rule settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelerSettings {
    /// Total Y-BOCS score at or above which a row is positive.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

impl Default for LabelerSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// Split and forest settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingSettings {
    /// Seed for the split and the forest.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Held-out share of usable rows.
    #[serde(default = "default_test_ratio")]
    pub test_ratio: f64,
    /// Number of trees.
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    /// Maximum tree depth; unbounded when absent.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Minimum rows required to split a node.
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            test_ratio: default_test_ratio(),
            n_trees: default_n_trees(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
        }
    }
}

impl TrainingSettings {
    /// Forest hyperparameters derived from these settings.
    #[must_use]
    pub const fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            bootstrap: true,
            seed: self.seed,
        }
    }

    /// Rejects settings the trainer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            bail!("test_ratio must lie strictly between 0 and 1, got {}", self.test_ratio);
        }
        if self.n_trees == 0 {
            bail!("n_trees must be at least 1");
        }
        if self.min_samples_split < 2 {
            bail!("min_samples_split must be at least 2");
        }
        Ok(())
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            delimiter: default_delimiter(),
            artifact_dir: default_artifact_dir(),
            log_path: None,
            labeler: LabelerSettings::default(),
            training: TrainingSettings::default(),
        }
    }
}

impl DashboardConfig {
    /// Loads configuration from a TOML file; relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading dashboard config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let source_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.dataset = resolve(&source_dir, &config.dataset);
        config.artifact_dir = resolve(&source_dir, &config.artifact_dir);
        config.log_path = config.log_path.map(|p| resolve(&source_dir, &p));
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character");
        }
        self.training.validate()
    }

    /// Delimiter as the byte the CSV reader expects.
    #[must_use]
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or(b',')
    }
}

fn resolve(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn default_dataset() -> PathBuf {
    PathBuf::from("OCD_Patient_Dataset_Demographics_&_Clinical_Data.csv")
}

const fn default_delimiter() -> char {
    ','
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

const fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

const fn default_seed() -> u64 {
    42
}

const fn default_test_ratio() -> f64 {
    0.3
}

const fn default_n_trees() -> usize {
    100
}

const fn default_min_samples_split() -> usize {
    2
}
