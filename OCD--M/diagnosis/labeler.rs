use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataset::{PatientRecord, PatientTable};

/// Total Y-BOCS score at or above which a patient is labeled positive.
pub const DEFAULT_THRESHOLD: u32 = 16;

/// Binary OCD diagnosis label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Diagnosis {
    /// Label 0.
    Negative,
    /// Label 1.
    Positive,
}

impl Diagnosis {
    /// Numeric class index used by the classifier.
    #[must_use]
    pub const fn as_class(self) -> usize {
        match self {
            Self::Negative => 0,
            Self::Positive => 1,
        }
    }

    /// Inverse of [`Diagnosis::as_class`]; any non-zero class is positive.
    #[must_use]
    pub const fn from_class(class: usize) -> Self {
        if class == 0 {
            Self::Negative
        } else {
            Self::Positive
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negative => f.write_str("OCD Negative"),
            Self::Positive => f.write_str("OCD Positive"),
        }
    }
}

/// Patient row together with its derived columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledRecord {
    /// Source row.
    pub record: PatientRecord,
    /// Obsessions + compulsions; missing when either sub-score is missing.
    pub total_ybocs: Option<u32>,
    /// Diagnosis derived from the total; missing when the total is missing.
    pub diagnosis: Option<Diagnosis>,
}

/// Labeled table, row-aligned with the source table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabeledTable {
    /// Labeled rows in source order.
    pub rows: Vec<LabeledRecord>,
}

impl LabeledTable {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` when no rows are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Count of rows labeled [`Diagnosis::Positive`].
    #[must_use]
    pub fn positive_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.diagnosis == Some(Diagnosis::Positive))
            .count()
    }
}

/// Fixed-threshold labeler over the two Y-BOCS sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosisLabeler {
    threshold: u32,
}

impl Default for DiagnosisLabeler {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl DiagnosisLabeler {
    /// Creates a labeler with a custom threshold.
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Threshold in use.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Sum of the sub-scores, propagating a missing value.
    ///
    /// A sum past `u32::MAX` is treated as missing.
    #[must_use]
    pub fn total(obsessions: Option<u32>, compulsions: Option<u32>) -> Option<u32> {
        obsessions?.checked_add(compulsions?)
    }

    /// Label for a single pair of sub-scores.
    #[must_use]
    pub fn label(&self, obsessions: Option<u32>, compulsions: Option<u32>) -> Option<Diagnosis> {
        Self::total(obsessions, compulsions).map(|total| self.classify_total(total))
    }

    /// Label for an already-summed total.
    #[must_use]
    pub const fn classify_total(&self, total: u32) -> Diagnosis {
        if total >= self.threshold {
            Diagnosis::Positive
        } else {
            Diagnosis::Negative
        }
    }

    /// Derives the total and diagnosis columns for every row.
    #[must_use]
    pub fn apply(&self, table: &PatientTable) -> LabeledTable {
        let rows = table
            .records
            .iter()
            .map(|record| {
                let total_ybocs = Self::total(record.obsessions, record.compulsions);
                LabeledRecord {
                    record: record.clone(),
                    total_ybocs,
                    diagnosis: total_ybocs.map(|total| self.classify_total(total)),
                }
            })
            .collect();
        LabeledTable { rows }
    }
}
