use std::{fs::File, io::Read, path::Path};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column holding the patient age in years.
pub const AGE: &str = "Age";
/// Column holding the patient gender.
pub const GENDER: &str = "Gender";
/// Column holding the patient ethnicity.
pub const ETHNICITY: &str = "Ethnicity";
/// Column holding the symptom duration in months.
pub const DURATION: &str = "Duration of Symptoms (months)";
/// Column holding the Y-BOCS obsessions sub-score.
pub const OBSESSIONS: &str = "Y-BOCS Score (Obsessions)";
/// Column holding the Y-BOCS compulsions sub-score.
pub const COMPULSIONS: &str = "Y-BOCS Score (Compulsions)";
/// Column holding the prescribed medication class.
pub const MEDICATIONS: &str = "Medications";
/// Column holding the diagnosis date.
pub const DIAGNOSIS_DATE: &str = "OCD Diagnosis Date";

/// Headers that must be present in the input file. Others are ignored.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    AGE,
    GENDER,
    ETHNICITY,
    DURATION,
    OBSESSIONS,
    COMPULSIONS,
    MEDICATIONS,
    DIAGNOSIS_DATE,
];

/// One patient row. Every attribute may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    /// Age in years.
    pub age: Option<u32>,
    /// Gender label as written in the file.
    pub gender: Option<String>,
    /// Ethnicity label as written in the file.
    pub ethnicity: Option<String>,
    /// Duration of symptoms in months.
    pub duration_months: Option<u32>,
    /// Y-BOCS obsessions sub-score (0-40).
    pub obsessions: Option<u32>,
    /// Y-BOCS compulsions sub-score (0-40).
    pub compulsions: Option<u32>,
    /// Medication class.
    pub medications: Option<String>,
    /// Date of diagnosis.
    pub diagnosis_date: Option<NaiveDate>,
}

impl PatientRecord {
    /// Record with only the four model features populated.
    #[must_use]
    pub fn with_features(
        age: u32,
        duration_months: u32,
        obsessions: u32,
        compulsions: u32,
    ) -> Self {
        Self {
            age: Some(age),
            duration_months: Some(duration_months),
            obsessions: Some(obsessions),
            compulsions: Some(compulsions),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPatientRow {
    #[serde(rename = "Age")]
    age: Option<String>,
    #[serde(rename = "Gender")]
    gender: Option<String>,
    #[serde(rename = "Ethnicity")]
    ethnicity: Option<String>,
    #[serde(rename = "Duration of Symptoms (months)")]
    duration: Option<String>,
    #[serde(rename = "Y-BOCS Score (Obsessions)")]
    obsessions: Option<String>,
    #[serde(rename = "Y-BOCS Score (Compulsions)")]
    compulsions: Option<String>,
    #[serde(rename = "Medications")]
    medications: Option<String>,
    #[serde(rename = "OCD Diagnosis Date")]
    diagnosis_date: Option<String>,
}

/// In-memory patient table in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientTable {
    /// Rows in the order they appear in the source file.
    pub records: Vec<PatientRecord>,
}

impl PatientTable {
    /// Wraps already-built records.
    #[must_use]
    pub fn new(records: Vec<PatientRecord>) -> Self {
        Self { records }
    }

    /// Loads a delimited file from disk.
    pub fn load(path: impl AsRef<Path>, delimiter: u8) -> Result<Self, DatasetError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file, delimiter)
    }

    /// Parses a delimited stream with a header row.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, DatasetError> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|column| !headers.iter().any(|h| h == **column))
        {
            return Err(DatasetError::MissingColumn((*missing).to_string()));
        }

        let mut records = Vec::new();
        for (idx, row) in rdr.deserialize::<RawPatientRow>().enumerate() {
            // header is line 1
            let line = idx + 2;
            records.push(convert_row(row?, line)?);
        }
        Ok(Self { records })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the table holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn convert_row(raw: RawPatientRow, line: usize) -> Result<PatientRecord, DatasetError> {
    Ok(PatientRecord {
        age: parse_count(raw.age, AGE, line)?,
        gender: text(raw.gender),
        ethnicity: text(raw.ethnicity),
        duration_months: parse_count(raw.duration, DURATION, line)?,
        obsessions: parse_count(raw.obsessions, OBSESSIONS, line)?,
        compulsions: parse_count(raw.compulsions, COMPULSIONS, line)?,
        medications: text(raw.medications),
        diagnosis_date: parse_date(raw.diagnosis_date, line)?,
    })
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("na")
}

fn text(value: Option<String>) -> Option<String> {
    value.filter(|v| !is_missing(v))
}

/// Accepts `32` as well as `32.0`, which is how float-typed exports write whole numbers.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn parse_count(
    value: Option<String>,
    column: &'static str,
    line: usize,
) -> Result<Option<u32>, DatasetError> {
    let Some(value) = text(value) else {
        return Ok(None);
    };
    if let Ok(parsed) = value.parse::<u32>() {
        return Ok(Some(parsed));
    }
    match value.parse::<f64>() {
        Ok(parsed) if parsed.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&parsed) => {
            Ok(Some(parsed as u32))
        }
        _ => Err(DatasetError::InvalidNumber {
            column,
            line,
            value,
        }),
    }
}

fn parse_date(value: Option<String>, line: usize) -> Result<Option<NaiveDate>, DatasetError> {
    let Some(value) = text(value) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| DatasetError::InvalidDate { line, value })
}

/// Errors raised while loading the patient file.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A required header is absent or renamed.
    #[error("input file is missing required column `{0}`")]
    MissingColumn(String),
    /// Numeric cell that is neither empty nor a whole number.
    #[error("line {line}: column `{column}` holds non-numeric value `{value}`")]
    InvalidNumber {
        /// Column name.
        column: &'static str,
        /// 1-based line number in the file.
        line: usize,
        /// Offending cell.
        value: String,
    },
    /// Date cell not in `YYYY-MM-DD` form.
    #[error("line {line}: invalid diagnosis date `{value}`")]
    InvalidDate {
        /// 1-based line number in the file.
        line: usize,
        /// Offending cell.
        value: String,
    },
    /// Malformed delimited content.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// I/O error (filesystem).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "Patient ID,Age,Gender,Ethnicity,Marital Status,OCD Diagnosis Date,\
Duration of Symptoms (months),Y-BOCS Score (Obsessions),Y-BOCS Score (Compulsions),Medications";

    #[test]
    fn parses_rows_and_ignores_extra_columns() {
        let data = format!(
            "{HEADER}\n1018,32,Female,African,Single,2016-07-15,203,17,10,SNRI\n\
2406,69,Male,African,Divorced,2017-04-28,180,21,25,\n"
        );
        let table = PatientTable::from_reader(data.as_bytes(), b',').unwrap();
        assert_eq!(table.len(), 2);
        let first = &table.records[0];
        assert_eq!(first.age, Some(32));
        assert_eq!(first.gender.as_deref(), Some("Female"));
        assert_eq!(first.obsessions, Some(17));
        assert_eq!(
            first.diagnosis_date,
            NaiveDate::from_ymd_opt(2016, 7, 15)
        );
        assert_eq!(table.records[1].medications, None);
    }

    #[test]
    fn empty_and_nan_cells_are_missing() {
        let data = format!("{HEADER}\n1,,Male,Asian,Single,,12.0,NaN,8,SSRI\n");
        let table = PatientTable::from_reader(data.as_bytes(), b',').unwrap();
        let row = &table.records[0];
        assert_eq!(row.age, None);
        assert_eq!(row.duration_months, Some(12));
        assert_eq!(row.obsessions, None);
        assert_eq!(row.diagnosis_date, None);
    }

    #[test]
    fn missing_column_is_fatal() {
        let data = "Age,Gender,Ethnicity,Duration of Symptoms (months),Y-BOCS Score (Obsessions),\
Medications,OCD Diagnosis Date\n30,Male,Asian,12,20,SSRI,2020-01-01\n";
        let err = PatientTable::from_reader(data.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn(ref c) if c == COMPULSIONS));
    }

    #[test]
    fn rejects_non_numeric_scores() {
        let data = format!("{HEADER}\n1,40,Male,Asian,Single,2020-01-01,12,high,8,SSRI\n");
        let err = PatientTable::from_reader(data.as_bytes(), b',').unwrap_err();
        assert!(matches!(
            err,
            DatasetError::InvalidNumber { column, line: 2, .. } if column == OBSESSIONS
        ));
    }

    #[test]
    fn loads_tab_delimited_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patients.tsv");
        let data = format!(
            "{}\n7\t25\tMale\tHispanic\tMarried\t2021-03-02\t6\t9\t6\tBenzodiazepine\n",
            HEADER.replace(',', "\t")
        );
        fs::write(&path, data).unwrap();
        let table = PatientTable::load(&path, b'\t').unwrap();
        assert_eq!(table.records[0].medications.as_deref(), Some("Benzodiazepine"));
    }
}
