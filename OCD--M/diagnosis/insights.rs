//! Descriptive aggregations behind the insight and visual-analysis pages.

use chrono::{Datelike, Month};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{dataset::PatientRecord, labeler::LabeledTable};

/// Headline numbers shown above every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatistics {
    /// Rows in the table.
    pub total_patients: usize,
    /// Rows labeled positive.
    pub diagnosed: usize,
    /// Mean age truncated to whole years; `None` when no row has an age.
    pub average_age: Option<u32>,
}

/// Computes the headline numbers.
#[must_use]
pub fn key_statistics(table: &LabeledTable) -> KeyStatistics {
    let ages: Vec<u32> = table.rows.iter().filter_map(|row| row.record.age).collect();
    let average_age = if ages.is_empty() {
        None
    } else {
        let sum: u64 = ages.iter().map(|&a| u64::from(a)).sum();
        u32::try_from(sum / ages.len() as u64).ok()
    };
    KeyStatistics {
        total_patients: table.len(),
        diagnosed: table.positive_count(),
        average_age,
    }
}

/// Counts per distinct value, most frequent first; ties keep first-seen order.
pub fn value_counts<'a, F>(table: &'a LabeledTable, column: F) -> IndexMap<String, usize>
where
    F: Fn(&'a PatientRecord) -> Option<&'a str>,
{
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for row in &table.rows {
        if let Some(value) = column(&row.record) {
            *counts.entry(value.to_string()).or_default() += 1;
        }
    }
    // stable sort keeps first-seen order among equal counts
    counts.sort_by(|_, a, _, b| b.cmp(a));
    counts
}

/// Patients per gender.
#[must_use]
pub fn gender_counts(table: &LabeledTable) -> IndexMap<String, usize> {
    value_counts(table, |r| r.gender.as_deref())
}

/// Patients per ethnicity.
#[must_use]
pub fn ethnicity_counts(table: &LabeledTable) -> IndexMap<String, usize> {
    value_counts(table, |r| r.ethnicity.as_deref())
}

/// Patients per medication class.
#[must_use]
pub fn medication_counts(table: &LabeledTable) -> IndexMap<String, usize> {
    value_counts(table, |r| r.medications.as_deref())
}

/// Diagnoses per calendar month (all years pooled), January first.
///
/// Months without diagnoses are omitted.
#[must_use]
pub fn monthly_diagnoses(table: &LabeledTable) -> IndexMap<String, usize> {
    let mut per_month = [0usize; 12];
    for date in table.rows.iter().filter_map(|row| row.record.diagnosis_date) {
        per_month[date.month0() as usize] += 1;
    }
    per_month
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .filter_map(|(idx, &count)| {
            let month = Month::try_from(u8::try_from(idx + 1).ok()?).ok()?;
            Some((month.name().to_string(), count))
        })
        .collect()
}

/// Five-number summary of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxStats {
    /// Observations summarized.
    pub count: usize,
    /// Smallest value.
    pub min: f64,
    /// 25th percentile.
    pub q1: f64,
    /// 50th percentile.
    pub median: f64,
    /// 75th percentile.
    pub q3: f64,
    /// Largest value.
    pub max: f64,
}

impl BoxStats {
    /// Summarizes `values`; `None` for an empty sample.
    #[must_use]
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        Some(Self {
            count: values.len(),
            min: values[0],
            q1: quantile(&values, 0.25),
            median: quantile(&values, 0.5),
            q3: quantile(&values, 0.75),
            max: values[values.len() - 1],
        })
    }
}

/// Linear-interpolation quantile of sorted, non-empty data.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Obsessions and compulsions spread for one gender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityByGender {
    /// Gender label.
    pub gender: String,
    /// Obsessions sub-score summary.
    pub obsessions: Option<BoxStats>,
    /// Compulsions sub-score summary.
    pub compulsions: Option<BoxStats>,
}

/// Sub-score spread per gender, genders in first-seen order.
#[must_use]
pub fn severity_by_gender(table: &LabeledTable) -> Vec<SeverityByGender> {
    let mut groups: IndexMap<&str, (Vec<f64>, Vec<f64>)> = IndexMap::new();
    for row in &table.rows {
        let Some(gender) = row.record.gender.as_deref() else {
            continue;
        };
        let entry = groups.entry(gender).or_default();
        if let Some(o) = row.record.obsessions {
            entry.0.push(f64::from(o));
        }
        if let Some(c) = row.record.compulsions {
            entry.1.push(f64::from(c));
        }
    }
    groups
        .into_iter()
        .map(|(gender, (obsessions, compulsions))| SeverityByGender {
            gender: gender.to_string(),
            obsessions: BoxStats::from_values(obsessions),
            compulsions: BoxStats::from_values(compulsions),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dataset::PatientTable, labeler::DiagnosisLabeler};
    use chrono::NaiveDate;

    fn record(age: Option<u32>, gender: &str, obs: u32, comp: u32, date: &str) -> PatientRecord {
        PatientRecord {
            age,
            gender: Some(gender.to_string()),
            ethnicity: Some("Asian".into()),
            duration_months: Some(12),
            obsessions: Some(obs),
            compulsions: Some(comp),
            medications: Some(if obs > 10 { "SSRI" } else { "SNRI" }.into()),
            diagnosis_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
        }
    }

    fn table() -> LabeledTable {
        DiagnosisLabeler::default().apply(&PatientTable::new(vec![
            record(Some(30), "Male", 20, 18, "2020-03-14"),
            record(Some(41), "Female", 4, 3, "2019-03-02"),
            record(None, "Female", 12, 10, "2021-11-20"),
            record(Some(52), "Female", 8, 1, "2022-01-09"),
        ]))
    }

    #[test]
    fn key_statistics_match_table() {
        let stats = key_statistics(&table());
        assert_eq!(stats.total_patients, 4);
        assert_eq!(stats.diagnosed, 2);
        assert_eq!(stats.average_age, Some(41));
        assert_eq!(key_statistics(&LabeledTable::default()).average_age, None);
    }

    #[test]
    fn value_counts_sort_by_frequency() {
        let genders = gender_counts(&table());
        assert_eq!(
            genders.into_iter().collect::<Vec<_>>(),
            vec![("Female".to_string(), 3), ("Male".to_string(), 1)]
        );
        let meds = medication_counts(&table());
        assert_eq!(meds["SNRI"], 2);
        assert_eq!(meds["SSRI"], 2);
        // tie keeps first-seen order
        assert_eq!(meds.get_index(0).unwrap().0, "SSRI");
        assert_eq!(ethnicity_counts(&table())["Asian"], 4);
    }

    #[test]
    fn months_are_in_calendar_order() {
        let months = monthly_diagnoses(&table());
        assert_eq!(
            months.into_iter().collect::<Vec<_>>(),
            vec![
                ("January".to_string(), 1),
                ("March".to_string(), 2),
                ("November".to_string(), 1)
            ]
        );
    }

    #[test]
    fn box_stats_interpolate_quartiles() {
        let stats = BoxStats::from_values(vec![4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.median - 2.5).abs() < 1e-12);
        assert!((stats.q1 - 1.75).abs() < 1e-12);
        assert!((stats.q3 - 3.25).abs() < 1e-12);
        assert!(BoxStats::from_values(Vec::new()).is_none());
    }

    #[test]
    fn severity_groups_by_gender() {
        let groups = severity_by_gender(&table());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].gender, "Male");
        let female = &groups[1];
        assert_eq!(female.obsessions.unwrap().count, 3);
        assert!((female.obsessions.unwrap().median - 8.0).abs() < 1e-12);
    }
}
