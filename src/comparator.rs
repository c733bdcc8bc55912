use crate::error::{FinancialIngestError, Result};
use crate::record::FinancialRecord;
use crate::schema::{FieldSchema, Polarity};
use crate::utils::percent_change;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Changes with `|percent| < flat_threshold` are classified flat (0.05 = 5%).
    pub flat_threshold: f64,
    /// Per-field polarity that takes precedence over the schema.
    pub polarity_overrides: BTreeMap<String, Polarity>,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            flat_threshold: 0.05,
            polarity_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendClassification {
    Improved,
    Declined,
    Flat,
    /// Baseline is zero, so no percentage can be computed.
    NewOrUndefined,
    /// Field only exists in one of the two periods.
    MissingInPeriod,
}

impl fmt::Display for TrendClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Improved => "improved",
            Self::Declined => "declined",
            Self::Flat => "flat",
            Self::NewOrUndefined => "new_or_undefined",
            Self::MissingInPeriod => "missing_in_period",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldComparison {
    pub field: String,
    pub baseline: Option<f64>,
    pub current: Option<f64>,
    pub absolute_delta: Option<f64>,
    /// Fraction of the baseline magnitude (0.5 = +50%).
    pub percent_delta: Option<f64>,
    pub polarity: Polarity,
    pub classification: TrendClassification,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonResult {
    pub company_name: String,
    pub baseline: FinancialRecord,
    pub current: FinancialRecord,
    pub fields: BTreeMap<String, FieldComparison>,
    pub flat_threshold: f64,
}

impl ComparisonResult {
    pub fn field(&self, name: &str) -> Option<&FieldComparison> {
        self.fields.get(name)
    }

    pub fn baseline_year(&self) -> i32 {
        self.baseline.year
    }

    pub fn current_year(&self) -> i32 {
        self.current.year
    }

    pub fn with_classification(
        &self,
        classification: TrendClassification,
    ) -> impl Iterator<Item = &FieldComparison> {
        self.fields
            .values()
            .filter(move |c| c.classification == classification)
    }
}

pub struct TrendComparator<'a> {
    schema: &'a FieldSchema,
    config: &'a ComparisonConfig,
}

impl<'a> TrendComparator<'a> {
    pub fn new(schema: &'a FieldSchema, config: &'a ComparisonConfig) -> Self {
        Self { schema, config }
    }

    /// Compares `current` against an earlier `baseline` of the same company.
    pub fn compare(
        &self,
        baseline: &FinancialRecord,
        current: &FinancialRecord,
    ) -> Result<ComparisonResult> {
        if baseline.key().company_name != current.key().company_name {
            return Err(FinancialIngestError::PeriodMismatch(format!(
                "cannot compare '{}' with '{}'",
                baseline.company_name, current.company_name
            )));
        }
        if baseline.year >= current.year {
            return Err(FinancialIngestError::PeriodMismatch(format!(
                "baseline year {} must be earlier than current year {}",
                baseline.year, current.year
            )));
        }

        let names: BTreeSet<&String> = baseline.values.keys().chain(current.values.keys()).collect();
        let fields: BTreeMap<String, FieldComparison> = names
            .into_iter()
            .map(|name| {
                let comparison =
                    self.compare_field(name, baseline.value(name), current.value(name));
                (name.clone(), comparison)
            })
            .collect();

        info!(
            "Compared {} {} -> {}: {} fields",
            current.company_name,
            baseline.year,
            current.year,
            fields.len()
        );

        Ok(ComparisonResult {
            company_name: current.company_name.clone(),
            baseline: baseline.clone(),
            current: current.clone(),
            fields,
            flat_threshold: self.config.flat_threshold,
        })
    }

    pub fn polarity_for(&self, field: &str) -> Polarity {
        self.config
            .polarity_overrides
            .get(field)
            .copied()
            .unwrap_or_else(|| self.schema.polarity_of(field))
    }

    fn compare_field(
        &self,
        field: &str,
        baseline: Option<f64>,
        current: Option<f64>,
    ) -> FieldComparison {
        let polarity = self.polarity_for(field);

        let (absolute_delta, percent_delta, classification) = match (baseline, current) {
            (Some(b), Some(c)) => {
                let delta = c - b;
                match percent_change(b, c) {
                    Some(percent) => (
                        Some(delta),
                        Some(percent),
                        self.classify(percent, polarity),
                    ),
                    None => (Some(delta), None, TrendClassification::NewOrUndefined),
                }
            }
            _ => (None, None, TrendClassification::MissingInPeriod),
        };

        FieldComparison {
            field: field.to_string(),
            baseline,
            current,
            absolute_delta,
            percent_delta,
            polarity,
            classification,
        }
    }

    fn classify(&self, percent: f64, polarity: Polarity) -> TrendClassification {
        if percent == 0.0 || percent.abs() < self.config.flat_threshold {
            return TrendClassification::Flat;
        }
        if percent * polarity.sign() > 0.0 {
            TrendClassification::Improved
        } else {
            TrendClassification::Declined
        }
    }
}

pub fn compare(
    baseline: &FinancialRecord,
    current: &FinancialRecord,
    schema: &FieldSchema,
    config: &ComparisonConfig,
) -> Result<ComparisonResult> {
    TrendComparator::new(schema, config).compare(baseline, current)
}
