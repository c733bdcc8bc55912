use crate::schema::FieldSchema;
use crate::utils::company_key;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Text pulled from one uploaded file. Only lives for the duration of an ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialDocument {
    pub source_id: String,
    pub extracted_at: DateTime<Utc>,
    pub text: String,
}

impl FinancialDocument {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            extracted_at: Utc::now(),
            text: text.into(),
        }
    }
}

/// A value exactly as the model produced it. Numeric strings stay strings here;
/// coercion happens in the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CandidateValue {
    pub raw: RawValue,
    /// Where the model says the value came from, or `"model output"` when it did not say.
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct CandidateRecord {
    pub fields: BTreeMap<String, CandidateValue>,
    /// Overall confidence the model reported for the extraction, if any (0.0 - 1.0).
    #[serde(default)]
    pub confidence: Option<f64>,
}

pub const DEFAULT_PROVENANCE: &str = "model output";

impl CandidateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, raw: RawValue, note: impl Into<String>) {
        self.fields.insert(
            name.into(),
            CandidateValue {
                raw,
                note: note.into(),
            },
        );
    }

    pub fn with_number(mut self, name: &str, value: f64) -> Self {
        self.insert(name, RawValue::Number(value), DEFAULT_PROVENANCE);
        self
    }

    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.insert(name, RawValue::Text(value.to_string()), DEFAULT_PROVENANCE);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CandidateValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Storage identity of a record. The company name is case-folded; the display
/// spelling stays on [`FinancialRecord::company_name`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub company_name: String,
    pub year: i32,
}

impl RecordKey {
    pub fn new(company_name: &str, year: i32) -> Self {
        Self {
            company_name: company_key(company_name),
            year,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.company_name, self.year)
    }
}

/// The uploaded file a record was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RecordSource {
    pub source_id: String,
    pub extracted_at: DateTime<Utc>,
}

impl From<&FinancialDocument> for RecordSource {
    fn from(document: &FinancialDocument) -> Self {
        Self {
            source_id: document.source_id.clone(),
            extracted_at: document.extracted_at,
        }
    }
}

/// A record that passed schema validation. Derived fields hold recomputed values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct FinancialRecord {
    pub company_name: String,
    pub year: i32,
    pub schema_name: String,
    pub schema_version: String,
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub text_fields: BTreeMap<String, String>,
    /// Confidence the model reported for the extraction (0.0 - 1.0).
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Where each stored value came from, by field name.
    #[serde(default)]
    pub provenance: BTreeMap<String, String>,
    /// Set when the record was ingested from a file.
    #[serde(default)]
    pub source: Option<RecordSource>,
}

impl FinancialRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.company_name, self.year)
    }

    pub fn value(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }

    pub fn summary(&self, schema: &FieldSchema) -> RecordSummary {
        let margin = |field: &str| match (self.value(field), self.value("revenue")) {
            (Some(v), Some(revenue)) if revenue > 0.0 => Some(v / revenue * 100.0),
            _ => None,
        };

        let total_fields = schema.fields.len();
        let completed_fields = schema
            .fields
            .iter()
            .filter(|f| self.values.contains_key(&f.name) || self.text_fields.contains_key(&f.name))
            .count();
        let has = |fields: &[&str]| fields.iter().all(|f| self.values.contains_key(*f));

        RecordSummary {
            gross_margin: margin("gross_profit"),
            operating_margin: margin("operating_income"),
            net_margin: margin("net_income"),
            completed_fields,
            total_fields,
            completeness_score: if total_fields == 0 {
                0.0
            } else {
                completed_fields as f64 / total_fields as f64
            },
            has_income_statement: has(&["revenue", "net_income"]),
            has_balance_sheet: has(&["total_assets", "total_liabilities", "equity"]),
        }
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FinancialRecord)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSummary {
    pub gross_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub completed_fields: usize,
    pub total_fields: usize,
    pub completeness_score: f64,
    pub has_income_statement: bool,
    pub has_balance_sheet: bool,
}
