use crate::error::{FinancialIngestError, Result};
use crate::record::{CandidateRecord, CandidateValue, FinancialRecord, RawValue};
use crate::schema::{FieldKind, FieldSchema, FieldSpec, FormulaOutcome, COMPANY_FIELD, YEAR_FIELD};
use crate::utils::{
    normalize_company_name, parse_amount, parse_percentage, parse_year, within_tolerance,
};
use chrono::{Datelike, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const MAX_COMPANY_NAME_CHARS: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Relative tolerance for derived fields when the schema does not set one (0.01 = 1%).
    pub derivation_tolerance: f64,
    /// Absolute tolerance floor, useful when the recomputed value is close to zero.
    pub min_absolute_tolerance: f64,
    pub min_year: i32,
    /// Latest accepted fiscal year; `None` means next calendar year.
    pub max_year: Option<i32>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            derivation_tolerance: 0.01,
            min_absolute_tolerance: 0.0,
            min_year: 1900,
            max_year: None,
        }
    }
}

impl ValidationConfig {
    fn resolved_max_year(&self) -> i32 {
        self.max_year.unwrap_or_else(|| Utc::now().year() + 1)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationViolation {
    #[error("Missing required field '{field}'")]
    MissingField { field: String },

    #[error("Field '{field}' has value '{raw}' that is not a valid {expected}")]
    TypeMismatch {
        field: String,
        raw: String,
        expected: String,
    },

    #[error("Field '{field}' value {value} is outside the allowed range [{}, {}]", fmt_bound(.min), fmt_bound(.max))]
    OutOfRange {
        field: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("Derived field '{field}' was extracted as {extracted} but recomputes to {recomputed} ({formula}, tolerance {tolerance})")]
    DerivationConflict {
        field: String,
        extracted: f64,
        recomputed: f64,
        formula: String,
        tolerance: f64,
    },
}

fn fmt_bound(bound: &Option<f64>) -> String {
    bound.map_or_else(|| "unbounded".to_string(), |b| b.to_string())
}

impl ValidationViolation {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::TypeMismatch { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::DerivationConflict { field, .. } => field,
        }
    }

    /// Derivation conflicts are reported but never block a record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::DerivationConflict { .. })
    }
}

/// A validated record plus the soft violations found while producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub record: FinancialRecord,
    pub conflicts: Vec<ValidationViolation>,
}

pub struct SchemaValidator<'a> {
    schema: &'a FieldSchema,
    derivation_order: Vec<&'a FieldSpec>,
    config: &'a ValidationConfig,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a FieldSchema, config: &'a ValidationConfig) -> Result<Self> {
        let derivation_order = schema.derivation_order()?;
        Ok(Self {
            schema,
            derivation_order,
            config,
        })
    }

    /// Runs every check and reports every violation; never stops at the first one.
    pub fn check(
        &self,
        candidate: &CandidateRecord,
    ) -> std::result::Result<ValidatedRecord, Vec<ValidationViolation>> {
        let mut violations = Vec::new();

        let company_name = self.check_company(candidate, &mut violations);
        let year = self.check_year(candidate.get(YEAR_FIELD), YEAR_FIELD, &mut violations);

        let mut values: BTreeMap<String, f64> = BTreeMap::new();
        let mut text_fields: BTreeMap<String, String> = BTreeMap::new();
        let mut provenance: BTreeMap<String, String> = BTreeMap::new();
        let mut extracted_derived: BTreeMap<&str, f64> = BTreeMap::new();
        let mut failed: BTreeSet<&str> = BTreeSet::new();

        for spec in &self.schema.fields {
            let Some(candidate_value) = candidate.get(&spec.name) else {
                if spec.required && spec.derived.is_none() {
                    violations.push(ValidationViolation::MissingField {
                        field: spec.name.clone(),
                    });
                }
                continue;
            };

            match spec.kind {
                FieldKind::Text => {
                    let text = candidate_value.raw.to_string().trim().to_string();
                    if text.is_empty() {
                        if spec.required {
                            violations.push(ValidationViolation::MissingField {
                                field: spec.name.clone(),
                            });
                        }
                    } else {
                        text_fields.insert(spec.name.clone(), text);
                        provenance.insert(spec.name.clone(), candidate_value.note.clone());
                    }
                }
                FieldKind::Year => {
                    match self.check_year(Some(candidate_value), &spec.name, &mut violations) {
                        Some(year) => {
                            text_fields.insert(spec.name.clone(), year.to_string());
                            provenance.insert(spec.name.clone(), candidate_value.note.clone());
                        }
                        None => {
                            failed.insert(spec.name.as_str());
                        }
                    }
                }
                kind => match coerce_number(candidate_value, kind) {
                    None => {
                        violations.push(ValidationViolation::TypeMismatch {
                            field: spec.name.clone(),
                            raw: candidate_value.raw.to_string(),
                            expected: spec.kind.label().to_string(),
                        });
                        failed.insert(spec.name.as_str());
                    }
                    Some(value) if spec.derived.is_some() => {
                        extracted_derived.insert(spec.name.as_str(), value);
                    }
                    Some(value) => {
                        if self.check_range(spec, value, &mut violations) {
                            values.insert(spec.name.clone(), value);
                            provenance.insert(spec.name.clone(), candidate_value.note.clone());
                        } else {
                            failed.insert(spec.name.as_str());
                        }
                    }
                },
            }
        }

        for spec in &self.derivation_order {
            let Some(derived) = &spec.derived else {
                continue;
            };
            if derived.formula.inputs().iter().any(|i| failed.contains(i)) {
                debug!(
                    "Skipping derivation of '{}': an input failed validation",
                    spec.name
                );
                failed.insert(spec.name.as_str());
                continue;
            }

            let extracted = extracted_derived.get(spec.name.as_str()).copied();
            let mut source = candidate.get(&spec.name).map(|c| c.note.clone());
            let value = match derived.formula.evaluate(&values) {
                FormulaOutcome::Computed(recomputed) => {
                    if let Some(extracted) = extracted {
                        let tolerance = derived
                            .tolerance
                            .unwrap_or(self.config.derivation_tolerance);
                        if !within_tolerance(
                            extracted,
                            recomputed,
                            tolerance,
                            self.config.min_absolute_tolerance,
                        ) {
                            violations.push(ValidationViolation::DerivationConflict {
                                field: spec.name.clone(),
                                extracted,
                                recomputed,
                                formula: derived.formula.describe(),
                                tolerance,
                            });
                        }
                    }
                    source = Some(format!("computed as {}", derived.formula.describe()));
                    Some(recomputed)
                }
                FormulaOutcome::MissingInputs => extracted,
                FormulaOutcome::Undefined => None,
            };

            match value {
                Some(value) => {
                    if self.check_range(spec, value, &mut violations) {
                        values.insert(spec.name.clone(), value);
                        if let Some(source) = source {
                            provenance.insert(spec.name.clone(), source);
                        }
                    } else {
                        failed.insert(spec.name.as_str());
                    }
                }
                None if spec.required => violations.push(ValidationViolation::MissingField {
                    field: spec.name.clone(),
                }),
                None => {}
            }
        }

        for conflict in violations.iter().filter(|v| !v.is_fatal()) {
            warn!("{}", conflict);
        }

        match (company_name, year) {
            (Some(company_name), Some(year)) if !violations.iter().any(|v| v.is_fatal()) => {
                Ok(ValidatedRecord {
                    record: FinancialRecord {
                        company_name,
                        year,
                        schema_name: self.schema.name.clone(),
                        schema_version: self.schema.version.clone(),
                        values,
                        text_fields,
                        confidence: candidate.confidence,
                        provenance,
                        source: None,
                    },
                    conflicts: violations,
                })
            }
            _ => Err(violations),
        }
    }

    pub fn validate(&self, candidate: &CandidateRecord) -> Result<ValidatedRecord> {
        self.check(candidate).map_err(FinancialIngestError::Validation)
    }

    fn check_company(
        &self,
        candidate: &CandidateRecord,
        violations: &mut Vec<ValidationViolation>,
    ) -> Option<String> {
        let raw = match candidate.get(COMPANY_FIELD) {
            Some(value) => value.raw.to_string(),
            None => String::new(),
        };
        let name = normalize_company_name(&raw);

        if name.is_empty() {
            violations.push(ValidationViolation::MissingField {
                field: COMPANY_FIELD.to_string(),
            });
            return None;
        }
        if name.chars().count() > MAX_COMPANY_NAME_CHARS {
            violations.push(ValidationViolation::TypeMismatch {
                field: COMPANY_FIELD.to_string(),
                raw: name.chars().take(40).collect::<String>() + "...",
                expected: format!("company name of at most {} characters", MAX_COMPANY_NAME_CHARS),
            });
            return None;
        }
        Some(name)
    }

    fn check_year(
        &self,
        value: Option<&CandidateValue>,
        field: &str,
        violations: &mut Vec<ValidationViolation>,
    ) -> Option<i32> {
        let Some(value) = value else {
            violations.push(ValidationViolation::MissingField {
                field: field.to_string(),
            });
            return None;
        };

        let parsed = match &value.raw {
            RawValue::Number(n) if n.fract() == 0.0 => Some(*n as i32),
            RawValue::Number(_) => None,
            RawValue::Text(text) => parse_year(text),
        };

        let Some(year) = parsed else {
            violations.push(ValidationViolation::TypeMismatch {
                field: field.to_string(),
                raw: value.raw.to_string(),
                expected: FieldKind::Year.label().to_string(),
            });
            return None;
        };

        let max_year = self.config.resolved_max_year();
        if year < self.config.min_year || year > max_year {
            violations.push(ValidationViolation::OutOfRange {
                field: field.to_string(),
                value: year as f64,
                min: Some(self.config.min_year as f64),
                max: Some(max_year as f64),
            });
            return None;
        }
        Some(year)
    }

    fn check_range(
        &self,
        spec: &FieldSpec,
        value: f64,
        violations: &mut Vec<ValidationViolation>,
    ) -> bool {
        match &spec.range {
            Some(range) if !range.contains(value) => {
                violations.push(ValidationViolation::OutOfRange {
                    field: spec.name.clone(),
                    value,
                    min: range.min,
                    max: range.max,
                });
                false
            }
            _ => true,
        }
    }
}

/// A `%` suffix is only meaningful for percentage fields.
fn coerce_number(value: &CandidateValue, kind: FieldKind) -> Option<f64> {
    match &value.raw {
        RawValue::Number(n) if n.is_finite() => Some(*n),
        RawValue::Number(_) => None,
        RawValue::Text(text) if kind == FieldKind::Percentage => parse_percentage(text),
        RawValue::Text(text) => parse_amount(text),
    }
}

/// Validates `candidate` against `schema`, returning the record or every violation found.
pub fn validate(
    candidate: &CandidateRecord,
    schema: &FieldSchema,
    config: &ValidationConfig,
) -> Result<ValidatedRecord> {
    SchemaValidator::new(schema, config)?.validate(candidate)
}
