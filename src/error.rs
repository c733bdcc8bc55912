use crate::validator::ValidationViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinancialIngestError {
    #[error("Could not parse model response: {0}")]
    ExtractionParse(String),

    #[error("Validation failed with {} violation(s): {}", .0.len(), join_violations(.0))]
    Validation(Vec<ValidationViolation>),

    #[error("Period mismatch: {0}")]
    PeriodMismatch(String),

    #[error("Summary composition failed: {0}")]
    Composition(String),

    #[error("Inference service unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Inference service rejected the request: {0}")]
    InferenceRejected(String),

    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),

    #[error("No record found for {company_name} ({year})")]
    NotFound { company_name: String, year: i32 },

    #[error("A record for {company_name} ({year}) already exists")]
    DuplicateRecord { company_name: String, year: i32 },

    #[error("Need at least two stored years for {company_name}, found {found}")]
    InsufficientHistory { company_name: String, found: usize },

    #[error("Invalid field schema '{schema}': {details}")]
    SchemaError { schema: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FinancialIngestError {
    /// Only transport-level failures are worth another attempt; everything else is
    /// deterministic for a given input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CollaboratorUnavailable(_))
    }

    pub fn violations(&self) -> Option<&[ValidationViolation]> {
        match self {
            Self::Validation(violations) => Some(violations),
            _ => None,
        }
    }
}

fn join_violations(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, FinancialIngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(FinancialIngestError::CollaboratorUnavailable("timeout".into()).is_retryable());
        assert!(!FinancialIngestError::ExtractionParse("bad".into()).is_retryable());
        assert!(!FinancialIngestError::Composition("empty".into()).is_retryable());
        assert!(!FinancialIngestError::InferenceRejected("unknown model".into()).is_retryable());
    }

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = FinancialIngestError::Validation(vec![
            ValidationViolation::MissingField {
                field: "net_income".to_string(),
            },
            ValidationViolation::TypeMismatch {
                field: "revenue".to_string(),
                raw: "lots".to_string(),
                expected: "monetary amount".to_string(),
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("2 violation(s)"));
        assert!(message.contains("net_income"));
        assert!(message.contains("revenue"));
        assert_eq!(err.violations().map(|v| v.len()), Some(2));
    }
}
