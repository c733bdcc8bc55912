use crate::error::{FinancialIngestError, Result};
use crate::record::FinancialDocument;
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Converts an uploaded file into plain text. PDF, spreadsheet and OCR backends
/// plug in here; the crate only ships a UTF-8 reader.
#[async_trait]
pub trait DocumentTextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8], source_id: &str) -> Result<FinancialDocument>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentTextExtractor for PlainTextExtractor {
    async fn extract_text(&self, bytes: &[u8], source_id: &str) -> Result<FinancialDocument> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            FinancialIngestError::UnreadableDocument(format!("{}: not UTF-8 text ({})", source_id, e))
        })?;
        let text = text.trim_start_matches('\u{feff}');
        if text.trim().is_empty() {
            return Err(FinancialIngestError::UnreadableDocument(format!(
                "{}: no text content",
                source_id
            )));
        }
        debug!("Read {} bytes of text from {}", text.len(), source_id);
        Ok(FinancialDocument::new(source_id, text))
    }
}

static PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*--- Page \d+ ---[ \t]*$").expect("valid regex"));
static TABLE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*--- Table \d+ \(Page \d+\) ---[ \t]*$").expect("valid regex")
});
static HORIZONTAL_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x{a0}]+").expect("valid regex"));
static SPACED_DOLLAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\s+").expect("valid regex"));
static DIGIT_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d),(\d{3})").expect("valid regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n(\s*\n)+").expect("valid regex"));

/// Normalizes extracted text before prompting: drops page markers, labels tables,
/// collapses runs of spaces and blank lines, and strips thousands separators.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = PAGE_MARKER.replace_all(&text, "");
    let text = TABLE_MARKER.replace_all(&text, "TABLE:");
    let text = HORIZONTAL_SPACE.replace_all(&text, " ");
    let text = SPACED_DOLLAR.replace_all(&text, "$$");
    // Applied twice so "1,234,567" loses both separators despite overlapping matches.
    let text = DIGIT_COMMA.replace_all(&text, "$1$2");
    let text = DIGIT_COMMA.replace_all(&text, "$1$2");
    let text: String = text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

/// Company, year and report type guessed from the raw text. Passed to the model as
/// hints only; the validated record always comes from the model's answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHints {
    pub company_name: Option<String>,
    pub year: Option<i32>,
    pub report_type: Option<String>,
}

impl DocumentHints {
    /// Fields set on `self` win; the rest come from `scanned`.
    pub fn merged_over(&self, scanned: DocumentHints) -> DocumentHints {
        DocumentHints {
            company_name: self.company_name.clone().or(scanned.company_name),
            year: self.year.or(scanned.year),
            report_type: self.report_type.clone().or(scanned.report_type),
        }
    }
}

static COMPANY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?mi)^\s*company(?:\s+name)?:\s*([^\n]+?)\s*$",
        r"\b([A-Z][A-Za-z&.']*(?:[ \t]+[A-Z][A-Za-z&.']*)*[ \t]+(?:Inc|Corp|Corporation|LLC|Ltd|Company))\b",
        r"(?m)^[ \t]*([A-Z][A-Z&]+(?:[ \t]+[A-Z&]+)*)[ \t]+(?:FINANCIAL|ANNUAL|INCOME)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static YEAR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:for the (?:fiscal )?year ended|year ended)\s+(?:[a-z]+\s+\d{1,2},?\s+)?(\d{4})",
        r"(?i)december\s+31,?\s+(\d{4})",
        r"(?i)annual report\s+(\d{4})",
        r"(?i)(\d{4})\s+annual report",
        r"(?i)fiscal year\s+(\d{4})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static REPORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(income statement|profit\s+and\s+loss|p&l)",
        r"(?i)(balance sheet|statement of financial position)",
        r"(?i)(cash flow statement|statement of cash flows)",
        r"(?i)(annual report|quarterly report|10-k|10-q)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

pub fn scan_hints(text: &str) -> DocumentHints {
    let hints = DocumentHints {
        company_name: first_capture(&COMPANY_PATTERNS, text),
        year: first_capture(&YEAR_PATTERNS, text).and_then(|y| y.parse().ok()),
        report_type: first_capture(&REPORT_PATTERNS, text).map(|r| r.to_uppercase()),
    };
    debug!("Document hints: {:?}", hints);
    hints
}
