// Prompt text for the two model calls: field extraction and trend summary.

use crate::comparator::ComparisonResult;
use crate::document::DocumentHints;
use crate::error::Result;
use crate::schema::{FieldSchema, FieldSpec, COMPANY_FIELD, YEAR_FIELD};
use serde::Serialize;

pub const EXTRACTION_INSTRUCTIONS: &str = r#"
You are a Financial Data Extraction Specialist. Extract structured values from the document text below.

## EXTRACTION RULES
1. Extract ONLY numerical values for numeric fields (no currency symbols, no words).
2. All amounts are in actual currency units, not thousands or millions.
   - If a value is stated in thousands, multiply by 1,000.
   - If a value is stated in millions, multiply by 1,000,000.
3. Use null for any value you cannot find or are uncertain about. Never guess.
4. Report what the document states, even when totals look inconsistent.
5. Percentages are written in percent units (12.5 means 12.5%).

## OUTPUT FORMAT
Return EXACTLY ONE JSON object and nothing else: no markdown, no commentary.
Every field listed below must appear as a key. Each value is either:
- a bare value (number, string, or null), or
- an object {"value": <number|string|null>, "source": "<the line or label it came from>"}
You may add a top-level "confidence" key between 0.0 and 1.0.
"#;

pub const SUMMARY_INSTRUCTIONS: &str = r#"
You are a financial analyst. Write a year-over-year performance summary using ONLY the validated figures provided.

## RULES
- Do not invent numbers. Every figure you cite must appear in the table.
- `percent_delta` is already expressed in percent; `classification` already accounts for whether a decrease is good (costs) or bad (revenue).
- Fields marked `missing_in_period` were only reported in one year; mention them only if material.
- Fields marked `new_or_undefined` had a zero baseline, so no growth rate exists.

## STRUCTURE
1. REVENUE ANALYSIS: growth or decline and its size.
2. PROFITABILITY ANALYSIS: gross, operating and net results and margin changes.
3. KEY INSIGHTS: the most significant positive changes and the areas of concern.
4. OVERALL ASSESSMENT: two or three sentences.

Respond in plain prose with short section headings.
"#;

fn describe_field(field: &FieldSpec) -> String {
    let mut line = format!("- \"{}\" ({}", field.name, field.kind.label());
    if field.required {
        line.push_str(", required");
    }
    if let Some(derived) = &field.derived {
        line.push_str(&format!(", should equal {}", derived.formula.describe()));
    }
    line.push(')');
    if let Some(description) = &field.description {
        line.push_str(&format!(": look for {}", description));
    }
    line
}

/// Builds the extraction request for `schema`, embedding the document text verbatim.
pub fn build_extraction_prompt(
    schema: &FieldSchema,
    document_text: &str,
    hints: &DocumentHints,
) -> String {
    let mut prompt = String::from(EXTRACTION_INSTRUCTIONS);

    prompt.push_str(&format!(
        "\n## FIELDS ({} statement, schema version {})\n",
        schema.name, schema.version
    ));
    prompt.push_str(&format!(
        "- \"{}\" (text, required): exact company name from the document\n",
        COMPANY_FIELD
    ));
    prompt.push_str(&format!(
        "- \"{}\" (year, required): fiscal year of the statement as YYYY\n",
        YEAR_FIELD
    ));
    for field in &schema.fields {
        prompt.push_str(&describe_field(field));
        prompt.push('\n');
    }

    if hints.company_name.is_some() || hints.year.is_some() || hints.report_type.is_some() {
        prompt.push_str("\n## HINTS (verify against the document)\n");
        if let Some(company) = &hints.company_name {
            prompt.push_str(&format!("- Company: {}\n", company));
        }
        if let Some(year) = hints.year {
            prompt.push_str(&format!("- Year: {}\n", year));
        }
        if let Some(report_type) = &hints.report_type {
            prompt.push_str(&format!("- Report type: {}\n", report_type));
        }
    }

    prompt.push_str("\n## DOCUMENT TEXT\n<<<\n");
    prompt.push_str(document_text);
    prompt.push_str("\n>>>\n\nReturn only the JSON object:\n");
    prompt
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    field: &'a str,
    baseline: Option<f64>,
    current: Option<f64>,
    absolute_delta: Option<f64>,
    percent_delta: Option<f64>,
    classification: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Builds the summary request from validated, already-compared figures only.
pub fn build_summary_prompt(result: &ComparisonResult) -> Result<String> {
    let rows: Vec<SummaryRow> = result
        .fields
        .values()
        .map(|c| SummaryRow {
            field: &c.field,
            baseline: c.baseline,
            current: c.current,
            absolute_delta: c.absolute_delta,
            percent_delta: c.percent_delta.map(|p| round2(p * 100.0)),
            classification: c.classification.to_string(),
        })
        .collect();
    let table = serde_json::to_string_pretty(&rows)?;

    Ok(format!(
        "{}\n## COMPANY\n{}\n\n## PERIODS\nBaseline: {}\nCurrent: {}\nFlat threshold: +/-{}%\n\n## FIGURES\n{}\n",
        SUMMARY_INSTRUCTIONS,
        result.company_name,
        result.baseline_year(),
        result.current_year(),
        round2(result.flat_threshold * 100.0),
        table
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{compare, ComparisonConfig};
    use crate::record::FinancialRecord;
    use std::collections::BTreeMap;

    #[test]
    fn test_extraction_prompt_lists_every_field() {
        let schema = FieldSchema::general();
        let prompt = build_extraction_prompt(
            &schema,
            "Revenue 1,000",
            &DocumentHints {
                company_name: Some("ACME Corp".to_string()),
                year: Some(2023),
                report_type: None,
            },
        );

        for field in &schema.fields {
            assert!(prompt.contains(&format!("\"{}\"", field.name)));
        }
        assert!(prompt.contains("\"company_name\""));
        assert!(prompt.contains("should equal revenue - cogs"));
        assert!(prompt.contains("- Company: ACME Corp"));
        assert!(prompt.contains("Revenue 1,000"));
    }

    #[test]
    fn test_summary_prompt_contains_structured_deltas() {
        let record = |year, revenue| FinancialRecord {
            company_name: "Acme Corp".to_string(),
            year,
            schema_name: "general".to_string(),
            schema_version: "1".to_string(),
            values: BTreeMap::from([("revenue".to_string(), revenue)]),
            ..FinancialRecord::default()
        };
        let result = compare(
            &record(2022, 3_000_000.0),
            &record(2023, 4_000_000.0),
            &FieldSchema::general(),
            &ComparisonConfig::default(),
        )
        .unwrap();

        let prompt = build_summary_prompt(&result).unwrap();
        assert!(prompt.contains("Acme Corp"));
        assert!(prompt.contains("Baseline: 2022"));
        assert!(prompt.contains("\"percent_delta\": 33.33"));
        assert!(prompt.contains("\"classification\": \"improved\""));
    }
}
