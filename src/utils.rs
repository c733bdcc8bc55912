use once_cell::sync::Lazy;
use regex::Regex;

static AMOUNT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^
        (?P<sign>[-+\x{2212}])?\s*
        (?:usd|us\$|\$|€|£)?\s*
        (?P<inner_sign>[-\x{2212}])?\s*
        (?P<digits>\d[\d,]*(?:\.\d+)?|\.\d+)
        \s*(?P<scale>thousand|k|million|mn|mm|m|billion|bn|b)?
        \s*(?P<percent>%)?
        $",
    )
    .expect("amount pattern is valid")
});

static YEAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:fy\s*)?(\d{4})(?:\.0+)?$").expect("year pattern is valid"));

/// Coerces a model-produced amount string into a number.
///
/// Accepts currency symbols, thousands separators, accounting parentheses for
/// negatives (`(1,234)`), and scale words such as `4.2 million` or `850k`.
/// A trailing percent sign is rejected; see [`parse_percentage`].
pub fn parse_amount(raw: &str) -> Option<f64> {
    parse_number(raw, false)
}

/// Like [`parse_amount`], but also accepts a trailing `%` (`"12.5%"` is 12.5).
pub fn parse_percentage(raw: &str) -> Option<f64> {
    parse_number(raw, true)
}

fn parse_number(raw: &str, allow_percent: bool) -> Option<f64> {
    let mut text = raw.trim();
    let mut negative = false;

    if text.starts_with('(') || text.ends_with(')') {
        if !(text.starts_with('(') && text.ends_with(')')) || text.len() < 3 {
            return None;
        }
        negative = true;
        text = text[1..text.len() - 1].trim();
    }

    let caps = AMOUNT_PATTERN.captures(text)?;
    if caps.name("percent").is_some() && !allow_percent {
        return None;
    }
    let signs = [caps.name("sign"), caps.name("inner_sign")];
    for sign in signs.iter().flatten() {
        if sign.as_str() != "+" {
            if negative {
                return None;
            }
            negative = true;
        }
    }
    if caps.name("sign").is_some() && caps.name("inner_sign").is_some() {
        return None;
    }

    let digits = caps.name("digits")?.as_str().replace(',', "");
    let mut value: f64 = digits.parse().ok()?;

    if let Some(scale) = caps.name("scale") {
        value *= match scale.as_str().to_lowercase().as_str() {
            "thousand" | "k" => 1_000.0,
            "million" | "mn" | "mm" | "m" => 1_000_000.0,
            _ => 1_000_000_000.0,
        };
    }

    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Parses `2023`, `"2023"`, `"FY2023"` or `"2023.0"` into a year.
pub fn parse_year(raw: &str) -> Option<i32> {
    let lowered = raw.trim().to_lowercase();
    YEAR_PATTERN
        .captures(&lowered)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Trims and collapses internal whitespace: "ACME  Corp " becomes "ACME Corp".
pub fn normalize_company_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lookup form of a company name. "ACME CORP", "Acme  Corp" and "acme corp" share one key.
pub fn company_key(name: &str) -> String {
    normalize_company_name(name).to_lowercase()
}

/// Inclusive tolerance check: `|extracted - recomputed| <= max(relative * |recomputed|, floor)`.
pub fn within_tolerance(extracted: f64, recomputed: f64, relative: f64, floor: f64) -> bool {
    let allowed = (relative * recomputed.abs()).max(floor);
    let difference = (extracted - recomputed).abs();
    // Absorb representation error so a difference of exactly the tolerance stays inside.
    difference <= allowed + allowed * 1e-9
}

/// Relative change as a fraction of the baseline magnitude; undefined for a zero baseline.
pub fn percent_change(baseline: f64, current: f64) -> Option<f64> {
    if baseline == 0.0 {
        None
    } else {
        Some((current - baseline) / baseline.abs())
    }
}

/// Cuts `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_plain_and_formatted() {
        assert_eq!(parse_amount("3000000"), Some(3_000_000.0));
        assert_eq!(parse_amount("$3,000,000"), Some(3_000_000.0));
        assert_eq!(parse_amount(" 1,234.50 "), Some(1_234.5));
        assert_eq!(parse_amount("USD 950"), Some(950.0));
    }

    #[test]
    fn test_percent_sign_only_for_percentages() {
        assert_eq!(parse_amount("12%"), None);
        assert_eq!(parse_amount("$1.2 million %"), None);
        assert_eq!(parse_percentage("12.5%"), Some(12.5));
        assert_eq!(parse_percentage("(3.5 %)"), Some(-3.5));
        assert_eq!(parse_percentage("40"), Some(40.0));
    }

    #[test]
    fn test_company_key_ignores_case_and_spacing() {
        assert_eq!(company_key("ACME CORP"), "acme corp");
        assert_eq!(company_key("  Acme \t Corp "), "acme corp");
        assert_eq!(company_key("acme corp"), company_key("Acme Corp"));
    }

    #[test]
    fn test_parse_amount_negatives() {
        assert_eq!(parse_amount("(1,234)"), Some(-1_234.0));
        assert_eq!(parse_amount("-$500"), Some(-500.0));
        assert_eq!(parse_amount("$-500"), Some(-500.0));
        assert_eq!(parse_amount("\u{2212}42"), Some(-42.0));
        assert_eq!(parse_amount("(-5)"), None);
        assert_eq!(parse_amount("(5"), None);
    }

    #[test]
    fn test_parse_amount_scale_words() {
        assert_eq!(parse_amount("4.2 million"), Some(4_200_000.0));
        assert_eq!(parse_amount("$850k"), Some(850_000.0));
        assert_eq!(parse_amount("1.5bn"), Some(1_500_000_000.0));
    }

    #[test]
    fn test_parse_amount_rejects_text() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("about three million"), None);
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount("12 apples"), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("2023"), Some(2023));
        assert_eq!(parse_year("FY2023"), Some(2023));
        assert_eq!(parse_year("fy 2022"), Some(2022));
        assert_eq!(parse_year("2023.0"), Some(2023));
        assert_eq!(parse_year("23"), None);
        assert_eq!(parse_year("2023-12-31"), None);
    }

    #[test]
    fn test_within_tolerance_is_inclusive() {
        assert!(within_tolerance(101_000.0, 100_000.0, 0.01, 0.0));
        assert!(within_tolerance(100_990.0, 100_000.0, 0.01, 0.0));
        assert!(!within_tolerance(101_010.0, 100_000.0, 0.01, 0.0));
        assert!(within_tolerance(500.0, 0.0, 0.01, 1_000.0));
        assert!(!within_tolerance(1.0, 0.0, 0.01, 0.0));
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(2_000_000.0, 3_000_000.0), Some(0.5));
        assert_eq!(percent_change(-100.0, -50.0), Some(0.5));
        assert_eq!(percent_change(0.0, 10.0), None);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("€€€€", 2), "€€");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
