//! Numeric infobox facts (age, height, weight).

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;
use vtwiki_core::Measurement;

static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.[\d.]*)?").expect("decimal regex"));

/// Reads the first decimal-looking substring of `text`, allowing thousands
/// separators.
pub fn parse_measurement(text: &str) -> Measurement {
    let text = text.trim();
    if text.is_empty() {
        return Measurement::Absent;
    }
    let Some(found) = DECIMAL.find(text) else {
        trace!(text, "measurement has no number");
        return Measurement::Uncountable;
    };
    let digits = found.as_str().replace(',', "");
    match digits.trim_end_matches('.').parse::<f64>() {
        Ok(value) if value.is_finite() => Measurement::Value(value),
        _ => {
            trace!(text, "measurement failed to parse");
            Measurement::Invalid
        }
    }
}
