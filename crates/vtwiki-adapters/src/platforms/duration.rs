//! Platform duration formats. Malformed input yields `None`.

use std::sync::LazyLock;

use chrono::TimeDelta;
use regex::Regex;
use tracing::trace;

static ISO_8601: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$")
        .expect("iso duration regex")
});
static UNIT_SUFFIXED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$").expect("twitch duration regex")
});

fn group(caps: &regex::Captures, index: usize) -> i64 {
    caps.get(index)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .unwrap_or(0)
}

/// `PT1H2M3S`, as used by YouTube.
pub fn parse_iso8601(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    let caps = ISO_8601.captures(text).filter(|_| text.len() > 1 && text != "PT");
    let Some(caps) = caps else {
        trace!(text, "unparseable ISO 8601 duration");
        return None;
    };
    let seconds = caps
        .get(4)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(
        TimeDelta::days(group(&caps, 1))
            + TimeDelta::hours(group(&caps, 2))
            + TimeDelta::minutes(group(&caps, 3))
            + TimeDelta::milliseconds((seconds * 1000.0).round() as i64),
    )
}

/// `1h2m3s`, as used by Twitch.
pub fn parse_unit_suffixed(text: &str) -> Option<TimeDelta> {
    let text = text.trim();
    let caps = UNIT_SUFFIXED.captures(text).filter(|_| !text.is_empty());
    let Some(caps) = caps else {
        trace!(text, "unparseable unit-suffixed duration");
        return None;
    };
    Some(
        TimeDelta::hours(group(&caps, 1))
            + TimeDelta::minutes(group(&caps, 2))
            + TimeDelta::seconds(group(&caps, 3)),
    )
}

/// `mm:ss` or `h:mm:ss`, as used by Bilibili.
pub fn parse_clock(text: &str) -> Option<TimeDelta> {
    let parts = text
        .trim()
        .split(':')
        .map(|part| part.parse::<i64>().ok())
        .collect::<Option<Vec<_>>>();
    let seconds = match parts.as_deref() {
        Some([m, s]) => m * 60 + s,
        Some([h, m, s]) => h * 3600 + m * 60 + s,
        _ => {
            trace!(text, "unparseable clock duration");
            return None;
        }
    };
    Some(TimeDelta::seconds(seconds))
}
