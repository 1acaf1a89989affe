//! Wikitext cleanup and infobox parameter parsing.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;
use vtwiki_core::{Channel, ChannelType};

/// Every newline and `<br>` variant is folded into this token.
pub const LINE_BREAK: char = '\n';

static REF_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<ref[^>]*/>|<ref[^>]*>.*?</ref\s*>").expect("ref regex"));
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static BR_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*/?\s*br\s*/?\s*>").expect("br regex"));
static PIPED_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|]*)\|([^\[\]]*)\]\]").expect("piped link regex")
});
static INTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]*)\]\]").expect("internal link regex"));
static EXTERNAL_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(https?://[^\s\]]+)(?:\s+([^\]]*))?\]").expect("external link regex")
});
static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s\]\[|<>"]+"#).expect("url regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("html tag regex"));

/// Strips refs and comments, folds line breaks and collapses `[[A|B]]` to
/// `[[B]]`. File links keep their options so the image name survives.
pub fn clean_markup(raw: &str) -> String {
    let text = REF_TAG.replace_all(raw, "");
    let text = HTML_COMMENT.replace_all(&text, "");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = BR_TAG.replace_all(&text, "\n");
    PIPED_LINK
        .replace_all(&text, |caps: &regex::Captures| {
            let target = caps[1].trim_start().to_ascii_lowercase();
            if target.starts_with("file:") || target.starts_with("image:") {
                caps[0].to_string()
            } else {
                format!("[[{}]]", &caps[2])
            }
        })
        .into_owned()
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(' ', "_")
}

/// Finds the `{{<template> ...}}` block whose name matches `template`
/// (case-insensitive, spaces and underscores interchangeable) and returns
/// its top-level `key=value` parameters.
pub fn infobox_params(cleaned: &str, template: &str) -> BTreeMap<String, String> {
    let wanted = normalize_key(template);
    template_params(cleaned, |name| name == wanted)
}

/// Parameters of the first template whose name starts with `infobox`.
pub fn first_infobox_params(cleaned: &str) -> BTreeMap<String, String> {
    template_params(cleaned, |name| name.starts_with("infobox"))
}

fn template_params(cleaned: &str, matches: impl Fn(&str) -> bool) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut search_from = 0;
    let body = loop {
        let Some(offset) = cleaned[search_from..].find("{{") else {
            return params;
        };
        let start = search_from + offset;
        let name_end = cleaned[start + 2..]
            .find(['|', '}', '\n'])
            .map(|i| start + 2 + i)
            .unwrap_or(cleaned.len());
        if matches(&normalize_key(&cleaned[start + 2..name_end])) {
            break template_body(cleaned, start + 2);
        }
        search_from = start + 2;
    };

    for segment in split_top_level(body).into_iter().skip(1) {
        if let Some((key, value)) = segment.split_once('=') {
            params.insert(normalize_key(key), value.trim().to_string());
        }
    }
    params
}

/// Text between the opening `{{` (exclusive, at `from`) and its matching `}}`.
fn template_body(text: &str, from: usize) -> &str {
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    let mut i = from;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'{', b'{') => {
                depth += 1;
                i += 2;
            }
            (b'}', b'}') => {
                depth -= 1;
                if depth == 0 {
                    return &text[from..i];
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    &text[from..]
}

/// Splits on `|` that is not nested inside `{{ }}` or `[[ ]]`.
fn split_top_level(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let pair = bytes.get(i + 1).map(|next| (bytes[i], *next));
        match pair {
            Some((b'{', b'{')) | Some((b'[', b'[')) => {
                depth += 1;
                i += 2;
                continue;
            }
            Some((b'}', b'}')) | Some((b']', b']')) => {
                depth = depth.saturating_sub(1);
                i += 2;
                continue;
            }
            _ => {}
        }
        if bytes[i] == b'|' && depth == 0 {
            parts.push(&body[start..i]);
            start = i + 1;
        }
        i += 1;
    }
    parts.push(&body[start..]);
    parts
}

/// Turns link markup into display text and drops HTML tags.
pub fn plain_text(value: &str) -> String {
    let text = EXTERNAL_LINK.replace_all(value, |caps: &regex::Captures| {
        caps.get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| caps[1].to_string())
    });
    let text = INTERNAL_LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    text.replace("'''", "").replace("''", "").trim().to_string()
}

fn list_lines(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(LINE_BREAK)
        .map(|line| line.trim().trim_start_matches(['*', '#']).trim())
        .filter(|line| !line.is_empty())
}

/// One plain-text item per line; empty items dropped.
pub fn parse_list(value: &str) -> Vec<String> {
    list_lines(value)
        .map(plain_text)
        .filter(|item| !item.is_empty())
        .collect()
}

pub fn parse_text(value: &str) -> Option<String> {
    let items = parse_list(value);
    if items.is_empty() {
        None
    } else {
        Some(items.join(" "))
    }
}

/// First external URL on each line.
pub fn parse_links(value: &str) -> Vec<String> {
    list_lines(value)
        .filter_map(|line| BARE_URL.find(line).map(|m| m.as_str().to_string()))
        .collect()
}

/// Classifies a channel URL by the second-level domain of its host.
pub fn classify_channel_url(link: &str) -> ChannelType {
    let Ok(url) = Url::parse(link) else {
        return ChannelType::Other;
    };
    let Some(host) = url.host_str() else {
        return ChannelType::Other;
    };
    let labels = host.split('.').collect::<Vec<_>>();
    if labels.len() < 2 {
        return ChannelType::Other;
    }
    ChannelType::from_second_level_domain(labels[labels.len() - 2])
}

pub fn parse_channels(value: &str) -> Vec<Channel> {
    parse_links(value)
        .into_iter()
        .map(|link| Channel::unresolved(classify_channel_url(&link), link))
        .collect()
}

/// File name from an `image` value such as `[[File:Foo.png|200px]]`.
pub fn parse_image_name(value: &str) -> Option<String> {
    let first = list_lines(value).next()?;
    let inner = first
        .trim_start_matches("[[")
        .split(['|', ']'])
        .next()
        .unwrap_or_default();
    let name = inner
        .strip_prefix("File:")
        .or_else(|| inner.strip_prefix("Image:"))
        .unwrap_or(inner)
        .trim();
    if name.is_empty() || name.contains('<') || name.contains("{{") {
        None
    } else {
        Some(name.to_string())
    }
}
