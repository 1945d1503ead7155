//! Diacritic-insensitive text normalization and token extraction.
//!
//! Every function here is total: empty or unrecognizable input yields an
//! empty result, never an error. Portal labels arrive with inconsistent
//! accents, casing and punctuation ("Zóna 204", "ZONA-204", "zona  204"),
//! so all comparisons in the workspace go through [`normalize`] first.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static TOWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:torre|tower|bloque|block|edificio|t)\s+([a-z])\b").expect("valid tower regex")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").expect("valid email regex")
});

/// Lowercases, strips diacritics, turns punctuation into spaces, collapses
/// whitespace and trims.
///
/// ```
/// use ispflow_core::text::normalize;
/// assert_eq!(normalize("CTO1 - Zóna 204"), "cto1 zona 204");
/// ```
#[must_use]
pub fn normalize(input: &str) -> String {
    let folded: String = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace tokens of the normalized string.
#[must_use]
pub fn tokens(input: &str) -> Vec<String> {
    normalize(input)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// All ASCII digit runs in `input`, in order of appearance.
#[must_use]
pub fn extract_numeric_tokens(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(str::to_owned)
        .collect()
}

/// First letter following a tower-like marker ("Torre B", "tower-c").
#[must_use]
pub fn extract_tower_letter(input: &str) -> Option<char> {
    let normalized = normalize(input);
    TOWER_RE
        .captures(&normalized)
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().chars().next())
}

/// First email-looking substring, lowercased.
#[must_use]
pub fn extract_email(input: &str) -> Option<String> {
    EMAIL_RE.find(input).map(|m| m.as_str().to_lowercase())
}

/// Canonical form of a national identifier: separator dots and whitespace
/// removed, trailing check letter uppercased (`12.345.678-k` → `12345678-K`).
#[must_use]
pub fn normalize_identifier(input: &str) -> String {
    let mut out: String = input
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .collect();
    if let Some(last) = out.pop() {
        if last.is_alphabetic() {
            out.extend(last.to_uppercase());
        } else {
            out.push(last);
        }
    }
    out
}

/// Normalized tokens of a form field name or update key.
///
/// Splits on `_`, `-`, `.`, brackets and camelCase boundaries so that
/// `tecnicoName`, `servicio-tecnico` and `tecnico_name` share the token
/// `tecnico`.
#[must_use]
pub fn field_tokens(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 8);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() && prev_lower {
            spaced.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        spaced.push(c);
    }
    normalize(&spaced)
}
