//! Resolving a human label to a dropdown option value.
//!
//! Resolution order: correction table, exact normalized text, structured
//! scoring, then the first real option. Technician and plan callers must
//! check [`Resolution::is_confident`]; zone, router and AP callers accept a
//! fallback so an activation is not blocked by a mislabeled zone.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use ispflow_core::similarity::{scored, REQUIRED_OPTION_THRESHOLD};
use ispflow_core::text::{extract_tower_letter, field_tokens, normalize, tokens};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::corrections::CorrectionTables;

static ZONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bz(?:ona|one)?\s?(\d+)\b").expect("valid zone regex"));
static ENCLOSURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:cto|nap|caja|mufa|odf)\s?(\d+)\b").expect("valid enclosure regex")
});

const ZONE_META_BONUS: f64 = 0.5;
const ENCLOSURE_META_BONUS: f64 = 0.5;
const TOWER_META_BONUS: f64 = 0.3;
const TECHNICIAN_PREFIX_BONUS: f64 = 0.3;
const AP_FAMILY_BONUS: f64 = 0.2;

const AP_FAMILIES: &[&str] = &["ap", "nap", "sectorial"];

/// One `<option>` of a select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionCandidate {
    pub value: String,
    pub text: String,
    /// Extra attributes (`data-*` and the like).
    pub attrs: BTreeMap<String, String>,
}

impl OptionCandidate {
    #[must_use]
    pub fn new(value: &str, text: &str) -> Self {
        Self {
            value: value.to_string(),
            text: text.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        crate::form::is_placeholder_text(&self.text)
    }
}

/// What kind of reference a select holds; picks the correction table and
/// the per-domain bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionDomain {
    Technician,
    Plan,
    Zone,
    Router,
    Ap,
    Generic,
}

impl std::fmt::Display for OptionDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionDomain::Technician => write!(f, "technician"),
            OptionDomain::Plan => write!(f, "plan"),
            OptionDomain::Zone => write!(f, "zone"),
            OptionDomain::Router => write!(f, "router"),
            OptionDomain::Ap => write!(f, "ap"),
            OptionDomain::Generic => write!(f, "generic"),
        }
    }
}

impl OptionDomain {
    /// Whether a fallback resolution is acceptable for this domain.
    #[must_use]
    pub fn allows_fallback(self) -> bool {
        matches!(self, OptionDomain::Zone | OptionDomain::Router | OptionDomain::Ap)
    }

    /// Best-effort domain for a form field name.
    #[must_use]
    pub fn infer(field_name: &str) -> Self {
        let field = field_tokens(field_name);
        let has = |keys: &[&str]| field.split_whitespace().any(|t| keys.contains(&t));
        if field.split_whitespace().any(|t| t.starts_with("tecnic") || t.starts_with("technic")) {
            OptionDomain::Technician
        } else if has(&["plan"]) {
            OptionDomain::Plan
        } else if has(&["zona", "zone"]) {
            OptionDomain::Zone
        } else if has(&["router", "equipo"]) {
            OptionDomain::Router
        } else if has(&["ap", "nap", "sectorial"]) {
            OptionDomain::Ap
        } else {
            OptionDomain::Generic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Correction,
    ExactText,
    Scored,
    Fallback,
}

/// The chosen option and how it was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub value: String,
    pub text: String,
    pub kind: MatchKind,
    pub score: f64,
}

impl Resolution {
    /// True for table/exact hits and scored matches at or above
    /// [`REQUIRED_OPTION_THRESHOLD`].
    #[must_use]
    pub fn is_confident(&self) -> bool {
        match self.kind {
            MatchKind::Correction | MatchKind::ExactText => true,
            MatchKind::Scored => self.score >= REQUIRED_OPTION_THRESHOLD,
            MatchKind::Fallback => false,
        }
    }

    fn from_candidate(candidate: &OptionCandidate, kind: MatchKind, score: f64) -> Self {
        Self {
            value: candidate.value.clone(),
            text: candidate.text.clone(),
            kind,
            score,
        }
    }
}

/// Network-location numbers embedded in a label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaSignature {
    pub zone: Option<u32>,
    pub enclosure: Option<u32>,
    pub tower: Option<char>,
}

fn capture_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

fn both_differ<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x != y)
}

fn both_equal<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(x), Some(y)) if x == y)
}

impl MetaSignature {
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let normalized = normalize(label);
        Self {
            zone: capture_number(&ZONE_RE, &normalized),
            enclosure: capture_number(&ENCLOSURE_RE, &normalized),
            tower: extract_tower_letter(&normalized),
        }
    }

    /// True when both sides name a zone, enclosure or tower and they differ.
    #[must_use]
    pub fn conflicts(&self, other: &Self) -> bool {
        both_differ(self.zone, other.zone)
            || both_differ(self.enclosure, other.enclosure)
            || both_differ(self.tower, other.tower)
    }

    #[must_use]
    pub fn overlap_bonus(&self, other: &Self) -> f64 {
        let mut bonus = 0.0;
        if both_equal(self.zone, other.zone) {
            bonus += ZONE_META_BONUS;
        }
        if both_equal(self.enclosure, other.enclosure) {
            bonus += ENCLOSURE_META_BONUS;
        }
        if both_equal(self.tower, other.tower) {
            bonus += TOWER_META_BONUS;
        }
        bonus
    }
}

fn per_domain_bonus(domain: OptionDomain, target: &str, candidate: &str) -> f64 {
    match domain {
        OptionDomain::Technician => {
            let candidate_tokens = tokens(candidate);
            let target_tokens = tokens(target);
            let all_prefixed = !target_tokens.is_empty()
                && target_tokens
                    .iter()
                    .all(|t| candidate_tokens.iter().any(|c| c.starts_with(t.as_str())));
            if all_prefixed {
                TECHNICIAN_PREFIX_BONUS
            } else {
                0.0
            }
        }
        OptionDomain::Ap => {
            let family = |s: &str| {
                tokens(s)
                    .into_iter()
                    .next()
                    .filter(|first| AP_FAMILIES.contains(&first.as_str()))
            };
            match (family(target), family(candidate)) {
                (Some(a), Some(b)) if a == b => AP_FAMILY_BONUS,
                _ => 0.0,
            }
        }
        OptionDomain::Plan | OptionDomain::Zone | OptionDomain::Router | OptionDomain::Generic => {
            0.0
        }
    }
}

/// Picks the option that best represents `target`.
///
/// Returns `None` only when every option is a placeholder or has an empty
/// value.
#[must_use]
pub fn resolve_option(
    options: &[OptionCandidate],
    target: &str,
    domain: OptionDomain,
    corrections: &CorrectionTables,
) -> Option<Resolution> {
    let usable: Vec<&OptionCandidate> = options
        .iter()
        .filter(|o| !o.is_placeholder() && !o.value.trim().is_empty())
        .collect();
    let fallback = usable.first()?;

    if normalize(target).is_empty() {
        return Some(Resolution::from_candidate(fallback, MatchKind::Fallback, 0.0));
    }

    let corrected = corrections.lookup(domain, target);
    let wanted = corrected.unwrap_or(target);
    let wanted_norm = normalize(wanted);

    if let Some(hit) = usable.iter().find(|o| normalize(&o.text) == wanted_norm) {
        let kind = if corrected.is_some() {
            MatchKind::Correction
        } else {
            MatchKind::ExactText
        };
        return Some(Resolution::from_candidate(hit, kind, 1.0));
    }

    if let Some(hit) = usable.iter().find(|o| o.value == target.trim()) {
        return Some(Resolution::from_candidate(hit, MatchKind::ExactText, 1.0));
    }

    let wanted_meta = MetaSignature::parse(wanted);
    let best = usable
        .iter()
        .filter_map(|o| {
            let meta = MetaSignature::parse(&o.text);
            if wanted_meta.conflicts(&meta) {
                return None;
            }
            let total = scored(wanted, &o.text)
                + wanted_meta.overlap_bonus(&meta)
                + per_domain_bonus(domain, wanted, &o.text);
            (total > 0.0).then_some((*o, total))
        })
        .fold(None, |best: Option<(&OptionCandidate, f64)>, (o, s)| match best {
            Some((_, best_score)) if best_score >= s => best,
            _ => Some((o, s)),
        });

    if let Some((hit, score)) = best {
        tracing::debug!(%domain, label = target, option = %hit.text, score, "scored option match");
        return Some(Resolution::from_candidate(hit, MatchKind::Scored, score));
    }

    tracing::debug!(%domain, label = target, option = %fallback.text, "no option matched; using fallback");
    Some(Resolution::from_candidate(fallback, MatchKind::Fallback, 0.0))
}

#[cfg(test)]
#[path = "options_test.rs"]
mod tests;
