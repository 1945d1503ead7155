//! Token-overlap similarity with location-aware bonuses.
//!
//! [`score`] is the base measure (containment shortcut, then Jaccard over
//! normalized tokens). [`domain_bonus`] adds the adjustments that make
//! network-label matching work: shared numeric ids, matching tower letters
//! and shared location keywords, minus a penalty when the only overlap is a
//! generic structural word such as "zona" or "vlan".
//!
//! Acceptance thresholds are asymmetric on purpose: client-record lookup
//! uses plain [`score`] against [`RECORD_MATCH_THRESHOLD`] because a false
//! positive means acting on the wrong customer, while dropdown resolution
//! takes the best bonused score because the option set is small and closed.
//! Location bonuses never apply to person names: "villa" is a surname as
//! often as it is a place.

use std::collections::BTreeSet;

use crate::text::{extract_numeric_tokens, extract_tower_letter, normalize};

/// Minimum plain [`score`] for matching a client name against stored records.
pub const RECORD_MATCH_THRESHOLD: f64 = 0.6;

/// Minimum score for a dropdown match on a field that must not default
/// (technician, plan).
pub const REQUIRED_OPTION_THRESHOLD: f64 = 0.5;

const NUMERIC_BONUS: f64 = 0.4;
const TOWER_BONUS: f64 = 0.6;
const LOCATION_KEYWORD_BONUS: f64 = 0.6;
const GENERIC_ONLY_PENALTY: f64 = 0.25;

const LOCATION_KEYWORDS: &[&str] = &[
    "villa",
    "poblacion",
    "sector",
    "condominio",
    "parcela",
    "lote",
    "pasaje",
];

const GENERIC_KEYWORDS: &[&str] = &[
    "zona",
    "vlan",
    "cto",
    "nap",
    "ap",
    "odf",
    "sectorial",
    "torre",
    "plan",
];

/// Set of normalized whitespace tokens.
#[must_use]
pub fn token_set(input: &str) -> BTreeSet<String> {
    normalize(input)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Base similarity in `[0, 1]`.
///
/// Returns `1.0` when the normalized candidate contains the normalized
/// target as a whole-word run, `0.0` when either side is empty, and the
/// Jaccard index of the two token sets otherwise.
#[must_use]
pub fn score(target: &str, candidate: &str) -> f64 {
    let t = normalize(target);
    let c = normalize(candidate);
    if t.is_empty() || c.is_empty() {
        return 0.0;
    }
    if format!(" {c} ").contains(&format!(" {t} ")) {
        return 1.0;
    }
    jaccard(&token_set(&t), &token_set(&c))
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Domain-specific adjustment layered on top of [`score`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn domain_bonus(target: &str, candidate: &str) -> f64 {
    let mut bonus = 0.0;

    let target_nums: BTreeSet<String> = extract_numeric_tokens(target).into_iter().collect();
    let candidate_nums: BTreeSet<String> =
        extract_numeric_tokens(candidate).into_iter().collect();
    if target_nums.intersection(&candidate_nums).next().is_some() {
        bonus += NUMERIC_BONUS;
    }

    if let (Some(a), Some(b)) = (extract_tower_letter(target), extract_tower_letter(candidate)) {
        if a == b {
            bonus += TOWER_BONUS;
        }
    }

    let t = token_set(target);
    let c = token_set(candidate);
    let shared: Vec<&String> = t.intersection(&c).collect();

    let shared_locations = shared
        .iter()
        .filter(|tok| LOCATION_KEYWORDS.contains(&tok.as_str()))
        .count();
    bonus += LOCATION_KEYWORD_BONUS * shared_locations as f64;

    if !shared.is_empty()
        && shared
            .iter()
            .all(|tok| GENERIC_KEYWORDS.contains(&tok.as_str()))
    {
        bonus -= GENERIC_ONLY_PENALTY;
    }

    bonus
}

/// [`score`] plus [`domain_bonus`].
#[must_use]
pub fn scored(target: &str, candidate: &str) -> f64 {
    score(target, candidate) + domain_bonus(target, candidate)
}

/// Index and plain [`score`] of the best record name at or above
/// `threshold`. Earlier candidates win ties.
#[must_use]
pub fn best_record_match<'a, I>(target: &str, candidates: I, threshold: f64) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .enumerate()
        .map(|(idx, candidate)| (idx, score(target, candidate)))
        .filter(|(_, s)| *s >= threshold)
        .fold(None, |best: Option<(usize, f64)>, (idx, s)| match best {
            Some((_, best_score)) if best_score >= s => best,
            _ => Some((idx, s)),
        })
}
