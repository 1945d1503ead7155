//! Form snapshots, select options, validation markup and partial updates.
//!
//! A [`FormSnapshot`] is what a browser would submit for a form right now:
//! every named, non-file, non-button control with its current value. The
//! workflows fetch a form, take its snapshot, overlay only the fields they
//! mean to change and post the whole thing back, so the portal never sees
//! a field it rendered disappear.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use ispflow_core::similarity;
use ispflow_core::text::field_tokens;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PortalError;
use crate::options::OptionCandidate;

static FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").expect("valid selector"));
static CONTROLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input, select, textarea").expect("valid selector"));
static OPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("option").expect("valid selector"));
static SELECT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("select").expect("valid selector"));
static FILE_INPUT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[type=file]").expect("valid selector"));
static ERROR_ITEMS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".errorlist li").expect("valid selector"));
static ERROR_LIST: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".errorlist").expect("valid selector"));

const SKIPPED_INPUT_TYPES: &[&str] = &["submit", "button", "reset", "image", "file"];

/// Minimum score for a fuzzy key-to-field mapping.
const FIELD_MATCH_THRESHOLD: f64 = 0.5;

/// Ordered name/value pairs a browser would submit for one form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSnapshot {
    fields: Vec<(String, String)>,
    /// Every named control, including ones that submit nothing right now
    /// (unchecked boxes, empty multi-selects, disabled inputs).
    controls: Vec<String>,
    action: Option<String>,
}

impl FormSnapshot {
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            controls: Vec::new(),
            action: None,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    /// Replaces the value of `name`, collapsing repeated entries, or appends
    /// it when absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter().position(|(k, _)| k == name) {
            Some(first) => {
                self.fields[first].1 = value;
                let mut idx = 0;
                self.fields.retain(|(k, _)| {
                    let keep = idx <= first || k != name;
                    idx += 1;
                    keep
                });
            }
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Field names in document order, duplicates included.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Distinct names an update may target: every named control of the
    /// form, then any field added since.
    #[must_use]
    pub fn known_names(&self) -> Vec<&str> {
        let mut known: Vec<&str> = Vec::new();
        for name in self.controls.iter().map(String::as_str).chain(self.names()) {
            if !known.contains(&name) {
                known.push(name);
            }
        }
        known
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The form's `action` attribute, if it had one.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Last value per name, for reporting.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, PortalError> {
    Selector::parse(selector).map_err(|e| PortalError::Selector(format!("{selector}: {e}")))
}

fn named_controls(form: ElementRef<'_>) -> usize {
    form.select(&CONTROLS)
        .filter(|el| el.value().attr("name").is_some_and(|n| !n.is_empty()))
        .count()
}

/// The form matched by `selector`, or the document's primary form (the one
/// with the most named controls) when no selector is given.
fn select_form<'a>(document: &'a Html, selector: Option<&str>) -> Result<ElementRef<'a>, PortalError> {
    match selector {
        Some(sel) => {
            let parsed = parse_selector(sel)?;
            document
                .select(&parsed)
                .next()
                .ok_or_else(|| PortalError::FormNotFound(sel.to_string()))
        }
        None => document
            .select(&FORM)
            .fold(None, |best: Option<(ElementRef<'a>, usize)>, form| {
                let count = named_controls(form);
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((form, count)),
                }
            })
            .map(|(form, _)| form)
            .ok_or_else(|| PortalError::FormNotFound("form".to_string())),
    }
}

/// True when an option label is a placeholder row ("---------").
#[must_use]
pub fn is_placeholder_text(text: &str) -> bool {
    text.contains("---")
}

fn option_candidate(option: ElementRef<'_>) -> OptionCandidate {
    let text = option.text().collect::<String>().trim().to_string();
    let value = option
        .value()
        .attr("value")
        .map_or_else(|| text.clone(), str::to_owned);
    let attrs = option
        .value()
        .attrs()
        .filter(|(name, _)| *name != "value" && *name != "selected")
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    OptionCandidate { value, text, attrs }
}

fn select_values(select: ElementRef<'_>) -> Vec<String> {
    let options: Vec<ElementRef<'_>> = select.select(&OPTION).collect();
    let selected: Vec<String> = options
        .iter()
        .filter(|o| o.value().attr("selected").is_some())
        .map(|o| option_candidate(*o).value)
        .collect();
    if !selected.is_empty() {
        if select.value().attr("multiple").is_some() {
            return selected;
        }
        return selected.into_iter().take(1).collect();
    }
    if select.value().attr("multiple").is_some() {
        return Vec::new();
    }
    let first_real = options
        .iter()
        .map(|o| option_candidate(*o))
        .find(|o| !is_placeholder_text(&o.text));
    vec![first_real.map(|o| o.value).unwrap_or_default()]
}

fn textarea_value(textarea: ElementRef<'_>) -> String {
    let raw: String = textarea.text().collect();
    raw.strip_prefix('\n').map_or(raw.clone(), str::to_owned)
}

/// Values a control contributes to the submission, in order.
fn control_values(control: ElementRef<'_>) -> Vec<String> {
    let el = control.value();
    match el.name() {
        "input" => {
            let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
            if SKIPPED_INPUT_TYPES.contains(&kind.as_str()) {
                return Vec::new();
            }
            if kind == "checkbox" || kind == "radio" {
                if el.attr("checked").is_some() {
                    return vec![el.attr("value").unwrap_or("on").to_string()];
                }
                return Vec::new();
            }
            vec![el.attr("value").unwrap_or_default().to_string()]
        }
        "textarea" => vec![textarea_value(control)],
        "select" => select_values(control),
        _ => Vec::new(),
    }
}

fn is_button_like(control: ElementRef<'_>) -> bool {
    let el = control.value();
    el.name() == "input"
        && SKIPPED_INPUT_TYPES.contains(&el.attr("type").unwrap_or("text").to_ascii_lowercase().as_str())
}

pub(crate) fn snapshot_of(form: ElementRef<'_>) -> FormSnapshot {
    let mut fields = Vec::new();
    let mut controls: Vec<String> = Vec::new();
    for control in form.select(&CONTROLS) {
        let Some(name) = control.value().attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if !is_button_like(control) && !controls.iter().any(|c| c == name) {
            controls.push(name.to_string());
        }
        if control.value().attr("disabled").is_some() {
            continue;
        }
        for value in control_values(control) {
            fields.push((name.to_string(), value));
        }
    }
    FormSnapshot {
        fields,
        controls,
        action: form
            .value()
            .attr("action")
            .filter(|a| !a.trim().is_empty())
            .map(str::to_owned),
    }
}

/// Extracts the submission snapshot of one form.
///
/// # Errors
///
/// Returns [`PortalError::FormNotFound`] when no form matches, or
/// [`PortalError::Selector`] for an unparseable selector.
pub fn extract_snapshot(html: &str, selector: Option<&str>) -> Result<FormSnapshot, PortalError> {
    let document = Html::parse_document(html);
    let form = select_form(&document, selector)?;
    let snapshot = snapshot_of(form);
    tracing::debug!(fields = snapshot.len(), action = ?snapshot.action(), "extracted form snapshot");
    Ok(snapshot)
}

/// All options of the select named `field_name`, placeholders included.
#[must_use]
pub fn select_options(html: &str, field_name: &str) -> Vec<OptionCandidate> {
    let document = Html::parse_document(html);
    document
        .select(&SELECT)
        .find(|s| s.value().attr("name") == Some(field_name))
        .map(|s| s.select(&OPTION).map(option_candidate).collect())
        .unwrap_or_default()
}

/// Names of every select in the document, in order.
#[must_use]
pub fn select_names(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&SELECT)
        .filter_map(|s| s.value().attr("name"))
        .map(str::to_owned)
        .collect()
}

/// Name of the first file input, if any.
#[must_use]
pub fn file_input_name(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&FILE_INPUT)
        .find_map(|el| el.value().attr("name"))
        .map(str::to_owned)
}

/// First name in `names` that starts with `prefix` and whose remainder is,
/// or contains, one of `keys` as a token. Exact remainders win.
#[must_use]
pub fn find_prefixed_field<'a, I>(names: I, prefix: &str, keys: &[&str]) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefixed: Vec<&str> = names
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .collect();
    let exact = prefixed.iter().find(|n| {
        let rest = &n[prefix.len()..];
        keys.iter().any(|k| rest.eq_ignore_ascii_case(k))
    });
    if let Some(name) = exact {
        return Some((*name).to_string());
    }
    prefixed
        .iter()
        .find(|n| {
            let rest = field_tokens(&n[prefix.len()..]);
            rest.split_whitespace()
                .any(|tok| keys.iter().any(|k| tok == *k))
        })
        .map(|n| (*n).to_string())
}

/// Inline errors from a re-rendered form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub messages: Vec<String>,
    /// Required controls that came back empty.
    pub missing_required: Vec<String>,
}

/// Parses error-list markup; `None` when the page carries none.
#[must_use]
pub fn extract_validation_errors(html: &str) -> Option<ValidationReport> {
    let document = Html::parse_document(html);
    document.select(&ERROR_LIST).next()?;

    let messages = document
        .select(&ERROR_ITEMS)
        .map(|li| li.text().collect::<String>().trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();

    let missing_required = document
        .select(&CONTROLS)
        .filter(|c| c.value().attr("required").is_some())
        .filter(|c| control_values(*c).iter().all(|v| v.trim().is_empty()))
        .filter_map(|c| c.value().attr("name"))
        .map(str::to_owned)
        .collect();

    Some(ValidationReport {
        messages,
        missing_required,
    })
}

/// Keyed partial update; `null` clears a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateRequest(Map<String, Value>);

impl UpdateRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Map<String, Value>> for UpdateRequest {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The string a field receives for an update value.
#[must_use]
pub fn field_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// How an update key was matched to a form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldMapping {
    Exact { field: String },
    Heuristic { field: String },
    Fuzzy { field: String, score: f64 },
    /// No field matched; the key is written under its own name.
    Unmapped { field: String },
}

impl FieldMapping {
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            FieldMapping::Exact { field }
            | FieldMapping::Heuristic { field }
            | FieldMapping::Fuzzy { field, .. }
            | FieldMapping::Unmapped { field } => field,
        }
    }
}

fn has_token_prefix(tokens: &str, prefixes: &[&str]) -> bool {
    tokens
        .split_whitespace()
        .any(|tok| prefixes.iter().any(|p| tok.starts_with(p)))
}

const TECHNICIAN_PREFIXES: &[&str] = &["tecnic", "technic"];
const DATE_PREFIXES: &[&str] = &["fecha", "date"];
const INSTALL_PREFIXES: &[&str] = &["instal", "install"];

/// Maps an update key onto one of `known` field names.
///
/// Order: exact name, case-insensitive name, technician and
/// installation-date heuristics, best fuzzy token match at or above 0.5.
/// Falls back to the key itself.
#[must_use]
pub fn map_update_key_to_field(key: &str, known: &[&str]) -> FieldMapping {
    if known.contains(&key) {
        return FieldMapping::Exact {
            field: key.to_string(),
        };
    }
    if let Some(field) = known.iter().find(|f| f.eq_ignore_ascii_case(key)) {
        return FieldMapping::Exact {
            field: (*field).to_string(),
        };
    }

    let key_tokens = field_tokens(key);

    if has_token_prefix(&key_tokens, TECHNICIAN_PREFIXES) {
        if let Some(field) = known
            .iter()
            .find(|f| has_token_prefix(&field_tokens(f), TECHNICIAN_PREFIXES))
        {
            return FieldMapping::Heuristic {
                field: (*field).to_string(),
            };
        }
    }

    if has_token_prefix(&key_tokens, DATE_PREFIXES)
        && has_token_prefix(&key_tokens, INSTALL_PREFIXES)
    {
        if let Some(field) = known.iter().find(|f| {
            let tokens = field_tokens(f);
            has_token_prefix(&tokens, DATE_PREFIXES) && has_token_prefix(&tokens, INSTALL_PREFIXES)
        }) {
            return FieldMapping::Heuristic {
                field: (*field).to_string(),
            };
        }
    }

    let fuzzy = known
        .iter()
        .map(|f| (*f, similarity::score(&key_tokens, &field_tokens(f))))
        .filter(|(_, s)| *s >= FIELD_MATCH_THRESHOLD)
        .fold(None, |best: Option<(&str, f64)>, (f, s)| match best {
            Some((_, best_score)) if best_score >= s => best,
            _ => Some((f, s)),
        });
    if let Some((field, score)) = fuzzy {
        return FieldMapping::Fuzzy {
            field: field.to_string(),
            score,
        };
    }

    tracing::warn!(key, "update key matched no form field; submitting under its own name");
    FieldMapping::Unmapped {
        field: key.to_string(),
    }
}

/// Overlays `update` on `snapshot`, leaving every other field untouched.
/// Returns the merged snapshot and how each key was mapped.
#[must_use]
pub fn merge_update(
    snapshot: &FormSnapshot,
    update: &UpdateRequest,
) -> (FormSnapshot, Vec<(String, FieldMapping)>) {
    let known = snapshot.known_names();
    let mut merged = snapshot.clone();
    let mut applied = Vec::with_capacity(update.len());
    for (key, value) in update.iter() {
        let mapping = map_update_key_to_field(key, &known);
        tracing::debug!(key, field = mapping.field(), "mapped update key");
        merged.set(mapping.field(), field_value(value));
        applied.push((key.clone(), mapping));
    }
    (merged, applied)
}

#[cfg(test)]
#[path = "form_test.rs"]
mod tests;
