//! Known-bad-to-good label renames consulted before fuzzy matching.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ispflow_core::text::normalize;
use ispflow_core::ConfigError;
use serde::Deserialize;

use crate::options::OptionDomain;

const BUILTIN: &str = include_str!("../config/corrections.yaml");
const BUILTIN_PATH: &str = "<builtin corrections.yaml>";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CorrectionsFile {
    #[serde(default)]
    technician: BTreeMap<String, String>,
    #[serde(default)]
    plan: BTreeMap<String, String>,
    #[serde(default)]
    zone: BTreeMap<String, String>,
    #[serde(default)]
    router: BTreeMap<String, String>,
    #[serde(default)]
    ap: BTreeMap<String, String>,
}

/// Per-domain rename tables, keyed by normalized source label.
#[derive(Debug, Clone, Default)]
pub struct CorrectionTables {
    tables: HashMap<OptionDomain, HashMap<String, String>>,
}

impl CorrectionTables {
    /// Tables compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the embedded YAML is invalid.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN, BUILTIN_PATH)
    }

    /// Tables from `path`, or the built-in ones when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileIo {
            path: path.display().to_string(),
            source: e,
        })?;
        let tables = Self::from_yaml_str(&content, &path.display().to_string())?;
        tracing::info!(path = %path.display(), entries = tables.len(), "loaded correction tables");
        Ok(tables)
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileParse`] on malformed YAML and
    /// [`ConfigError::Validation`] on empty or colliding entries.
    pub fn from_yaml_str(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: CorrectionsFile =
            serde_yaml::from_str(content).map_err(|e| ConfigError::FileParse {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        let mut tables = HashMap::new();
        for (domain, entries) in [
            (OptionDomain::Technician, file.technician),
            (OptionDomain::Plan, file.plan),
            (OptionDomain::Zone, file.zone),
            (OptionDomain::Router, file.router),
            (OptionDomain::Ap, file.ap),
        ] {
            let mut table = HashMap::with_capacity(entries.len());
            for (from, to) in entries {
                let key = normalize(&from);
                if key.is_empty() || to.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "{origin}: empty correction entry in {domain} table"
                    )));
                }
                if table.insert(key, to).is_some() {
                    return Err(ConfigError::Validation(format!(
                        "{origin}: '{from}' collides with another {domain} entry after normalization"
                    )));
                }
            }
            tables.insert(domain, table);
        }
        Ok(Self { tables })
    }

    /// Portal label that `label` should be renamed to, if any.
    #[must_use]
    pub fn lookup(&self, domain: OptionDomain, label: &str) -> Option<&str> {
        self.tables
            .get(&domain)?
            .get(&normalize(label))
            .map(String::as_str)
    }

    /// Total number of entries across all domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
