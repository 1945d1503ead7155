//! Accepted request aliases per logical field.
//!
//! Inbound payloads name the same thing many ways (`tecnico`, `tecnicoId`,
//! `technician`). Command structs read them through [`Payload`] and
//! free-form update maps through [`LogicalField`] lists. Either way keys are
//! checked in order and the first non-null one wins.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::options::OptionDomain;

/// A logical reference field and its accepted request keys, in priority
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalField {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub domain: OptionDomain,
}

pub const TECHNICIAN: LogicalField = LogicalField {
    name: "technician",
    aliases: &[
        "tecnico",
        "tecnicoId",
        "tecnico_id",
        "tecnicoName",
        "tecnico_nombre",
        "technician",
        "technicianId",
        "technician_id",
    ],
    domain: OptionDomain::Technician,
};

pub const PLAN: LogicalField = LogicalField {
    name: "plan",
    aliases: &["plan", "planId", "plan_id", "planName", "plan_name", "plan_internet"],
    domain: OptionDomain::Plan,
};

pub const ZONE: LogicalField = LogicalField {
    name: "zone",
    aliases: &["zona", "zonaId", "zona_id", "zone", "zoneId", "zone_id"],
    domain: OptionDomain::Zone,
};

pub const ROUTER: LogicalField = LogicalField {
    name: "router",
    aliases: &["router", "routerId", "router_id", "equipo", "modelo_router"],
    domain: OptionDomain::Router,
};

pub const AP: LogicalField = LogicalField {
    name: "ap",
    aliases: &["ap", "apId", "ap_id", "nap", "sectorial", "access_point"],
    domain: OptionDomain::Ap,
};

/// Reference fields whose values may be labels needing option resolution.
pub const REFERENCE_FIELDS: &[LogicalField] = &[TECHNICIAN, PLAN, ZONE, ROUTER, AP];

/// The reference field `key` is an alias of, compared case-insensitively.
#[must_use]
pub fn reference_field_for_key(key: &str) -> Option<&'static LogicalField> {
    REFERENCE_FIELDS
        .iter()
        .find(|field| field.aliases.iter().any(|a| a.eq_ignore_ascii_case(key)))
}

/// A command payload that could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Alias-aware reader over a raw JSON object.
///
/// Every accessor takes the accepted keys in priority order; the first key
/// holding a non-null value wins and later aliases are ignored, so a payload
/// may carry several spellings of one field.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Payload<'a> {
    #[must_use]
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    fn find(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        keys.iter()
            .find_map(|key| self.map.get(*key).filter(|v| !v.is_null()).map(|v| (*key, v)))
    }

    /// Deserializes the first non-null alias into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Invalid`] when the value does not fit `T`.
    pub fn opt<T: DeserializeOwned>(&self, keys: &[&'static str]) -> Result<Option<T>, PayloadError> {
        self.find(keys)
            .map(|(key, value)| {
                T::deserialize(value).map_err(|e| PayloadError::Invalid {
                    key,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// [`Payload::opt`] for fields that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Missing`] naming the first key when no alias
    /// holds a value.
    pub fn required<T: DeserializeOwned>(&self, keys: &[&'static str]) -> Result<T, PayloadError> {
        self.opt(keys)?.ok_or_else(|| missing(keys))
    }

    /// Reference id that may arrive as a JSON string or number; yields its
    /// string form.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Invalid`] for any other JSON type.
    pub fn opt_id(&self, keys: &[&'static str]) -> Result<Option<String>, PayloadError> {
        match self.find(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((_, Value::Number(n))) => Ok(Some(n.to_string())),
            Some((key, other)) => Err(PayloadError::Invalid {
                key,
                reason: format!("expected a string or number, got {other}"),
            }),
        }
    }

    /// [`Payload::opt_id`] for ids that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::Missing`] or [`PayloadError::Invalid`].
    pub fn required_id(&self, keys: &[&'static str]) -> Result<String, PayloadError> {
        self.opt_id(keys)?.ok_or_else(|| missing(keys))
    }
}

fn missing(keys: &[&'static str]) -> PayloadError {
    PayloadError::Missing(keys.first().copied().unwrap_or("<unnamed>"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn aliases_map_to_their_logical_field() {
        assert_eq!(reference_field_for_key("tecnicoId").map(|f| f.name), Some("technician"));
        assert_eq!(reference_field_for_key("TECNICO").map(|f| f.name), Some("technician"));
        assert_eq!(reference_field_for_key("zona").map(|f| f.domain), Some(OptionDomain::Zone));
        assert!(reference_field_for_key("asunto").is_none());
    }

    #[test]
    fn payload_takes_the_first_non_null_alias() {
        let keys = &["tecnico", "tecnicoId", "technician"];
        let map = json!({"tecnico": null, "tecnicoId": 7, "technician": "Pedro"});
        let map = map.as_object().unwrap();
        assert_eq!(Payload::new(map).required_id(keys).unwrap(), "7");

        let map = json!({"tecnico": "Carlos", "tecnicoId": 7});
        let map = map.as_object().unwrap();
        assert_eq!(Payload::new(map).required_id(keys).unwrap(), "Carlos");
    }

    #[test]
    fn payload_reports_missing_and_mistyped_values() {
        let map = json!({"tecnico": null, "prioridad": true, "fecha": "mañana"});
        let map = map.as_object().unwrap();
        let payload = Payload::new(map);

        assert_eq!(
            payload.required_id(&["tecnico", "tecnicoId"]),
            Err(PayloadError::Missing("tecnico"))
        );
        assert!(matches!(
            payload.opt_id(&["prioridad"]),
            Err(PayloadError::Invalid { key: "prioridad", .. })
        ));
        assert!(matches!(
            payload.opt::<chrono::NaiveDate>(&["fecha"]),
            Err(PayloadError::Invalid { key: "fecha", .. })
        ));
        assert_eq!(payload.opt::<String>(&["asunto"]), Ok(None));
    }
}
