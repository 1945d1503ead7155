//! Ticketing API payload types.
//!
//! The API is loosely typed: ids arrive as numbers or strings and field
//! names vary between deployments. Records keep every field they were sent
//! in `fields` so updates can round-trip data this crate does not model.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => ["name", "nombre", "full_name", "nombre_completo"]
            .iter()
            .find_map(|k| map.get(*k).and_then(text_of)),
        _ => None,
    }
}

/// A ticket as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTicket {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

const CLIENT_KEYS: &[&str] = &["cliente", "client", "client_name", "nombre_cliente", "customer"];
const SUBJECT_KEYS: &[&str] = &["asunto", "subject", "title", "titulo"];

impl RemoteTicket {
    /// Client display name, from whichever client field the API populated.
    #[must_use]
    pub fn client_name(&self) -> Option<String> {
        CLIENT_KEYS
            .iter()
            .find_map(|k| self.fields.get(*k).and_then(text_of))
    }

    #[must_use]
    pub fn subject(&self) -> Option<String> {
        SUBJECT_KEYS
            .iter()
            .find_map(|k| self.fields.get(*k).and_then(text_of))
    }
}

/// A staff member (technician, dispatcher) from the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(alias = "nombre", alias = "full_name", alias = "nombre_completo")]
    pub name: String,
    #[serde(default, alias = "correo")]
    pub email: Option<String>,
    #[serde(default, alias = "rol", alias = "cargo")]
    pub role: Option<String>,
    #[serde(default, alias = "activo", alias = "is_active")]
    pub active: Option<bool>,
}

/// Which verb finally applied an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateMethod {
    Patch,
    Put,
}

/// Result of [`TicketClient::update_ticket`](crate::TicketClient::update_ticket).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TicketUpdate {
    pub method: UpdateMethod,
    pub ticket: RemoteTicket,
    /// Fields the PATCH response did not echo back, which forced the PUT.
    pub ignored_by_patch: Vec<String>,
}

/// One page of a list endpoint.
#[derive(Debug)]
pub(crate) struct Page {
    pub items: Vec<Value>,
    pub next: Option<String>,
}

/// Accepts `{"results": [...], "next": ...}` or a bare array.
pub(crate) fn parse_page(body: Value) -> Option<Page> {
    match body {
        Value::Array(items) => Some(Page { items, next: None }),
        Value::Object(mut map) => {
            let items = match map.remove("results").or_else(|| map.remove("data"))? {
                Value::Array(items) => items,
                _ => return None,
            };
            let next = map
                .remove("next")
                .and_then(|n| n.as_str().map(str::to_owned))
                .filter(|n| !n.trim().is_empty());
            Some(Page { items, next })
        }
        _ => None,
    }
}

/// Keys of `sent` whose values the echoed record does not carry.
///
/// Values compare by JSON equality, or by their string forms so that an
/// id sent as `7` and echoed as `"7"` still counts as applied.
#[must_use]
pub fn ignored_fields(sent: &Map<String, Value>, echoed: &Map<String, Value>) -> Vec<String> {
    let as_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    sent.iter()
        .filter(|(key, value)| match echoed.get(*key) {
            Some(got) => got != *value && as_text(got) != as_text(value),
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ticket_ids_may_be_numbers_or_strings() {
        let a: RemoteTicket = serde_json::from_value(json!({"id": 15, "asunto": "Corte"})).unwrap();
        let b: RemoteTicket = serde_json::from_value(json!({"id": "T-15"})).unwrap();
        assert_eq!(a.id, "15");
        assert_eq!(a.subject().as_deref(), Some("Corte"));
        assert_eq!(b.id, "T-15");
        assert!(serde_json::from_value::<RemoteTicket>(json!({"id": null})).is_err());
    }

    #[test]
    fn client_name_reads_flat_and_nested_fields() {
        let flat: RemoteTicket =
            serde_json::from_value(json!({"id": 1, "cliente": "Ana Torres"})).unwrap();
        let nested: RemoteTicket =
            serde_json::from_value(json!({"id": 2, "client": {"id": 9, "nombre": "Luis Rojas"}}))
                .unwrap();
        let none: RemoteTicket = serde_json::from_value(json!({"id": 3, "cliente": ""})).unwrap();
        assert_eq!(flat.client_name().as_deref(), Some("Ana Torres"));
        assert_eq!(nested.client_name().as_deref(), Some("Luis Rojas"));
        assert_eq!(none.client_name(), None);
    }

    #[test]
    fn pages_accept_envelopes_and_bare_arrays() {
        let page = parse_page(json!({"results": [{"id": 1}], "next": "/api/tickets/?page=2"})).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next.as_deref(), Some("/api/tickets/?page=2"));

        let last = parse_page(json!({"results": [], "next": null})).unwrap();
        assert!(last.next.is_none());

        let bare = parse_page(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(bare.items.len(), 2);

        assert!(parse_page(json!({"detail": "nope"})).is_none());
    }

    #[test]
    fn ignored_fields_compare_string_forms() {
        let sent = json!({"tecnico": 7, "estado": "cerrado", "prioridad": "alta"});
        let echoed = json!({"tecnico": "7", "estado": "abierto"});
        let mut ignored = ignored_fields(sent.as_object().unwrap(), echoed.as_object().unwrap());
        ignored.sort();
        assert_eq!(ignored, vec!["estado".to_string(), "prioridad".to_string()]);
    }
}
