//! Installation-request records and the store that owns them.
//!
//! The workflow engine only reads these records and amends at most two
//! things: the agreed installation date (before activation) and the
//! activation marker (after activation). Everything else belongs to the
//! store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A customer installation request as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRequest {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub national_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub plan_name: Option<String>,
    pub zone_hint: Option<String>,
    pub agreed_installation_date: Option<NaiveDate>,
    pub activated_at: Option<DateTime<Utc>>,
    pub portal_external_id: Option<String>,
}

impl InstallationRequest {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("installation request {0} not found")]
    NotFound(i64),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence collaborator for installation requests.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<InstallationRequest>, StoreError>;

    /// Requests that have not been activated yet.
    async fn list_pending(&self) -> Result<Vec<InstallationRequest>, StoreError>;

    async fn set_agreed_date(&self, id: i64, date: NaiveDate) -> Result<(), StoreError>;

    async fn mark_activated(
        &self,
        id: i64,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// In-process store used by tests and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<i64, InstallationRequest>>,
    fail_activation_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = InstallationRequest>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().map(|r| (r.id, r)).collect()),
            fail_activation_writes: AtomicBool::new(false),
        }
    }

    /// Makes subsequent `mark_activated` calls fail, to exercise the
    /// portal/local inconsistency path.
    pub fn fail_activation_writes(&self, fail: bool) {
        self.fail_activation_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of one record, bypassing the async trait.
    #[must_use]
    pub fn snapshot(&self, id: i64) -> Option<InstallationRequest> {
        self.records.lock().ok()?.get(&id).cloned()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<i64, InstallationRequest>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        f(&mut guard)
    }
}

#[async_trait]
impl InstallationStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<InstallationRequest>, StoreError> {
        self.with_records(|records| Ok(records.get(&id).cloned()))
    }

    async fn list_pending(&self) -> Result<Vec<InstallationRequest>, StoreError> {
        self.with_records(|records| {
            Ok(records
                .values()
                .filter(|r| r.activated_at.is_none())
                .cloned()
                .collect())
        })
    }

    async fn set_agreed_date(&self, id: i64, date: NaiveDate) -> Result<(), StoreError> {
        self.with_records(|records| {
            let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            record.agreed_installation_date = Some(date);
            Ok(())
        })
    }

    async fn mark_activated(
        &self,
        id: i64,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if self.fail_activation_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(
                "activation write rejected".to_string(),
            ));
        }
        self.with_records(|records| {
            let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            record.activated_at = Some(at);
            record.portal_external_id = Some(external_id.to_string());
            Ok(())
        })
    }
}
