//! Database operations for the `installation_requests` table.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ispflow_core::{InstallationRequest, InstallationStore, StoreError};
use sqlx::PgPool;

use crate::DbError;

const SELECT_COLUMNS: &str = "SELECT id, first_name, last_name, national_id, email, phone, \
     address, city, plan_name, zone_hint, agreed_installation_date, activated_at, \
     portal_external_id, created_at, updated_at \
     FROM installation_requests";

/// A row from the `installation_requests` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstallationRequestRow {
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<InstallationRequestRow> for InstallationRequest {
    fn from(row: InstallationRequestRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            national_id: row.national_id,
            email: row.email,
            phone: row.phone,
            address: row.address,
            city: row.city,
            plan_name: row.plan_name,
            zone_hint: row.zone_hint,
            agreed_installation_date: row.agreed_installation_date,
            activated_at: row.activated_at,
            portal_external_id: row.portal_external_id,
        }
    }
}

/// Fields accepted when recording a new installation request.
#[derive(Debug, Clone, Default)]
pub struct NewInstallationRequest {
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
}

/// Insert a new installation request and return the stored row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_installation_request(
    pool: &PgPool,
    new: &NewInstallationRequest,
) -> Result<InstallationRequestRow, DbError> {
    let row = sqlx::query_as::<_, InstallationRequestRow>(
        "INSERT INTO installation_requests \
             (first_name, last_name, national_id, email, phone, address, city, \
              plan_name, zone_hint, agreed_installation_date) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING id, first_name, last_name, national_id, email, phone, address, city, \
                   plan_name, zone_hint, agreed_installation_date, activated_at, \
                   portal_external_id, created_at, updated_at",
    )
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(new.national_id.as_deref())
    .bind(new.email.as_deref())
    .bind(new.phone.as_deref())
    .bind(new.address.as_deref())
    .bind(new.city.as_deref())
    .bind(new.plan_name.as_deref())
    .bind(new.zone_hint.as_deref())
    .bind(new.agreed_installation_date)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Returns one installation request by id, or `None` if absent.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_installation_request(
    pool: &PgPool,
    id: i64,
) -> Result<Option<InstallationRequestRow>, DbError> {
    let row = sqlx::query_as::<_, InstallationRequestRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Returns every request not yet activated on the portal, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_pending_installation_requests(
    pool: &PgPool,
) -> Result<Vec<InstallationRequestRow>, DbError> {
    let rows = sqlx::query_as::<_, InstallationRequestRow>(&format!(
        "{SELECT_COLUMNS} WHERE activated_at IS NULL ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Stores the installation date agreed with the customer.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row has `id`, or [`DbError::Sqlx`]
/// if the update fails.
pub async fn set_agreed_installation_date(
    pool: &PgPool,
    id: i64,
    date: NaiveDate,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE installation_requests \
         SET agreed_installation_date = $2, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(date)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(id));
    }
    Ok(())
}

/// Records that the request was activated on the portal under `external_id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row has `id`, or [`DbError::Sqlx`]
/// if the update fails.
pub async fn mark_installation_activated(
    pool: &PgPool,
    id: i64,
    external_id: &str,
    at: DateTime<Utc>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE installation_requests \
         SET activated_at = $3, portal_external_id = $2, updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(external_id)
    .bind(at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(id));
    }
    Ok(())
}

impl From<DbError> for StoreError {
    fn from(error: DbError) -> Self {
        match error {
            DbError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// [`InstallationStore`] backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InstallationStore for PgStore {
    async fn get(&self, id: i64) -> Result<Option<InstallationRequest>, StoreError> {
        Ok(get_installation_request(&self.pool, id)
            .await?
            .map(InstallationRequest::from))
    }

    async fn list_pending(&self) -> Result<Vec<InstallationRequest>, StoreError> {
        Ok(list_pending_installation_requests(&self.pool)
            .await?
            .into_iter()
            .map(InstallationRequest::from)
            .collect())
    }

    async fn set_agreed_date(&self, id: i64, date: NaiveDate) -> Result<(), StoreError> {
        set_agreed_installation_date(&self.pool, id, date).await?;
        Ok(())
    }

    async fn mark_activated(
        &self,
        id: i64,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        mark_installation_activated(&self.pool, id, external_id, at).await?;
        Ok(())
    }
}
