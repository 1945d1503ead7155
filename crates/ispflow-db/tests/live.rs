//! Live tests for ispflow-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database from the sqlx
//! test harness, so they only run with `--ignored` and `DATABASE_URL` set.
//! `"../../migrations"` resolves to the workspace migration directory.

use chrono::{NaiveDate, TimeZone, Utc};
use ispflow_core::{InstallationStore, StoreError};
use ispflow_db::{insert_installation_request, NewInstallationRequest, PgStore};

fn new_request(first: &str, last: &str) -> NewInstallationRequest {
    NewInstallationRequest {
        first_name: first.to_string(),
        last_name: last.to_string(),
        national_id: Some("12345678-K".to_string()),
        city: Some("Temuco".to_string()),
        plan_name: Some("Fibra 300".to_string()),
        ..NewInstallationRequest::default()
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn inserted_request_is_readable_through_the_store(pool: sqlx::PgPool) {
    let row = insert_installation_request(&pool, &new_request("Ana", "Torres"))
        .await
        .expect("insert failed");
    let store = PgStore::new(pool);

    let record = store
        .get(row.id)
        .await
        .expect("get failed")
        .expect("record exists");
    assert_eq!(record.full_name(), "Ana Torres");
    assert_eq!(record.plan_name.as_deref(), Some("Fibra 300"));
    assert!(record.agreed_installation_date.is_none());

    assert!(store.get(row.id + 1000).await.expect("get failed").is_none());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn activation_removes_request_from_pending(pool: sqlx::PgPool) {
    let first = insert_installation_request(&pool, &new_request("Ana", "Torres"))
        .await
        .expect("insert failed");
    let second = insert_installation_request(&pool, &new_request("Luis", "Rojas"))
        .await
        .expect("insert failed");
    let store = PgStore::new(pool);

    let date = NaiveDate::from_ymd_opt(2026, 10, 20).expect("valid date");
    store
        .set_agreed_date(first.id, date)
        .await
        .expect("set_agreed_date failed");
    let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    store
        .mark_activated(first.id, "INST-1", at)
        .await
        .expect("mark_activated failed");

    let pending = store.list_pending().await.expect("list_pending failed");
    let ids: Vec<i64> = pending.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id]);

    let activated = store.get(first.id).await.unwrap().expect("record exists");
    assert_eq!(activated.agreed_installation_date, Some(date));
    assert_eq!(activated.portal_external_id.as_deref(), Some("INST-1"));
    assert_eq!(activated.activated_at, Some(at));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires a live Postgres via DATABASE_URL"]
async fn writes_to_missing_rows_are_not_found(pool: sqlx::PgPool) {
    let store = PgStore::new(pool);
    let date = NaiveDate::from_ymd_opt(2026, 10, 20).expect("valid date");

    let err = store.set_agreed_date(999, date).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(999)));

    let err = store
        .mark_activated(999, "INST-999", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(999)));
}
