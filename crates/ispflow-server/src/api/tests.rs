use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::Request;
use ispflow_core::{MemoryStore, RetryPolicy};
use ispflow_portal::{
    CorrectionTables, Orchestrator, PortalClient, PortalConfig, PreconditionReason,
};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;

const LOGIN_PAGE: &str = r#"<form method="post" action="/accounts/login/">
  <input type="hidden" name="csrfmiddlewaretoken" value="tok-login">
  <input type="text" name="username"><input type="password" name="password">
</form>"#;

fn zero_delay() -> RetryPolicy {
    RetryPolicy::standard()
        .with_base_delay(Duration::ZERO)
        .with_rate_limit_floor(Duration::ZERO)
}

fn state(portal_url: &str, tickets_url: Option<&str>) -> AppState {
    let config = PortalConfig::new(portal_url)
        .expect("portal url")
        .with_credentials("operador", "secreto")
        .with_retry(zero_delay());
    let orchestrator = Orchestrator::new(
        PortalClient::new(config),
        Arc::new(MemoryStore::new([])),
        Arc::new(CorrectionTables::builtin().expect("builtin corrections")),
    );
    let tickets = tickets_url.map(|url| {
        Arc::new(
            TicketClient::with_base_url("test-key", 30, url)
                .expect("tickets url")
                .with_retry(zero_delay()),
        )
    });
    AppState {
        orchestrator: Arc::new(orchestrator),
        tickets,
        pool: None,
        workflow_timeout: Duration::from_secs(30),
    }
}

fn app(state: AppState) -> Router {
    build_app(state, AuthState::disabled(), default_rate_limit_state())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn health_reports_each_component() {
    let (status, json) = send(
        app(state("https://portal.example", None)),
        get("/api/v1/health"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["database"], "not_configured");
    assert_eq!(json["data"]["portal_session"], "unauthenticated");
    assert_eq!(json["data"]["tickets_api"], "not_configured");
    assert!(json["meta"]["request_id"].is_string());
}

#[tokio::test]
async fn request_id_header_is_echoed() {
    let response = app(state("https://portal.example", None))
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-abc")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(
        response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-abc")
    );
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let auth = AuthState::from_keys(&["k-1".to_string()], false).expect("auth");
    let router = build_app(
        state("https://portal.example", None),
        auth,
        default_rate_limit_state(),
    );

    let (status, json) = send(router.clone(), get("/api/v1/session")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");
    assert!(json["meta"]["request_id"].is_string());

    let authorized = Request::builder()
        .uri("/api/v1/session")
        .header("authorization", "Bearer k-1")
        .body(Body::empty())
        .expect("request");
    let (status, json) = send(router.clone(), authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["logins"], 0);

    let (status, _) = send(router, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_rejects_requests_beyond_the_window() {
    let router = build_app(
        state("https://portal.example", None),
        AuthState::disabled(),
        RateLimitState::new(1, Duration::from_secs(60)),
    );
    let (first, _) = send(router.clone(), get("/api/v1/session")).await;
    let (second, json) = send(router, get("/api/v1/session")).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn activation_without_identity_is_a_bad_request() {
    let (status, json) = send(
        app(state("https://portal.example", None)),
        json_request("POST", "/api/v1/activations", r#"{"tecnico": "Carlos"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn malformed_bodies_use_the_error_envelope() {
    let (status, json) = send(
        app(state("https://portal.example", None)),
        json_request("POST", "/api/v1/tickets", "{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
    assert!(json["meta"]["request_id"].is_string());
}

#[tokio::test]
async fn unknown_record_is_not_found() {
    let (status, json) = send(
        app(state("https://portal.example", None)),
        json_request(
            "POST",
            "/api/v1/activations",
            r#"{"solicitudId": 99, "tecnicoId": 7}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn ticket_is_deleted_through_the_portal() {
    let portal = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/accounts/login/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/")
                .insert_header("set-cookie", "sessionid=abc123; Path=/"),
        )
        .expect(1)
        .mount(&portal)
        .await;
    Mock::given(method("GET"))
        .and(path("/tickets/481/eliminar/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<form method="post"><input type="hidden" name="csrfmiddlewaretoken" value="tok-del"></form>"#,
        ))
        .mount(&portal)
        .await;
    Mock::given(method("POST"))
        .and(path("/tickets/481/eliminar/"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-del"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/tickets/"))
        .expect(1)
        .mount(&portal)
        .await;

    let (status, json) = send(
        app(state(&portal.uri(), None)),
        Request::builder()
            .method("DELETE")
            .uri("/api/v1/tickets/481")
            .body(Body::empty())
            .expect("request"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], 302);
}

#[tokio::test]
async fn remote_search_goes_through_the_ticket_client() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tickets/"))
        .and(query_param("search", "Ana Torres"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "cliente": "Ana Torres"},
            {"id": 2, "cliente": "Ana Rojas"}
        ])))
        .expect(1)
        .mount(&api)
        .await;

    let (status, json) = send(
        app(state("https://portal.example", Some(&api.uri()))),
        get("/api/v1/remote/tickets?client=Ana%20Torres"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let data = json["data"].as_array().expect("data array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "1");
}

#[tokio::test]
async fn remote_search_requires_a_client_name() {
    let (status, _) = send(
        app(state("https://portal.example", Some("https://tickets.example"))),
        get("/api/v1/remote/tickets"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn remote_routes_report_missing_configuration() {
    let (status, json) = send(
        app(state("https://portal.example", None)),
        get("/api/v1/remote/staff"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "configuration_error");
}

#[tokio::test]
async fn remote_ticket_not_found_maps_to_404() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tickets/99/"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "No encontrado."})))
        .mount(&api)
        .await;

    let (status, json) = send(
        app(state("https://portal.example", Some(&api.uri()))),
        get("/api/v1/remote/tickets/99"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["details"]["upstream_status"], 404);
}

#[test]
fn precondition_failures_carry_their_reason() {
    let error = PortalError::Precondition {
        reason: PreconditionReason::TechnicianUnresolved,
        message: "no technician matches 'Zeta'".to_string(),
    };
    let api_error = map_portal_error("req-1".to_string(), &error);
    assert_eq!(api_error.error.code, "precondition_failed");
    assert_eq!(
        api_error.error.details,
        Some(json!({"reason": "technician_unresolved"}))
    );
    assert_eq!(
        api_error.into_response().status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[test]
fn portal_validation_errors_list_messages() {
    let error = PortalError::Validation {
        messages: vec!["Este campo es obligatorio.".to_string()],
        missing_required: vec!["servicio-ip".to_string()],
        excerpt: String::new(),
    };
    let api_error = map_portal_error("req-1".to_string(), &error);
    let details = api_error.error.details.clone().expect("details");
    assert_eq!(details["missing_required"], json!(["servicio-ip"]));
    assert_eq!(
        api_error.into_response().status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[test]
fn upstream_failures_map_to_gateway_statuses() {
    let expired = ApiError::new("r", "session_expired", "expired").into_response();
    let timeout = map_portal_error("r".to_string(), &PortalError::Timeout(180)).into_response();
    assert_eq!(expired.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
}
