#![allow(dead_code)]

use std::time::Duration;

use ispflow_core::RetryPolicy;
use ispflow_portal::PortalConfig;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USERNAME: &str = "operador";
pub const PASSWORD: &str = "secreto";

pub const LOGIN_PAGE: &str = r#"<html><body>
<form method="post" action="/accounts/login/">
  <input type="hidden" name="csrfmiddlewaretoken" value="tok-login">
  <input type="text" name="username">
  <input type="password" name="password">
  <button type="submit">Entrar</button>
</form>
</body></html>"#;

/// Portal config pointed at `server` with retries that never sleep.
pub fn config(server: &MockServer) -> PortalConfig {
    PortalConfig::new(&server.uri())
        .expect("mock server uri")
        .with_credentials(USERNAME, PASSWORD)
        .with_retry(
            RetryPolicy::standard()
                .with_base_delay(Duration::ZERO)
                .with_rate_limit_floor(Duration::ZERO),
        )
}

pub async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/accounts/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_PAGE))
        .mount(server)
        .await;
}

/// Successful credential POST; callers attach their own expectations.
pub fn login_post() -> Mock {
    Mock::given(method("POST"))
        .and(path("/accounts/login/"))
        .and(body_string_contains("username=operador"))
        .and(body_string_contains("password=secreto"))
        .and(body_string_contains("csrfmiddlewaretoken=tok-login"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/")
                .insert_header("set-cookie", "sessionid=abc123; Path=/"),
        )
}

pub async fn mount_login(server: &MockServer) {
    mount_login_page(server).await;
    login_post().mount(server).await;
}

/// A redirect to the login page, as the portal answers expired sessions.
pub fn login_redirect(next: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("location", format!("/accounts/login/?next={next}"))
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(body.to_string())
}
