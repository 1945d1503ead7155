//! HTTP client for the remote ticketing/staff REST API.
//!
//! Wraps `reqwest` with bearer-key authentication, the shared retry
//! executor, `next`-link pagination and the PATCH→PUT update fallback.

use std::time::Duration;

use ispflow_core::retry::{self, classify_status, parse_retry_after, Classify, RetryDecision};
use ispflow_core::similarity::token_set;
use ispflow_core::{AppConfig, RetryPolicy};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::TicketError;
use crate::types::{ignored_fields, parse_page, RemoteTicket, StaffMember, TicketUpdate, UpdateMethod};

/// Hard stop for `next`-link pagination.
pub const MAX_PAGES: usize = 200;

/// PATCH rejections that mean "use PUT instead".
const PATCH_FALLBACK_STATUSES: &[u16] = &[400, 405, 415, 422];

const EXCERPT_CHARS: usize = 300;

/// Collection paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRoutes {
    pub tickets: String,
    pub staff: String,
}

impl Default for TicketRoutes {
    fn default() -> Self {
        Self {
            tickets: "tickets/".to_string(),
            staff: "staff/".to_string(),
        }
    }
}

struct Buffered {
    status: u16,
    url: String,
    retry_after: Option<Duration>,
    body: String,
}

impl Classify for Buffered {
    fn classify(&self) -> RetryDecision {
        classify_status(self.status, self.retry_after)
    }
}

impl Buffered {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn into_error(self) -> TicketError {
        TicketError::Status {
            status: self.status,
            url: self.url,
            body: self.body.chars().take(EXCERPT_CHARS).collect(),
        }
    }

    fn json(&self) -> Result<Value, TicketError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| TicketError::Deserialize {
            context: self.url.clone(),
            source: e,
        })
    }
}

fn decode<T: DeserializeOwned>(value: Value, context: &str) -> Result<T, TicketError> {
    serde_json::from_value(value).map_err(|e| TicketError::Deserialize {
        context: context.to_string(),
        source: e,
    })
}

/// Client for the remote ticketing API.
///
/// Use [`TicketClient::from_app_config`] in binaries or
/// [`TicketClient::with_base_url`] to point at a mock server in tests.
pub struct TicketClient {
    client: Client,
    api_key: String,
    base_url: Url,
    retry: RetryPolicy,
    routes: TicketRoutes,
}

impl TicketClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`TicketError::InvalidUrl`] if `base_url`
    /// is not a valid URL.
    pub fn with_base_url(api_key: &str, timeout_secs: u64, base_url: &str) -> Result<Self, TicketError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("ispflow/0.1 (ticket-sync)")
            .build()?;

        // One trailing slash, so relative routes append instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| TicketError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url,
            retry: RetryPolicy::standard(),
            routes: TicketRoutes::default(),
        })
    }

    /// Builds the client from process configuration.
    ///
    /// # Errors
    ///
    /// [`TicketError::MissingConfig`] when the base URL or API key is unset,
    /// otherwise as [`with_base_url`](Self::with_base_url).
    pub fn from_app_config(config: &AppConfig) -> Result<Self, TicketError> {
        let base_url = config
            .tickets_base_url
            .as_deref()
            .ok_or_else(|| TicketError::MissingConfig("ISPFLOW_TICKETS_BASE_URL".to_string()))?;
        let api_key = config
            .tickets_api_key
            .as_deref()
            .ok_or_else(|| TicketError::MissingConfig("ISPFLOW_TICKETS_API_KEY".to_string()))?;
        let retry = RetryPolicy::standard()
            .with_attempts(config.max_attempts)
            .with_base_delay(Duration::from_millis(config.retry_base_ms));
        Ok(Self::with_base_url(api_key, config.request_timeout_secs, base_url)?.with_retry(retry))
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_routes(mut self, routes: TicketRoutes) -> Self {
        self.routes = routes;
        self
    }

    /// Fetches one ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Status`] for a non-2xx response (404 included).
    /// - [`TicketError::Http`] on network failure after retries.
    /// - [`TicketError::Deserialize`] if the body is not a ticket.
    pub async fn get_ticket(&self, ticket_id: &str) -> Result<RemoteTicket, TicketError> {
        let url = self.ticket_url(ticket_id)?;
        let body = self.send(Method::GET, &url, None).await?.json()?;
        decode(body, &format!("get_ticket({ticket_id})"))
    }

    /// Applies a partial update to a ticket.
    ///
    /// Sends PATCH first. Falls back to GET + merge + PUT when the PATCH is
    /// rejected with 400/405/415/422, or when its echoed record does not
    /// carry every sent field.
    ///
    /// # Errors
    ///
    /// - [`TicketError::Status`] when PATCH fails otherwise, or PUT fails.
    /// - [`TicketError::Http`] / [`TicketError::Deserialize`] as they occur.
    pub async fn update_ticket(
        &self,
        ticket_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<TicketUpdate, TicketError> {
        let url = self.ticket_url(ticket_id)?;
        let patch_body = Value::Object(fields.clone());

        let response = self.execute(Method::PATCH, &url, Some(&patch_body)).await?;
        let ignored = if response.is_success() {
            match response.json()? {
                Value::Object(echoed) => {
                    let ignored = ignored_fields(fields, &echoed);
                    if ignored.is_empty() {
                        tracing::info!(ticket_id, fields = fields.len(), "ticket updated with PATCH");
                        return Ok(TicketUpdate {
                            method: UpdateMethod::Patch,
                            ticket: decode(Value::Object(echoed), &format!("update_ticket({ticket_id})"))?,
                            ignored_by_patch: Vec::new(),
                        });
                    }
                    tracing::warn!(ticket_id, ignored = ?ignored, "PATCH ignored some fields; retrying with PUT");
                    ignored
                }
                // No echo to check against; re-read to confirm.
                _ => {
                    let current = self.get_ticket(ticket_id).await?;
                    let ignored = ignored_fields(fields, &current.fields);
                    if ignored.is_empty() {
                        return Ok(TicketUpdate {
                            method: UpdateMethod::Patch,
                            ticket: current,
                            ignored_by_patch: Vec::new(),
                        });
                    }
                    tracing::warn!(ticket_id, ignored = ?ignored, "PATCH did not persist some fields; retrying with PUT");
                    ignored
                }
            }
        } else if PATCH_FALLBACK_STATUSES.contains(&response.status) {
            tracing::warn!(ticket_id, status = response.status, "PATCH rejected; retrying with PUT");
            fields.keys().cloned().collect()
        } else {
            return Err(response.into_error());
        };

        let current = self.get_ticket(ticket_id).await?;
        let mut full = current.fields;
        for (key, value) in fields {
            full.insert(key.clone(), value.clone());
        }
        let body = self.send(Method::PUT, &url, Some(&Value::Object(full))).await?.json()?;
        let ticket = match body {
            Value::Null => self.get_ticket(ticket_id).await?,
            body => decode(body, &format!("update_ticket({ticket_id})"))?,
        };
        tracing::info!(ticket_id, fields = fields.len(), "ticket updated with PUT");
        Ok(TicketUpdate {
            method: UpdateMethod::Put,
            ticket,
            ignored_by_patch: ignored,
        })
    }

    /// Lists every staff member, following pagination.
    ///
    /// # Errors
    ///
    /// [`TicketError::Status`], [`TicketError::Http`] or
    /// [`TicketError::Deserialize`] for a malformed page.
    pub async fn list_staff(&self) -> Result<Vec<StaffMember>, TicketError> {
        let url = self.route(&self.routes.staff)?;
        self.collect_pages(url, "list_staff", |_: &StaffMember| true).await
    }

    /// Tickets whose client name contains every token of `client_name`,
    /// after accent and case normalization.
    ///
    /// The name is also sent as a `search` query so servers that support it
    /// can narrow the scan.
    ///
    /// # Errors
    ///
    /// [`TicketError::Status`], [`TicketError::Http`] or
    /// [`TicketError::Deserialize`] for a malformed page.
    pub async fn search_tickets_by_client(&self, client_name: &str) -> Result<Vec<RemoteTicket>, TicketError> {
        let wanted = token_set(client_name);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let mut url = self.route(&self.routes.tickets)?;
        url.query_pairs_mut().append_pair("search", client_name);
        self.collect_pages(url, "search_tickets_by_client", |ticket: &RemoteTicket| {
            ticket
                .client_name()
                .is_some_and(|name| wanted.is_subset(&token_set(&name)))
        })
        .await
    }

    async fn collect_pages<T, P>(&self, first: Url, context: &str, keep: P) -> Result<Vec<T>, TicketError>
    where
        T: DeserializeOwned,
        P: Fn(&T) -> bool,
    {
        let mut out = Vec::new();
        let mut next = Some(first);
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            if pages == MAX_PAGES {
                tracing::warn!(context, pages, "pagination cap reached; returning partial results");
                break;
            }
            pages += 1;

            let body = self.send(Method::GET, &url, None).await?.json()?;
            let page = parse_page(body).ok_or_else(|| TicketError::Deserialize {
                context: format!("{context} page {pages}"),
                source: serde::de::Error::custom("expected a list or a results envelope"),
            })?;

            for item in page.items {
                match serde_json::from_value::<T>(item) {
                    Ok(value) if keep(&value) => out.push(value),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(context, page = pages, error = %e, "skipping malformed list entry"),
                }
            }

            next = match page.next {
                Some(href) => Some(url.join(&href).map_err(|e| TicketError::InvalidUrl {
                    url: href.clone(),
                    reason: e.to_string(),
                })?),
                None => None,
            };
        }

        tracing::debug!(context, pages, items = out.len(), "pagination finished");
        Ok(out)
    }

    fn route(&self, path: &str) -> Result<Url, TicketError> {
        self.base_url.join(path).map_err(|e| TicketError::InvalidUrl {
            url: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn ticket_url(&self, ticket_id: &str) -> Result<Url, TicketError> {
        let collection = format!("{}/", self.routes.tickets.trim_end_matches('/'));
        self.route(&format!("{collection}{ticket_id}/"))
    }

    fn request(&self, method: Method, url: &Url, body: Option<&Value>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url.clone())
            .bearer_auth(&self.api_key);
        match body {
            Some(body) => builder.json(body),
            None => builder,
        }
    }

    /// Runs one request through the retry executor and buffers the body.
    async fn execute(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Buffered, TicketError> {
        let label = format!("tickets {method}");
        retry::execute(&self.retry, &label, || {
            let request = self.request(method.clone(), url, body);
            async move {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok()),
                );
                let url = response.url().to_string();
                let body = response.text().await?;
                Ok::<_, TicketError>(Buffered {
                    status,
                    url,
                    retry_after,
                    body,
                })
            }
        })
        .await
    }

    /// [`execute`](Self::execute), with non-2xx turned into [`TicketError::Status`].
    async fn send(&self, method: Method, url: &Url, body: Option<&Value>) -> Result<Buffered, TicketError> {
        let response = self.execute(method, url, body).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(response.into_error())
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
