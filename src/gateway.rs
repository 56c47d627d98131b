//! GitHub REST gateway: repository search and per-repository details.
//!
//! Two small traits describe what the harvest consumes from the outside
//! world, and [`GitHubClient`] implements both over `reqwest`:
//!
//! - **[`SearchGateway`]**: one page of `/search/repositories`.
//! - **[`DetailsEnricher`]**: `/repos/{owner}/{name}`, used to backfill topics.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - HTTP 403 with `X-RateLimit-Remaining: 0` → wait for `X-RateLimit-Reset`, then retry
//! - other 4xx → fail immediately
//! - network errors → retry
//!
//! Every request is spaced at least `github.min_sleep_ms` from the previous
//! one, across all workers sharing the client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cae_harvester_core::models::RawRepo;

use crate::config::GithubConfig;

/// The search API never returns results beyond this offset.
pub const SEARCH_RESULT_CEILING: i64 = 1000;

const ACCEPT_JSON: &str = "application/vnd.github+json";
const ACCEPT_TOPICS: &str = "application/vnd.github+json, application/vnd.github.mercy-preview+json";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited after {attempts} attempts")]
    Throttled { attempts: u32 },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub total_count: i64,
    pub items: Vec<RawRepo>,
    pub has_more: bool,
}

#[async_trait]
pub trait SearchGateway: Send + Sync {
    async fn search(&self, query: &str, page: u32, per_page: u32)
        -> Result<SearchPage, GatewayError>;
}

#[async_trait]
pub trait DetailsEnricher: Send + Sync {
    async fn fetch_details(&self, full_name: &str) -> Result<RawRepo, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: i64,
    #[serde(default)]
    items: Vec<RawRepo>,
}

/// Whether another page may hold results.
///
/// A short page ends pagination, as does reaching `total_count` or the
/// search API's result ceiling.
pub fn has_more(page: u32, per_page: u32, items: usize, total_count: i64) -> bool {
    if per_page == 0 || items < per_page as usize {
        return false;
    }
    let fetched = page as i64 * per_page as i64;
    fetched < total_count.min(SEARCH_RESULT_CEILING)
}

fn is_retryable(status: StatusCode, remaining: Option<i64>) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || (status == StatusCode::FORBIDDEN && remaining == Some(0))
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Delay before retry `attempt` (0-based).
///
/// A `Retry-After` header wins, then an exhausted quota's reset time, then
/// exponential backoff. Everything is capped at `cap`.
fn retry_delay(
    attempt: u32,
    base: Duration,
    cap: Duration,
    retry_after: Option<i64>,
    reset_at: Option<i64>,
    now: i64,
) -> Duration {
    let hinted = retry_after
        .filter(|s| *s >= 0)
        .or_else(|| reset_at.map(|reset| (reset - now + 1).max(1)))
        .map(|secs| Duration::from_secs(secs as u64));

    let delay = hinted.unwrap_or_else(|| base.saturating_mul(1u32 << attempt.min(16)));
    delay.min(cap)
}

pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    sort: String,
    order: String,
    max_retries: u32,
    base_delay: Duration,
    max_backoff: Duration,
    min_sleep: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl GitHubClient {
    pub fn new(config: &GithubConfig, sort: &str, order: &str) -> anyhow::Result<Self> {
        let token = config.token();
        if token.is_none() {
            warn!(
                env = %config.token_env,
                "no GitHub token set; unauthenticated search is heavily rate limited"
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.per_request_timeout())
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            sort: sort.to_string(),
            order: order.to_string(),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            min_sleep: Duration::from_millis(config.min_sleep_ms),
            last_request: Mutex::new(None),
        })
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_sleep {
                tokio::time::sleep(self.min_sleep - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
        accept: &str,
    ) -> Result<T, GatewayError> {
        let mut last_err: Option<GatewayError> = None;

        for attempt in 0..=self.max_retries {
            self.pace().await;

            let mut request = self.http.get(url).query(params).header(ACCEPT, accept);
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            let (delay, err) = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.bytes().await?;
                        return serde_json::from_slice(&body)
                            .map_err(|e| GatewayError::Decode(e.to_string()));
                    }

                    let headers = response.headers().clone();
                    let remaining = header_i64(&headers, "x-ratelimit-remaining");
                    let body = response.text().await.unwrap_or_default();
                    let err = GatewayError::Http {
                        status: status.as_u16(),
                        body: truncate(&body, 500),
                    };
                    if !is_retryable(status, remaining) {
                        return Err(err);
                    }

                    let reset_at = if remaining == Some(0) {
                        header_i64(&headers, "x-ratelimit-reset")
                    } else {
                        None
                    };
                    let delay = retry_delay(
                        attempt,
                        self.base_delay,
                        self.max_backoff,
                        header_i64(&headers, "retry-after"),
                        reset_at,
                        chrono::Utc::now().timestamp(),
                    );
                    let err = if status == StatusCode::TOO_MANY_REQUESTS || remaining == Some(0) {
                        GatewayError::Throttled {
                            attempts: attempt + 1,
                        }
                    } else {
                        err
                    };
                    (delay, err)
                }
                Err(e) => {
                    let delay = retry_delay(attempt, self.base_delay, self.max_backoff, None, None, 0);
                    (delay, GatewayError::Request(e))
                }
            };

            if attempt < self.max_retries {
                warn!(
                    url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "GitHub request failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or(GatewayError::Throttled {
            attempts: self.max_retries + 1,
        }))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl SearchGateway for GitHubClient {
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, GatewayError> {
        let url = format!("{}/search/repositories", self.api_base);
        let params = [
            ("q", query.to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
            ("sort", self.sort.clone()),
            ("order", self.order.clone()),
        ];
        let response: SearchResponse = self.get_json(&url, &params, ACCEPT_JSON).await?;
        debug!(
            query,
            page,
            total_count = response.total_count,
            items = response.items.len(),
            "search page"
        );
        Ok(SearchPage {
            has_more: has_more(page, per_page, response.items.len(), response.total_count),
            total_count: response.total_count,
            items: response.items,
        })
    }
}

#[async_trait]
impl DetailsEnricher for GitHubClient {
    async fn fetch_details(&self, full_name: &str) -> Result<RawRepo, GatewayError> {
        let url = format!("{}/repos/{}", self.api_base, full_name);
        self.get_json(&url, &[], ACCEPT_TOPICS).await
    }
}
