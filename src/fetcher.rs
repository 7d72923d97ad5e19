use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::rate_limit::RateLimiter;
use crate::record::normalize_identifier;

/// Authority prefix followed by a digit, then digits/kind-code letters.
pub static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}\d[0-9A-Z]*$").unwrap());
pub static PATENT_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/patent/([A-Za-z]{2}\d[0-9A-Za-z]*)").unwrap());

const LISTING_QUERY: &str = "search=querystring%3D%26advanced%3Dfalse&sort=%2Blicensing-order";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP error {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Http { .. } => "http_error",
            FetchError::Network(_) => "network",
            FetchError::InvalidReference(_) => "invalid_reference",
        }
    }

    /// Summary key: the kind, with the status for HTTP errors.
    pub fn label(&self) -> String {
        match self {
            FetchError::Http { status } => format!("http_error({})", status),
            other => other.kind().to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Network(_) => true,
            FetchError::Http { status } => {
                *status >= 500 || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            FetchError::InvalidReference(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_builder() {
            FetchError::InvalidReference(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::Http {
                status: status.as_u16(),
            }
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// What to fetch: a patent identifier, or an already-resolved listing page URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reference {
    Identifier(String),
    Listing(String),
}

impl Reference {
    /// Parse user input. Patent detail URLs collapse to their identifier; any
    /// other URL is treated as a listing page.
    pub fn parse(input: &str) -> Result<Self, FetchError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(FetchError::InvalidReference("empty reference".into()));
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            let url = Url::parse(input)
                .map_err(|e| FetchError::InvalidReference(format!("{}: {}", input, e)))?;
            if let Some(caps) = PATENT_PATH_RE.captures(url.path()) {
                return Ok(Reference::Identifier(normalize_identifier(&caps[1])));
            }
            return Ok(Reference::Listing(url.to_string()));
        }
        let id = normalize_identifier(input);
        if !IDENTIFIER_RE.is_match(&id) {
            return Err(FetchError::InvalidReference(format!(
                "`{}` is not an authority-prefixed patent number",
                input
            )));
        }
        Ok(Reference::Identifier(id))
    }

    /// Listing page `page` of the portal at `base`.
    pub fn listing_page(base: &str, page: u32) -> Self {
        let sep = if base.contains('?') { '&' } else { '?' };
        Reference::Listing(format!("{}{}{}&page={}&lang=en", base, sep, LISTING_QUERY, page))
    }

    pub fn is_listing(&self) -> bool {
        matches!(self, Reference::Listing(_))
    }

    /// Resolve to the URL to request.
    pub fn resolve(&self, patent_base_url: &str) -> Result<Url, FetchError> {
        let raw = match self {
            Reference::Identifier(id) => canonical_url(patent_base_url, id),
            Reference::Listing(url) => url.clone(),
        };
        Url::parse(&raw).map_err(|e| FetchError::InvalidReference(format!("{}: {}", raw, e)))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Identifier(id) => f.write_str(id),
            Reference::Listing(url) => f.write_str(url),
        }
    }
}

/// Pure mapping from identifier to its detail page.
pub fn canonical_url(base: &str, identifier: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{}/{}/en", base, normalize_identifier(identifier))
}

/// Raw markup plus response metadata.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub reference: Reference,
    pub url: String,
    pub status: u16,
    pub body: String,
    pub byte_len: usize,
    pub retrieved_at: DateTime<Utc>,
}

/// Timeout and retry budget for one logical fetch.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub max_total_wait: Duration,
    pub user_agent: String,
    pub patent_base_url: String,
}

impl FetchPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        FetchPolicy {
            timeout: s.timeout(),
            max_retries: s.max_retries,
            backoff_base: Duration::from_millis(s.backoff_base_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
            max_total_wait: Duration::from_millis(s.max_total_wait_ms),
            user_agent: s.user_agent.clone(),
            patent_base_url: s.patent_base_url.clone(),
        }
    }

    /// Exponential backoff before retry number `attempt + 1`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(policy: FetchPolicy, limiter: Arc<RateLimiter>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(policy.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Fetcher {
            client,
            limiter,
            policy,
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch one reference, retrying transient failures with backoff.
    pub async fn fetch(&self, reference: &Reference) -> Result<RawDocument, FetchError> {
        let url = reference.resolve(&self.policy.patent_base_url)?;
        let mut waited = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            let err = match self.fetch_once(reference, &url).await {
                Ok(doc) => return Ok(doc),
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.policy.max_retries {
                return Err(err);
            }
            let backoff = self.policy.backoff(attempt);
            if waited + backoff > self.policy.max_total_wait {
                warn!(
                    reference = %reference,
                    waited_ms = waited.as_millis() as u64,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            warn!(
                reference = %reference,
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                error = %err,
                backoff_ms = backoff.as_millis() as u64,
                "Transient fetch failure, backing off"
            );
            tokio::time::sleep(backoff).await;
            waited += backoff;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, reference: &Reference, url: &Url) -> Result<RawDocument, FetchError> {
        let _permit = self.limiter.acquire().await;
        debug!(url = %url, "GET");

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }
        let body = response.text().await?;
        info!(url = %final_url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(RawDocument {
            reference: reference.clone(),
            url: final_url,
            status: status.as_u16(),
            byte_len: body.len(),
            body,
            retrieved_at: Utc::now(),
        })
    }
}
