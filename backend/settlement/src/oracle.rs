//! Price oracle client: fetches the closing [`ValuationSnapshot`].
//!
//! ## Resilience
//!
//! * Transport errors, `429` and `5xx` responses are retried with exponential
//!   back-off, capped at [`MAX_BACKOFF_SECS`] seconds between attempts.
//! * Any other non-success status fails immediately.
//! * After `ORACLE_MAX_ATTEMPTS` attempts the snapshot is reported as
//!   unavailable and the caller retries on its next tick.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use vcoin_core::{Price, ValuationSnapshot};

use crate::config::Config;
use crate::errors::{Result, SettlementError};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;

/// Source of closing prices for the settlement job.
pub trait PriceOracle: Send + Sync {
    fn snapshot(&self) -> impl Future<Output = Result<ValuationSnapshot>> + Send;
}

/// `GET {ORACLE_URL}/prices/{ORACLE_ASSET}` response body.
#[derive(Debug, Deserialize)]
pub struct PriceResponse {
    /// Decimal string such as `"0.75"`; a bare JSON number is accepted too.
    pub price: Value,
    /// RFC 3339; the time of receipt is used when absent.
    pub observed_at: Option<String>,
}

pub struct HttpPriceOracle {
    client: Client,
    url: String,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl HttpPriceOracle {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: format!(
                "{}/prices/{}",
                config.oracle_url.trim_end_matches('/'),
                config.oracle_asset
            ),
            max_attempts: config.oracle_max_attempts,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub async fn fetch_snapshot(&self) -> Result<ValuationSnapshot> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let reason = match self.client.get(&self.url).send().await {
                Err(e) => format!("request failed: {e}"),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let body: PriceResponse = resp.json().await?;
                        let snapshot = parse_snapshot(body)?;
                        debug!(
                            "Fetched price {} observed at {}",
                            snapshot.price, snapshot.observed_at
                        );
                        return Ok(snapshot);
                    }
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(SettlementError::Oracle(format!(
                            "{} returned {status}",
                            self.url
                        )));
                    }
                    format!("returned {status}")
                }
            };

            if attempt >= self.max_attempts {
                return Err(SettlementError::Oracle(format!(
                    "giving up after {attempt} attempts, last: {reason}"
                )));
            }
            warn!(
                "Price oracle unavailable (attempt {attempt}/{}, will retry in {backoff:?}): {reason}",
                self.max_attempts
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }
}

impl PriceOracle for HttpPriceOracle {
    fn snapshot(&self) -> impl Future<Output = Result<ValuationSnapshot>> + Send {
        self.fetch_snapshot()
    }
}

fn parse_snapshot(body: PriceResponse) -> Result<ValuationSnapshot> {
    let raw = match body.price {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => {
            return Err(SettlementError::Oracle(format!(
                "unexpected price field: {other}"
            )))
        }
    };
    let price: Price = raw
        .parse()
        .map_err(|e: vcoin_core::Error| SettlementError::Oracle(e.to_string()))?;

    let observed_at = match body.observed_at {
        Some(ts) => DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| SettlementError::Oracle(format!("invalid observed_at `{ts}`: {e}")))?
            .timestamp(),
        None => Utc::now().timestamp(),
    };

    Ok(ValuationSnapshot { price, observed_at })
}
