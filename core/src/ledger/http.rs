//! HTTP client for a ledger node's REST API.
//!
//! ```text
//! GET  /v2/transactions/params                 → SuggestedParams
//! POST /v2/transactions                        ← signed bundle bytes
//! GET  /v2/transactions/pending/{id}           → confirmation / pool error
//! GET  /v2/status                              → last round
//! GET  /v2/status/wait-for-block-after/{round} → blocks until round+1
//! GET  /v2/accounts/{address}                  → AccountInfo
//! GET  /v2/protocol/events?after={round}       → ProtocolEvent list
//! ```

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use shroud_config::LedgerConfig;
use tracing::debug;

use super::LedgerClient;
use super::types::{AccountInfo, Address, ProtocolEvent, Receipt, SuggestedParams};

const TOKEN_HEADER: &str = "X-Algo-API-Token";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ParamsResponse {
    #[serde(rename = "min-fee")]
    min_fee: u64,
    #[serde(rename = "last-round")]
    last_round: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "last-round")]
    last_round: u64,
}

#[derive(Debug, Deserialize)]
struct PendingResponse {
    #[serde(rename = "confirmed-round", default)]
    confirmed_round: Option<u64>,
    #[serde(rename = "pool-error", default)]
    pool_error: String,
    #[serde(default)]
    logs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    amount: u64,
    #[serde(rename = "min-balance", default)]
    min_balance: u64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<ProtocolEvent>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

// ============================================================================
// Client
// ============================================================================

pub struct HttpLedgerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;

        if !response.status().is_success() {
            bail!("{}", error_message(response).await);
        }

        response
            .json()
            .await
            .with_context(|| format!("GET {path}: malformed response"))
    }

    async fn last_round(&self) -> Result<u64> {
        let status: StatusResponse = self.get_json("/v2/status").await?;
        Ok(status.last_round)
    }
}

/// The node's own error text, which callers classify by substring
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => err.message,
        Err(_) if !body.is_empty() => body,
        Err(_) => format!("HTTP {status}"),
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn suggested_params(&self) -> Result<SuggestedParams> {
        let params: ParamsResponse = self.get_json("/v2/transactions/params").await?;
        Ok(SuggestedParams {
            min_fee: params.min_fee,
            first_valid: params.last_round,
        })
    }

    async fn submit_bundle(&self, signed: &[u8]) -> Result<()> {
        let response = self
            .client
            .post(self.url("/v2/transactions"))
            .header(TOKEN_HEADER, &self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-binary")
            .body(signed.to_vec())
            .send()
            .await
            .context("POST /v2/transactions failed")?;

        if !response.status().is_success() {
            bail!("{}", error_message(response).await);
        }
        Ok(())
    }

    async fn wait_for_confirmation(&self, id: &str, max_rounds: u64) -> Result<Receipt> {
        let start = self.last_round().await?;
        let mut current = start;

        while current < start + max_rounds {
            let pending: PendingResponse = self
                .get_json(&format!("/v2/transactions/pending/{id}"))
                .await?;

            if let Some(round) = pending.confirmed_round.filter(|r| *r > 0) {
                let logs = pending
                    .logs
                    .iter()
                    .map(|l| STANDARD.decode(l))
                    .collect::<Result<Vec<_>, _>>()
                    .context("undecodable log in receipt")?;
                return Ok(Receipt {
                    id: id.to_string(),
                    confirmed_round: round,
                    logs,
                });
            }
            if !pending.pool_error.is_empty() {
                bail!("Transaction rejected: {}", pending.pool_error);
            }

            debug!(id, round = current, "waiting for confirmation");
            let _: StatusResponse = self
                .get_json(&format!("/v2/status/wait-for-block-after/{current}"))
                .await?;
            current += 1;
        }

        bail!("Wait for transaction id {id} timed out after {max_rounds} rounds")
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo> {
        let account: AccountResponse = self.get_json(&format!("/v2/accounts/{address}")).await?;
        Ok(AccountInfo {
            balance: account.amount,
            min_balance: account.min_balance,
        })
    }

    async fn protocol_events(&self, after_round: u64) -> Result<Vec<ProtocolEvent>> {
        let response: EventsResponse = self
            .get_json(&format!("/v2/protocol/events?after={after_round}"))
            .await?;
        Ok(response.events)
    }
}
