//! Remote Prover Client
//!
//! HTTP client for an external proving service.
//!
//! ```text
//! GroupBuilder ──▶ RemoteProver::prove()
//!                      │  POST /v1/prove  { circuit, public_inputs, private }
//!                      ▼
//!               Proving service ──▶ { status: "success", data: { proof, public_inputs } }
//! ```

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shroud_config::ProverConfig;
use tracing::{debug, info};

use super::prover::{Prover, Witness, ZkArgs};

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProveRequest {
    pub circuit: String,
    /// Hex-encoded 32-byte public inputs, in verifier order
    pub public_inputs: Vec<String>,
    /// Hex-encoded private inputs by name
    pub private: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProveResult {
    /// Hex-encoded 32-byte proof blocks
    pub proof: Vec<String>,
    pub public_inputs: Vec<String>,
    #[serde(default)]
    pub proving_time_ms: u64,
}

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success {
        data: T,
    },
    Error {
        message: String,
        code: Option<String>,
    },
}

// ============================================================================
// Client
// ============================================================================

pub struct RemoteProver {
    url: String,
    client: reqwest::Client,
}

impl RemoteProver {
    pub fn new(config: &ProverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proof_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request_for(witness: &Witness) -> ProveRequest {
        let public_inputs = witness.public_inputs().iter().map(hex::encode).collect();
        let private = match witness {
            Witness::Deposit { note } => vec![
                ("k".to_string(), hex::encode(note.k)),
                ("r".to_string(), hex::encode(note.r)),
            ],
            Witness::Withdrawal {
                note, change, path, ..
            } => {
                let mut private = vec![
                    ("note_amount".to_string(), format!("{:016x}", note.amount)),
                    ("k".to_string(), hex::encode(note.k)),
                    ("r".to_string(), hex::encode(note.r)),
                    ("change_k".to_string(), hex::encode(change.k)),
                    ("change_r".to_string(), hex::encode(change.r)),
                    ("leaf_index".to_string(), path.leaf_index.to_string()),
                ];
                private.extend(
                    path.path()
                        .iter()
                        .enumerate()
                        .map(|(i, node)| (format!("path_{i}"), hex::encode(node))),
                );
                private
            }
        };

        ProveRequest {
            circuit: witness.circuit().to_string(),
            public_inputs,
            private,
        }
    }
}

fn decode_blocks(items: &[String], what: &str) -> Result<Vec<[u8; 32]>> {
    items
        .iter()
        .map(|item| {
            let mut block = [0u8; 32];
            hex::decode_to_slice(item, &mut block)
                .with_context(|| format!("malformed {what} block from prover"))?;
            Ok(block)
        })
        .collect()
}

#[async_trait]
impl Prover for RemoteProver {
    async fn prove(&self, witness: &Witness) -> Result<ZkArgs> {
        let request = Self::request_for(witness);
        debug!(circuit = %request.circuit, "requesting proof");

        let response: ApiResponse<ProveResult> = self
            .client
            .post(format!("{}/v1/prove", self.url))
            .json(&request)
            .send()
            .await
            .context("Failed to reach prover")?
            .json()
            .await
            .context("Failed to parse prover response")?;

        let result = match response {
            ApiResponse::Success { data } => data,
            ApiResponse::Error { message, code } => {
                return Err(anyhow!(
                    "prover error {}: {}",
                    code.unwrap_or_default(),
                    message
                ));
            }
        };

        let public_inputs = decode_blocks(&result.public_inputs, "public input")?;
        if public_inputs != witness.public_inputs() {
            bail!("prover returned public inputs for a different statement");
        }

        info!(
            circuit = witness.circuit(),
            time_ms = result.proving_time_ms,
            "proof generated"
        );
        Ok(ZkArgs {
            proof: decode_blocks(&result.proof, "proof")?,
            public_inputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_privacy::Note;

    #[test]
    fn test_request_carries_public_inputs() {
        let note = Note::from_parts(3, [1; 31], [2; 31]);
        let witness = Witness::Deposit { note };
        let request = RemoteProver::request_for(&witness);
        assert_eq!(request.circuit, "deposit");
        assert_eq!(request.public_inputs.len(), 2);
        assert_eq!(request.public_inputs[0].len(), 64);
    }

    #[test]
    fn test_api_response_tagging() {
        let ok: ApiResponse<ProveResult> = serde_json::from_str(
            r#"{"status":"success","data":{"proof":["00"],"public_inputs":[]}}"#,
        )
        .unwrap();
        assert!(matches!(ok, ApiResponse::Success { .. }));

        let err: ApiResponse<ProveResult> =
            serde_json::from_str(r#"{"status":"error","message":"busy","code":null}"#).unwrap();
        assert!(matches!(err, ApiResponse::Error { message, .. } if message == "busy"));
    }

    #[test]
    fn test_decode_blocks_rejects_short() {
        assert!(decode_blocks(&["00".to_string()], "proof").is_err());
        assert_eq!(
            decode_blocks(&[hex::encode([9u8; 32])], "proof").unwrap(),
            vec![[9u8; 32]]
        );
    }
}
