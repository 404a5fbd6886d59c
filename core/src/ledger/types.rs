use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512_256};
use wincode::{SchemaRead, SchemaWrite};

/// A ledger account: the ed25519 public key that authorizes its operations.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }

    /// Custody account of an application, derived from its id
    pub fn for_application(app_id: u64) -> Self {
        let mut hasher = Sha512_256::new();
        hasher.update(b"appID");
        hasher.update(app_id.to_be_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).context("address is not a valid ed25519 key")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .with_context(|| format!("invalid base58 address: {s}"))?;
        if bytes.len() != 32 {
            bail!("address must decode to 32 bytes, got {}", bytes.len());
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// Fee and validity parameters for the next bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedParams {
    /// Minimum fee per operation, in base units
    pub min_fee: u64,
    /// First round in which a new operation is valid
    pub first_valid: u64,
}

/// Confirmation of a single operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hex operation id
    pub id: String,
    pub confirmed_round: u64,
    /// Logs emitted by the operation, in order
    #[serde(with = "b64_list")]
    pub logs: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: u64,
    pub min_balance: u64,
}

/// A confirmed call into the pool contract, as reported to the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    pub round: u64,
    /// Hex id of the proof-carrying operation
    pub settlement_id: String,
    pub sender: Address,
    #[serde(with = "b64_list")]
    pub args: Vec<Vec<u8>>,
    pub accounts: Vec<Address>,
    #[serde(with = "b64_list")]
    pub logs: Vec<Vec<u8>>,
}

/// Byte lists travel as base64 strings in the node's JSON
pub(crate) mod b64_list {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&STANDARD.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| STANDARD.decode(s).map_err(D::Error::custom))
            .collect()
    }
}
