use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use shroud_config::KeysConfig;

use crate::bundle::ProtocolAccounts;
use crate::ledger::Address;

/// Protocol-held signing keys. The user's key is never here.
pub struct ProtocolKeys {
    /// Signs deposit verification calls
    pub deposit_verifier: SigningKey,
    /// Signs withdrawal verification calls
    pub withdrawal_verifier: SigningKey,
    /// Signs budget padding; pays the withdrawal fee
    pub tss: SigningKey,
}

impl ProtocolKeys {
    /// Load hex-encoded 32-byte seeds from the configured paths
    pub fn load(config: &KeysConfig) -> Result<Self> {
        Ok(Self {
            deposit_verifier: load_key(config.deposit_verifier_path.as_deref(), "deposit verifier")?,
            withdrawal_verifier: load_key(
                config.withdrawal_verifier_path.as_deref(),
                "withdrawal verifier",
            )?,
            tss: load_key(config.tss_path.as_deref(), "tss")?,
        })
    }

    /// Fresh random keys (dev mode and tests)
    pub fn generate() -> Self {
        Self {
            deposit_verifier: random_key(),
            withdrawal_verifier: random_key(),
            tss: random_key(),
        }
    }

    pub fn accounts(&self) -> ProtocolAccounts {
        ProtocolAccounts {
            deposit_verifier: Address::from_verifying_key(&self.deposit_verifier.verifying_key()),
            withdrawal_verifier: Address::from_verifying_key(
                &self.withdrawal_verifier.verifying_key(),
            ),
            tss: Address::from_verifying_key(&self.tss.verifying_key()),
        }
    }
}

impl std::fmt::Debug for ProtocolKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolKeys")
            .field("accounts", &self.accounts())
            .finish_non_exhaustive()
    }
}

fn random_key() -> SigningKey {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed)
}

fn load_key(path: Option<&str>, name: &str) -> Result<SigningKey> {
    let path = path.ok_or_else(|| anyhow!("no key path configured for {name}"))?;
    read_seed_file(Path::new(path)).with_context(|| format!("Failed to load {name} key"))
}

fn read_seed_file(path: &Path) -> Result<SigningKey> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let mut seed = [0u8; 32];
    hex::decode_to_slice(contents.trim(), &mut seed)
        .with_context(|| format!("{} must hold 64 hex characters", path.display()))?;
    Ok(SigningKey::from_bytes(&seed))
}
