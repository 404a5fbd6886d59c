//! Shroud Configuration
//!
//! Shared configuration crate for the settlement core and the indexer.
//!
//! Handles loading configuration from:
//! 1. SHROUD_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.shroud/config.toml (user home)
//!
//! Environment variables take precedence over TOML config. The loaded
//! [`ShroudConfig`] is built once in `main` and handed to each component;
//! nothing here is global.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub mod protocol;

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".shroud";
const CONFIG_ENV_VAR: &str = "SHROUD_CONFIG";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_NOTES_DB_PATH: &str = "./shroud-db/notes";
const DEFAULT_INDEX_DB_PATH: &str = "./shroud-db/index";
const DEFAULT_INDEX_SECONDARY_PATH: &str = "./shroud-db/index-secondary";
const DEFAULT_LEDGER_URL: &str = "http://127.0.0.1:4001";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROVER_URL: &str = "http://127.0.0.1:8090";
const DEFAULT_PROOF_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_SESSION_TTL_SECS: u64 = 10 * 60;
const DEFAULT_SESSION_SWEEP_SECS: u64 = 5 * 60;
const DEFAULT_INDEXER_POLL_MS: u64 = 2_000;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShroudConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

/// Database locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Pending intents and confirmed notes (owned by the core)
    #[serde(default = "default_notes_path")]
    pub notes_path: String,
    /// Confirmed ledger index (owned by the indexer)
    #[serde(default = "default_index_path")]
    pub index_path: String,
    /// Scratch directory for the core's read-only view of the index
    #[serde(default = "default_index_secondary_path")]
    pub index_secondary_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            notes_path: DEFAULT_NOTES_DB_PATH.into(),
            index_path: DEFAULT_INDEX_DB_PATH.into(),
            index_secondary_path: DEFAULT_INDEX_SECONDARY_PATH.into(),
        }
    }
}

fn default_notes_path() -> String {
    DEFAULT_NOTES_DB_PATH.into()
}
fn default_index_path() -> String {
    DEFAULT_INDEX_DB_PATH.into()
}
fn default_index_secondary_path() -> String {
    DEFAULT_INDEX_SECONDARY_PATH.into()
}

/// Ledger node connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_url")]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LEDGER_URL.into(),
            token: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_ledger_url() -> String {
    DEFAULT_LEDGER_URL.into()
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Protocol parameters shared with the on-chain verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Application id of the pool contract
    #[serde(default)]
    pub app_id: u64,
    /// Custody address of the pool (bs58)
    #[serde(default)]
    pub app_address: String,
    /// Validity window of a bundle, and the confirmation wait bound
    #[serde(default = "default_wait_rounds")]
    pub wait_rounds: u64,
    /// Top-level operations the verifier needs for its compute budget
    #[serde(default = "default_budget_operations")]
    pub budget_operations: usize,
    #[serde(default = "default_deposit_fee_multiplier")]
    pub deposit_fee_multiplier: u64,
    #[serde(default = "default_withdrawal_fee_multiplier")]
    pub withdrawal_fee_multiplier: u64,
    #[serde(default = "default_deposit_minimum")]
    pub deposit_minimum: u64,
    #[serde(default = "default_withdrawal_fee_divisor")]
    pub withdrawal_fee_divisor: u64,
    #[serde(default = "default_withdrawal_minimum_fee")]
    pub withdrawal_minimum_fee: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            app_id: 0,
            app_address: String::new(),
            wait_rounds: protocol::WAIT_ROUNDS,
            budget_operations: protocol::BUDGET_OPERATIONS,
            deposit_fee_multiplier: protocol::DEPOSIT_FEE_MULTIPLIER,
            withdrawal_fee_multiplier: protocol::WITHDRAWAL_FEE_MULTIPLIER,
            deposit_minimum: protocol::DEPOSIT_MINIMUM,
            withdrawal_fee_divisor: protocol::WITHDRAWAL_FEE_DIVISOR,
            withdrawal_minimum_fee: protocol::WITHDRAWAL_MINIMUM_FEE,
        }
    }
}

fn default_wait_rounds() -> u64 {
    protocol::WAIT_ROUNDS
}
fn default_budget_operations() -> usize {
    protocol::BUDGET_OPERATIONS
}
fn default_deposit_fee_multiplier() -> u64 {
    protocol::DEPOSIT_FEE_MULTIPLIER
}
fn default_withdrawal_fee_multiplier() -> u64 {
    protocol::WITHDRAWAL_FEE_MULTIPLIER
}
fn default_deposit_minimum() -> u64 {
    protocol::DEPOSIT_MINIMUM
}
fn default_withdrawal_fee_divisor() -> u64 {
    protocol::WITHDRAWAL_FEE_DIVISOR
}
fn default_withdrawal_minimum_fee() -> u64 {
    protocol::WITHDRAWAL_MINIMUM_FEE
}

/// Paths to the protocol signing keys (hex-encoded 32-byte ed25519 seeds)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub deposit_verifier_path: Option<String>,
    #[serde(default)]
    pub withdrawal_verifier_path: Option<String>,
    #[serde(default)]
    pub tss_path: Option<String>,
}

/// Prover mode for TOML config
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProverMode {
    #[default]
    Mock,
    Remote,
}

/// Proof system connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverConfig {
    #[serde(default)]
    pub mode: ProverMode,
    #[serde(default = "default_prover_url")]
    pub url: String,
    #[serde(default = "default_proof_timeout")]
    pub proof_timeout_secs: u64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            mode: ProverMode::Mock,
            url: DEFAULT_PROVER_URL.into(),
            proof_timeout_secs: DEFAULT_PROOF_TIMEOUT_SECS,
        }
    }
}

fn default_prover_url() -> String {
    DEFAULT_PROVER_URL.into()
}
fn default_proof_timeout() -> u64 {
    DEFAULT_PROOF_TIMEOUT_SECS
}

/// Background task schedules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_staleness_days")]
    pub staleness_days: i64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_session_sweep")]
    pub session_sweep_secs: u64,
    #[serde(default = "default_indexer_poll")]
    pub indexer_poll_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            staleness_days: protocol::STALENESS_DAYS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            session_sweep_secs: DEFAULT_SESSION_SWEEP_SECS,
            indexer_poll_ms: DEFAULT_INDEXER_POLL_MS,
        }
    }
}

fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}
fn default_staleness_days() -> i64 {
    protocol::STALENESS_DAYS
}
fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_session_sweep() -> u64 {
    DEFAULT_SESSION_SWEEP_SECS
}
fn default_indexer_poll() -> u64 {
    DEFAULT_INDEXER_POLL_MS
}

/// Feature flags
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Run against the in-process ledger with freshly generated keys
    #[serde(default)]
    pub dev_mode: bool,
    /// Amount of the dev-mode startup deposit, in whole units ("2.5").
    /// Unset means the deposit minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_deposit: Option<String>,
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

/// Set field from env var if present
fn env_string(key: &str, field: &mut String) {
    if let Ok(v) = env::var(key) {
        *field = v;
    }
}

/// Set Option<String> from env var if present
fn env_option_string(key: &str, field: &mut Option<String>) {
    if let Ok(v) = env::var(key) {
        *field = Some(v);
    }
}

/// Set field from env var if present and parseable
fn env_parse<T: std::str::FromStr>(key: &str, field: &mut T) {
    if let Ok(v) = env::var(key) {
        if let Ok(parsed) = v.parse() {
            *field = parsed;
        }
    }
}

/// Check if env var is set to a truthy value ("1" or "true")
fn env_bool(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

// ============================================================================
// Implementation
// ============================================================================

impl ShroudConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot use
    pub fn validate(&self) -> Result<()> {
        let m = &self.maintenance;
        ensure!(m.reconcile_interval_secs > 0, "maintenance.reconcile_interval_secs must be positive");
        ensure!(m.session_sweep_secs > 0, "maintenance.session_sweep_secs must be positive");
        ensure!(m.indexer_poll_ms > 0, "maintenance.indexer_poll_ms must be positive");
        ensure!(m.staleness_days >= 0, "maintenance.staleness_days must not be negative");
        Ok(())
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Database
        env_string("SHROUD_NOTES_DB", &mut self.database.notes_path);
        env_string("SHROUD_INDEX_DB", &mut self.database.index_path);
        env_string(
            "SHROUD_INDEX_SECONDARY_DB",
            &mut self.database.index_secondary_path,
        );

        // Ledger
        env_string("SHROUD_LEDGER_URL", &mut self.ledger.url);
        env_string("SHROUD_LEDGER_TOKEN", &mut self.ledger.token);
        env_parse(
            "SHROUD_LEDGER_TIMEOUT_SECS",
            &mut self.ledger.request_timeout_secs,
        );

        // Protocol
        env_parse("SHROUD_APP_ID", &mut self.protocol.app_id);
        env_string("SHROUD_APP_ADDRESS", &mut self.protocol.app_address);
        env_parse("SHROUD_WAIT_ROUNDS", &mut self.protocol.wait_rounds);

        // Keys
        env_option_string(
            "SHROUD_DEPOSIT_VERIFIER_KEY",
            &mut self.keys.deposit_verifier_path,
        );
        env_option_string(
            "SHROUD_WITHDRAWAL_VERIFIER_KEY",
            &mut self.keys.withdrawal_verifier_path,
        );
        env_option_string("SHROUD_TSS_KEY", &mut self.keys.tss_path);

        // Prover
        if let Ok(v) = env::var("SHROUD_PROVER_MODE") {
            self.prover.mode = match v.to_ascii_lowercase().as_str() {
                "remote" => ProverMode::Remote,
                _ => ProverMode::Mock,
            };
        }
        env_string("SHROUD_PROVER_URL", &mut self.prover.url);

        // Maintenance
        env_parse(
            "SHROUD_RECONCILE_INTERVAL_SECS",
            &mut self.maintenance.reconcile_interval_secs,
        );
        env_parse("SHROUD_STALENESS_DAYS", &mut self.maintenance.staleness_days);
        env_parse("SHROUD_INDEXER_POLL_MS", &mut self.maintenance.indexer_poll_ms);

        // Features
        if let Some(v) = env_bool("SHROUD_DEV_MODE") {
            self.features.dev_mode = v;
        }
        env_option_string("SHROUD_DEV_DEPOSIT", &mut self.features.dev_deposit);
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.features.dev_mode = true;
        sample.keys.tss_path = Some("./keys/tss.key".into());
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShroudConfig::default();
        assert_eq!(config.database.notes_path, DEFAULT_NOTES_DB_PATH);
        assert_eq!(config.ledger.url, DEFAULT_LEDGER_URL);
        assert_eq!(config.prover.mode, ProverMode::Mock);
        assert_eq!(config.protocol.budget_operations, 8);
        assert_eq!(config.maintenance.staleness_days, 7);
        assert!(!config.features.dev_mode);
    }

    #[test]
    fn test_generate_sample() {
        let sample = ShroudConfig::generate_sample();
        assert!(sample.contains("[database]"));
        assert!(sample.contains("[ledger]"));
        assert!(sample.contains("[protocol]"));
        assert!(sample.contains("[maintenance]"));
        assert!(sample.contains("[features]"));
    }

    #[test]
    fn test_parse_sample() {
        let sample = ShroudConfig::generate_sample();
        let parsed: ShroudConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.ledger.url, DEFAULT_LEDGER_URL);
        assert_eq!(parsed.keys.tss_path.as_deref(), Some("./keys/tss.key"));
        assert!(parsed.features.dev_mode);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ShroudConfig = toml::from_str(
            r#"
            [protocol]
            app_id = 7
            wait_rounds = 4

            [prover]
            mode = "remote"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.protocol.app_id, 7);
        assert_eq!(parsed.protocol.wait_rounds, 4);
        assert_eq!(parsed.protocol.deposit_fee_multiplier, 42);
        assert_eq!(parsed.prover.mode, ProverMode::Remote);
        assert_eq!(parsed.prover.url, DEFAULT_PROVER_URL);
        assert_eq!(parsed.database.index_path, DEFAULT_INDEX_DB_PATH);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[ledger]\nurl = \"http://node:4001\"\n").unwrap();

        let config = ShroudConfig::load_from(&path).unwrap();
        assert!(!config.ledger.url.is_empty());
        assert_eq!(config.maintenance.session_ttl_secs, 600);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[maintenance]\nreconcile_interval_secs = 0\n").unwrap();

        let err = ShroudConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("reconcile_interval_secs"));

        let mut config = ShroudConfig::default();
        assert!(config.validate().is_ok());
        config.maintenance.session_sweep_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let result = ShroudConfig::load_from(Path::new("/nonexistent/shroud.toml"));
        assert!(result.is_err());
    }
}
