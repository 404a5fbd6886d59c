use anyhow::{Context, Result};
use shroud_config::ProtocolConfig;

use crate::ledger::Address;

/// Protocol parameters resolved once at startup and shared by reference
#[derive(Debug, Clone)]
pub struct ProtocolParams {
    pub app_id: u64,
    /// Custody account that receives deposits and pays withdrawals
    pub app_address: Address,
    pub wait_rounds: u64,
    pub budget_operations: usize,
    pub deposit_fee_multiplier: u64,
    pub withdrawal_fee_multiplier: u64,
    pub deposit_minimum: u64,
    pub withdrawal_fee_divisor: u64,
    pub withdrawal_minimum_fee: u64,
}

impl ProtocolParams {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        let app_address = if config.app_address.is_empty() {
            Address::for_application(config.app_id)
        } else {
            config
                .app_address
                .parse()
                .context("invalid protocol.app_address")?
        };

        Ok(Self {
            app_id: config.app_id,
            app_address,
            wait_rounds: config.wait_rounds,
            budget_operations: config.budget_operations,
            deposit_fee_multiplier: config.deposit_fee_multiplier,
            withdrawal_fee_multiplier: config.withdrawal_fee_multiplier,
            deposit_minimum: config.deposit_minimum,
            withdrawal_fee_divisor: config.withdrawal_fee_divisor,
            withdrawal_minimum_fee: config.withdrawal_minimum_fee,
        })
    }

    /// Defaults for an application id, used by dev mode and tests
    pub fn for_app(app_id: u64) -> Self {
        let config = ProtocolConfig {
            app_id,
            ..ProtocolConfig::default()
        };
        Self {
            app_id,
            app_address: Address::for_application(app_id),
            wait_rounds: config.wait_rounds,
            budget_operations: config.budget_operations,
            deposit_fee_multiplier: config.deposit_fee_multiplier,
            withdrawal_fee_multiplier: config.withdrawal_fee_multiplier,
            deposit_minimum: config.deposit_minimum,
            withdrawal_fee_divisor: config.withdrawal_fee_divisor,
            withdrawal_minimum_fee: config.withdrawal_minimum_fee,
        }
    }

    /// Protocol fee charged on a withdrawal of `amount`
    pub fn withdrawal_fee(&self, amount: u64) -> u64 {
        (amount / self.withdrawal_fee_divisor.max(1)).max(self.withdrawal_minimum_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_fee_floor_and_rate() {
        let params = ProtocolParams::for_app(1);
        assert_eq!(params.withdrawal_fee(1_000_000), 100_000);
        assert_eq!(params.withdrawal_fee(100_000_000), 100_000);
        assert_eq!(params.withdrawal_fee(500_000_000), 500_000);
    }

    #[test]
    fn test_app_address_from_config() {
        let derived = ProtocolParams::from_config(&ProtocolConfig {
            app_id: 12,
            ..ProtocolConfig::default()
        })
        .unwrap();
        assert_eq!(derived.app_address, Address::for_application(12));

        let explicit = Address([8; 32]);
        let parsed = ProtocolParams::from_config(&ProtocolConfig {
            app_id: 12,
            app_address: explicit.to_string(),
            ..ProtocolConfig::default()
        })
        .unwrap();
        assert_eq!(parsed.app_address, explicit);

        assert!(
            ProtocolParams::from_config(&ProtocolConfig {
                app_address: "bogus!".into(),
                ..ProtocolConfig::default()
            })
            .is_err()
        );
    }
}
