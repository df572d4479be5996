use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decimal::{Money, DEFAULT_MONEY_DP, INTERNAL_DP};
use crate::errors::{LoanError, Result};
use crate::payments::MAX_INSTALLMENTS;
use crate::types::PaymentFrequency;

/// engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// decimal places of the group's currency
    pub money_precision: u32,
    /// upper bound on a single unit of work, lock wait included
    pub transaction_timeout_ms: u64,
    /// how many times a failed commit is retried from scratch
    pub max_transaction_retries: u32,
    /// prefix of the human-readable loan code
    pub loan_code_prefix: String,
    /// frequency used when a request does not name one
    pub default_frequency: PaymentFrequency,
    /// longest schedule a loan may be issued with
    pub max_installments: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            money_precision: DEFAULT_MONEY_DP,
            transaction_timeout_ms: 5_000,
            max_transaction_retries: 1,
            loan_code_prefix: "LN".to_string(),
            default_frequency: PaymentFrequency::Monthly,
            max_installments: 120,
        }
    }
}

impl EngineConfig {
    /// no retries and a short timeout
    pub fn strict() -> Self {
        Self {
            transaction_timeout_ms: 1_000,
            max_transaction_retries: 0,
            ..Self::default()
        }
    }

    /// parse from json; missing fields fall back to defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transaction_timeout_ms == 0 {
            return Err(LoanError::InvalidConfiguration {
                message: "transaction timeout must be positive".to_string(),
            });
        }
        if self.money_precision > INTERNAL_DP {
            return Err(LoanError::InvalidConfiguration {
                message: format!(
                    "money precision {} exceeds internal precision {}",
                    self.money_precision, INTERNAL_DP
                ),
            });
        }
        if self.max_installments == 0 || self.max_installments > MAX_INSTALLMENTS {
            return Err(LoanError::InvalidConfiguration {
                message: format!(
                    "max installments must be between 1 and {}, got {}",
                    MAX_INSTALLMENTS, self.max_installments
                ),
            });
        }
        if self.loan_code_prefix.trim().is_empty() {
            return Err(LoanError::InvalidConfiguration {
                message: "loan code prefix must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// smallest representable amount (0.01 at two decimal places)
    pub fn minor_unit(&self) -> Money {
        Money::minor_unit(self.money_precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transaction_timeout(), Duration::from_secs(5));
        assert_eq!(config.minor_unit(), Money::CENT);
        assert_eq!(config.max_installments, 120);
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(r#"{"money_precision": 0, "loan_code_prefix": "JT"}"#).unwrap();
        assert_eq!(config.money_precision, 0);
        assert_eq!(config.loan_code_prefix, "JT");
        assert_eq!(config.max_transaction_retries, 1);
        assert_eq!(config.minor_unit(), Money::ONE);
    }

    #[test]
    fn test_invalid_config() {
        assert!(EngineConfig::from_json(r#"{"transaction_timeout_ms": 0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"money_precision": 9}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
        assert!(EngineConfig::from_json(r#"{"max_installments": 0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"max_installments": 5000}"#).is_err());
    }

    #[test]
    fn test_strict_preset() {
        let config = EngineConfig::strict();
        assert_eq!(config.max_transaction_retries, 0);
        assert_eq!(config.transaction_timeout(), Duration::from_secs(1));
    }
}
