use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::collaborators::ledger_gateway::LedgerGatewayConfig;
use crate::collaborators::paystack::PaymentProcessorConfig;
use crate::distribution::DistributionSettings;
use crate::investment::InvestmentSettings;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    /// Supply ledger is kept in Postgres when set, in memory otherwise
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_postgres_max_connections")]
    pub postgres_max_connections: u32,
    #[serde(default)]
    pub payment_processor: Option<PaymentProcessorConfig>,
    #[serde(default)]
    pub ledger_gateway: Option<LedgerGatewayConfig>,
}

fn default_postgres_max_connections() -> u32 {
    crate::db::DEFAULT_MAX_CONNECTIONS
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Named settlement knobs
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub reservation_hold_secs: u64,
    pub sweep_interval_secs: u64,
    pub withholding_rate: Decimal,
    pub currency: String,
    pub currency_decimals: u32,
    pub payout_timeout_ms: u64,
    pub payout_concurrency: usize,
    pub delivery_retry_base_ms: u64,
    pub delivery_max_attempts: u32,
    pub delivery_scan_interval_secs: u64,
    pub token_id: String,
    pub treasury_account: String,
    pub audit_topic_id: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            reservation_hold_secs: 900,
            sweep_interval_secs: 30,
            withholding_rate: Decimal::new(10, 2),
            currency: "NGN".to_string(),
            currency_decimals: 2,
            payout_timeout_ms: 30_000,
            payout_concurrency: 16,
            delivery_retry_base_ms: 5_000,
            delivery_max_attempts: 8,
            delivery_scan_interval_secs: 10,
            token_id: "0.0.4242".to_string(),
            treasury_account: "0.0.1001".to_string(),
            audit_topic_id: "0.0.2002".to_string(),
        }
    }
}

impl SettlementConfig {
    pub fn reservation_hold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_hold_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn investment_settings(&self) -> InvestmentSettings {
        InvestmentSettings {
            currency: self.currency.clone(),
            currency_decimals: self.currency_decimals,
            treasury_account: self.treasury_account.clone(),
            audit_topic_id: self.audit_topic_id.clone(),
            delivery_retry_base: chrono::Duration::milliseconds(self.delivery_retry_base_ms as i64),
            delivery_max_attempts: self.delivery_max_attempts,
        }
    }

    pub fn distribution_settings(&self) -> DistributionSettings {
        DistributionSettings {
            withholding_rate: self.withholding_rate,
            currency: self.currency.clone(),
            currency_decimals: self.currency_decimals,
            payout_timeout: Duration::from_millis(self.payout_timeout_ms),
            payout_concurrency: self.payout_concurrency,
            audit_topic_id: self.audit_topic_id.clone(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.reservation_hold_secs > 0, "reservation_hold_secs must be positive");
        anyhow::ensure!(
            self.withholding_rate >= Decimal::ZERO && self.withholding_rate < Decimal::ONE,
            "withholding_rate must be in [0, 1)"
        );
        anyhow::ensure!(self.currency_decimals <= 8, "currency_decimals must be at most 8");
        anyhow::ensure!(self.payout_concurrency > 0, "payout_concurrency must be positive");
        anyhow::ensure!(self.delivery_max_attempts > 0, "delivery_max_attempts must be positive");
        Ok(())
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let config: AppConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config yaml: {}", config_path))?;
        config.settlement.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
log_level: info
log_dir: ./logs
log_file: settlement.log
use_json: false
rotation: daily
gateway:
  host: 0.0.0.0
  port: 8080
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.settlement.reservation_hold_secs, 900);
        assert_eq!(config.settlement.withholding_rate, Decimal::new(1, 1));
        assert!(config.postgres_url.is_none());
        assert!(config.payment_processor.is_none());
        assert!(config.settlement.validate().is_ok());
    }

    #[test]
    fn test_settlement_overrides() {
        let yaml = format!(
            "{}settlement:\n  reservation_hold_secs: 600\n  withholding_rate: \"0.075\"\n",
            MINIMAL
        );
        let config: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.settlement.reservation_hold(), chrono::Duration::minutes(10));
        assert_eq!(config.settlement.withholding_rate, Decimal::new(75, 3));
        assert_eq!(config.settlement.currency, "NGN");
    }

    #[test]
    fn test_rejects_full_withholding() {
        let settlement = SettlementConfig {
            withholding_rate: Decimal::ONE,
            ..SettlementConfig::default()
        };
        assert!(settlement.validate().is_err());
    }

    #[test]
    fn test_dev_config_parses() {
        let content = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.yaml"))
            .unwrap();
        let config: AppConfig = serde_yaml::from_str(&content).unwrap();
        assert!(config.settlement.validate().is_ok());
    }
}
