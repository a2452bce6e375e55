use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::execution::fees::{gwei_to_wei, FeePolicy};
use crate::execution::ledger::FeeMode;
use crate::price_feed::fixed_point::MAX_SCALE;
use crate::price_feed::{Threshold, UpdatePolicy};

/// Environment as read, before any cross-field checks
#[derive(Debug, Deserialize, Validate)]
struct RawConfig {
    #[validate(url)]
    rpc_url: String,
    #[validate(length(min = 1))]
    bot_private_key: String,
    #[validate(length(min = 1))]
    contract_address: String,
    #[validate(length(min = 1))]
    token_address: String,
    #[serde(default)]
    token_name: String,
    #[serde(default)]
    token_symbol: String,
    #[serde(default = "default_network")]
    #[validate(length(min = 1))]
    price_network: String,
    #[validate(url)]
    price_api_url: String,
    #[serde(default = "default_decimals")]
    price_decimals: u32,
    /// Plain fraction: `0.005` is 0.5%. The older bot read this key in
    /// thousandths (`5` meant 0.5%).
    price_change_threshold: String,
    #[serde(default = "default_policy")]
    update_policy: String,

    #[serde(default = "default_gas_limit")]
    #[validate(range(min = 21000))]
    default_gas_limit: u64,
    #[serde(default = "default_fee_mode")]
    fee_mode: String,
    base_fee_gwei: Option<String>,
    max_fee_per_gas_gwei: Option<String>,
    #[serde(default = "default_increment")]
    fee_increment_gwei: String,
    #[serde(default = "default_fallback")]
    fallback_fee_gwei: String,
    max_fee_gwei: Option<String>,
    #[serde(default = "default_priority")]
    priority_fee_gwei: String,
    #[serde(default = "default_attempts")]
    #[validate(range(min = 1))]
    max_submit_attempts: u32,

    #[serde(default = "default_interval")]
    #[validate(range(min = 1))]
    check_interval: u64,
    #[serde(default = "default_cycle_timeout")]
    #[validate(range(min = 1))]
    cycle_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    #[validate(range(min = 1))]
    fetch_timeout_secs: u64,
    #[serde(default = "default_rpc_timeout")]
    #[validate(range(min = 1))]
    rpc_timeout_secs: u64,
    #[serde(default = "default_confirmation_timeout")]
    #[validate(range(min = 1))]
    confirmation_timeout_secs: u64,
    #[serde(default = "default_throttle_retries")]
    max_throttle_retries: u32,

    status_bind_address: Option<String>,
}

fn default_network() -> String {
    "ethereum".to_string()
}
fn default_decimals() -> u32 {
    8
}
fn default_policy() -> String {
    "threshold".to_string()
}
fn default_gas_limit() -> u64 {
    100_000
}
fn default_fee_mode() -> String {
    "legacy".to_string()
}
fn default_increment() -> String {
    "1".to_string()
}
fn default_fallback() -> String {
    "20".to_string()
}
fn default_priority() -> String {
    "1".to_string()
}
fn default_attempts() -> u32 {
    10
}
fn default_interval() -> u64 {
    60
}
fn default_cycle_timeout() -> u64 {
    300
}
fn default_fetch_timeout() -> u64 {
    10
}
fn default_rpc_timeout() -> u64 {
    15
}
fn default_confirmation_timeout() -> u64 {
    180
}
fn default_throttle_retries() -> u32 {
    3
}

/// Validated keeper configuration
#[derive(Clone)]
pub struct Config {
    pub rpc_url: String,
    pub signer: PrivateKeySigner,
    pub contract_address: Address,
    pub token_address: String,
    pub token_name: String,
    pub token_symbol: String,
    pub price_network: String,
    pub price_api_url: String,
    pub price_decimals: u32,
    pub threshold: Threshold,
    pub update_policy: UpdatePolicy,
    pub fee: FeePolicy,
    pub check_interval: Duration,
    pub cycle_timeout: Duration,
    pub fetch_timeout: Duration,
    pub rpc_timeout: Duration,
    pub confirmation_timeout: Duration,
    pub max_throttle_retries: u32,
    pub status_bind_address: Option<String>,
}

impl Config {
    /// Load from `.env` + process environment
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: config::Config) -> AppResult<Self> {
        let raw: RawConfig = settings.try_deserialize()?;
        raw.validate()?;
        raw.resolve()
    }

    pub fn token_label(&self) -> String {
        match (self.token_name.is_empty(), self.token_symbol.is_empty()) {
            (false, false) => format!("{} ({})", self.token_name, self.token_symbol),
            (false, true) => self.token_name.clone(),
            (true, false) => self.token_symbol.clone(),
            (true, true) => self.token_address.clone(),
        }
    }
}

impl RawConfig {
    fn resolve(self) -> AppResult<Config> {
        let key = self.bot_private_key.trim();
        let signer = PrivateKeySigner::from_str(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|_| AppError::Config("BOT_PRIVATE_KEY is not a valid secp256k1 key".to_string()))?;

        let contract_address = Address::from_str(self.contract_address.trim()).map_err(|e| {
            AppError::Config(format!("CONTRACT_ADDRESS {:?}: {}", self.contract_address, e))
        })?;

        let threshold = Threshold::from_str(&self.price_change_threshold)
            .map_err(|e| AppError::Config(format!("PRICE_CHANGE_THRESHOLD: {}", e)))?;
        if threshold.fraction() >= Decimal::ONE {
            warn!(
                "⚠️  PRICE_CHANGE_THRESHOLD={} is a fraction ({}); values in thousandths are no longer scaled",
                self.price_change_threshold.trim(),
                threshold
            );
        }
        let update_policy = UpdatePolicy::from_str(&self.update_policy)
            .map_err(|e| AppError::Config(format!("UPDATE_POLICY: {}", e)))?;
        let mode = FeeMode::from_str(&self.fee_mode)
            .map_err(|e| AppError::Config(format!("FEE_MODE: {}", e)))?;

        let base_literal = self
            .base_fee_gwei
            .as_deref()
            .or(self.max_fee_per_gas_gwei.as_deref())
            .ok_or_else(|| AppError::Config("BASE_FEE_GWEI must be set".to_string()))?;
        let base_price = parse_gwei("BASE_FEE_GWEI", base_literal)?;
        let increment = parse_gwei("FEE_INCREMENT_GWEI", &self.fee_increment_gwei)?;
        if increment == 0 {
            return Err(AppError::Config(
                "FEE_INCREMENT_GWEI must be greater than zero".to_string(),
            ));
        }
        let fallback_price = parse_gwei("FALLBACK_FEE_GWEI", &self.fallback_fee_gwei)?;
        let priority_fee = parse_gwei("PRIORITY_FEE_GWEI", &self.priority_fee_gwei)?;
        let max_price = self
            .max_fee_gwei
            .as_deref()
            .map(|v| parse_gwei("MAX_FEE_GWEI", v))
            .transpose()?;
        if let Some(ceiling) = max_price {
            if ceiling < base_price {
                return Err(AppError::Config(
                    "MAX_FEE_GWEI must not be lower than BASE_FEE_GWEI".to_string(),
                ));
            }
            if ceiling < fallback_price {
                return Err(AppError::Config(
                    "MAX_FEE_GWEI must not be lower than FALLBACK_FEE_GWEI".to_string(),
                ));
            }
        }

        // covers fetch + read only; submission has its own timeouts
        if self.cycle_timeout_secs <= self.fetch_timeout_secs.max(self.rpc_timeout_secs) {
            return Err(AppError::Config(
                "CYCLE_TIMEOUT_SECS must exceed FETCH_TIMEOUT_SECS and RPC_TIMEOUT_SECS".to_string(),
            ));
        }
        if self.price_decimals > MAX_SCALE {
            return Err(AppError::Config(format!(
                "PRICE_DECIMALS must be at most {}",
                MAX_SCALE
            )));
        }

        Ok(Config {
            rpc_url: self.rpc_url,
            signer,
            contract_address,
            token_address: self.token_address,
            token_name: self.token_name,
            token_symbol: self.token_symbol,
            price_network: self.price_network,
            price_api_url: self.price_api_url,
            price_decimals: self.price_decimals,
            threshold,
            update_policy,
            fee: FeePolicy {
                mode,
                base_price,
                increment,
                fallback_price,
                priority_fee,
                max_price,
                max_attempts: self.max_submit_attempts,
                gas_limit: self.default_gas_limit,
            },
            check_interval: Duration::from_secs(self.check_interval),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            max_throttle_retries: self.max_throttle_retries,
            status_bind_address: self.status_bind_address.filter(|a| !a.trim().is_empty()),
        })
    }
}

fn parse_gwei(key: &str, literal: &str) -> AppResult<u128> {
    let gwei = Decimal::from_str(literal.trim())
        .map_err(|_| AppError::Config(format!("{} is not a decimal: {:?}", key, literal)))?;
    gwei_to_wei(gwei).map_err(|e| AppError::Config(format!("{}: {}", key, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::fees::WEI_PER_GWEI;
    use rust_decimal_macros::dec;

    const GWEI: u128 = WEI_PER_GWEI as u128;
    // well-known local devnet key
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn settings(overrides: &[(&str, &str)]) -> config::Config {
        let base = [
            ("rpc_url", "http://localhost:8545"),
            ("bot_private_key", KEY),
            ("contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("token_address", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            (
                "price_api_url",
                "https://api.geckoterminal.com/api/v2/simple/networks/{network}/token_price/{token_address}",
            ),
            ("price_change_threshold", "0.005"),
            ("base_fee_gwei", "20"),
        ];
        let mut builder = config::Config::builder();
        for (key, value) in base.iter().chain(overrides.iter()) {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    fn without(key: &str) -> config::Config {
        let mut builder = config::Config::builder();
        for (k, v) in [
            ("rpc_url", "http://localhost:8545"),
            ("bot_private_key", KEY),
            ("contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("token_address", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            ("price_api_url", "https://example.com/{network}/{token_address}"),
            ("price_change_threshold", "0.005"),
            ("base_fee_gwei", "20"),
        ] {
            if k != key {
                builder = builder.set_override(k, v).unwrap();
            }
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_settings(settings(&[])).unwrap();

        assert_eq!(config.price_network, "ethereum");
        assert_eq!(config.price_decimals, 8);
        assert_eq!(config.threshold.fraction(), dec!(0.005));
        assert_eq!(config.update_policy, UpdatePolicy::Threshold);
        assert_eq!(config.fee.mode, FeeMode::Legacy);
        assert_eq!(config.fee.base_price, 20 * GWEI);
        assert_eq!(config.fee.increment, GWEI);
        assert_eq!(config.fee.fallback_price, 20 * GWEI);
        assert_eq!(config.fee.max_price, None);
        assert_eq!(config.fee.max_attempts, 10);
        assert_eq!(config.fee.gas_limit, 100_000);
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.cycle_timeout, Duration::from_secs(300));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(180));
        assert_eq!(config.max_throttle_retries, 3);
        assert!(config.status_bind_address.is_none());
        assert_eq!(
            format!("{:#x}", config.signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_overrides_parsed() {
        let config = Config::from_settings(settings(&[
            ("fee_mode", "eip1559"),
            ("update_policy", "always"),
            ("fee_increment_gwei", "0.5"),
            ("max_fee_gwei", "50"),
            ("check_interval", "15"),
            ("token_name", "USD Coin"),
            ("token_symbol", "USDC"),
            ("status_bind_address", "127.0.0.1:8080"),
        ]))
        .unwrap();

        assert_eq!(config.fee.mode, FeeMode::Eip1559);
        assert_eq!(config.update_policy, UpdatePolicy::Always);
        assert_eq!(config.fee.increment, GWEI / 2);
        assert_eq!(config.fee.max_price, Some(50 * GWEI));
        assert_eq!(config.check_interval, Duration::from_secs(15));
        assert_eq!(config.token_label(), "USD Coin (USDC)");
        assert_eq!(config.status_bind_address.as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn test_max_fee_per_gas_alias() {
        let mut builder = config::Config::builder();
        for (k, v) in [
            ("rpc_url", "http://localhost:8545"),
            ("bot_private_key", KEY),
            ("contract_address", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            ("token_address", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            ("price_api_url", "https://example.com/{network}/{token_address}"),
            ("price_change_threshold", "0.01"),
            ("max_fee_per_gas_gwei", "7"),
        ] {
            builder = builder.set_override(k, v).unwrap();
        }
        let config = Config::from_settings(builder.build().unwrap()).unwrap();
        assert_eq!(config.fee.base_price, 7 * GWEI);
    }

    #[test]
    fn test_missing_required_key_rejected() {
        for key in ["rpc_url", "bot_private_key", "contract_address", "price_change_threshold", "base_fee_gwei"] {
            assert!(Config::from_settings(without(key)).is_err(), "{key}");
        }
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        for value in ["0", "-0.01", "abc"] {
            let result = Config::from_settings(settings(&[("price_change_threshold", value)]));
            assert!(matches!(result, Err(AppError::Config(_))), "{value}");
        }
    }

    #[test]
    fn test_zero_increment_rejected() {
        let result = Config::from_settings(settings(&[("fee_increment_gwei", "0")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_fallback_above_ceiling_rejected() {
        let result = Config::from_settings(settings(&[
            ("base_fee_gwei", "5"),
            ("max_fee_gwei", "10"),
            ("fallback_fee_gwei", "20"),
        ]));
        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("FALLBACK_FEE_GWEI")));

        let config = Config::from_settings(settings(&[
            ("base_fee_gwei", "5"),
            ("max_fee_gwei", "10"),
            ("fallback_fee_gwei", "8"),
        ]))
        .unwrap();
        assert_eq!(config.fee.fallback_price, 8 * GWEI);
    }

    #[test]
    fn test_cycle_timeout_independent_of_confirmation_timeout() {
        let config = Config::from_settings(settings(&[
            ("cycle_timeout_secs", "60"),
            ("confirmation_timeout_secs", "180"),
        ]))
        .unwrap();
        assert_eq!(config.cycle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_threshold_is_a_plain_fraction() {
        // thousandths are not rescaled; 5 means 500%
        let config = Config::from_settings(settings(&[("price_change_threshold", "5")])).unwrap();
        assert_eq!(config.threshold.fraction(), dec!(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        for (key, value) in [
            ("bot_private_key", "not-a-key"),
            ("contract_address", "0x1234"),
            ("fee_mode", "dynamic"),
            ("max_fee_gwei", "5"),
            ("cycle_timeout_secs", "10"),
            ("rpc_url", "not a url"),
            ("max_submit_attempts", "0"),
            ("price_decimals", "40"),
        ] {
            assert!(
                Config::from_settings(settings(&[(key, value)])).is_err(),
                "{key}={value}"
            );
        }
    }
}
