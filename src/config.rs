//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section is optional and falls back to the reference deployment. The
//! gateway token is referenced by env-var name and resolved at runtime into
//! a `SecretString`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::pricing::sizing::SizingConfig;
use crate::types::{Address, Decimals, COLLATERAL_DECIMALS, DEBT_DECIMALS};

/// Vault scanned when none is configured.
pub const DEFAULT_SCAN_VAULT: &str = "0x86954F830647d291186E90B1bB9C725f6901A9da";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
    pub vaults: VaultsConfig,
    pub market: MarketConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub scan_interval_secs: u64,
    /// Log takes instead of submitting them.
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            dry_run: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Name of the env var holding the gateway bearer token.
    pub api_token_env: Option<String>,
    /// Address the session acts as.
    pub caller: Option<Address>,
    /// Swap router; the spender for take allowances.
    pub router: Option<Address>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8545".to_string(),
            api_token_env: None,
            caller: None,
            router: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VaultsConfig {
    pub scan: Vec<Address>,
}

impl Default for VaultsConfig {
    fn default() -> Self {
        Self {
            scan: Address::parse(DEFAULT_SCAN_VAULT).into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub collateral_decimals: u32,
    pub debt_decimals: u32,
    /// Debt-token units per collateral token, used for sizing.
    pub collateral_price: Decimal,
    pub ltv_limit: Decimal,
    /// Annual base yield of the collateral, in percent.
    pub base_yield_pct: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            collateral_decimals: COLLATERAL_DECIMALS,
            debt_decimals: DEBT_DECIMALS,
            collateral_price: dec!(0.8),
            ltv_limit: dec!(0.9),
            base_yield_pct: dec!(14),
        }
    }
}

impl MarketConfig {
    pub fn decimals(&self) -> Decimals {
        Decimals {
            collateral: self.collateral_decimals,
            debt: self.debt_decimals,
        }
    }

    pub fn sizing(&self) -> SizingConfig {
        SizingConfig {
            ltv_limit: self.ltv_limit,
            collateral_price: self.collateral_price,
            decimals: self.decimals(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.scan_interval_secs == 0 {
            anyhow::bail!("engine.scan_interval_secs must be > 0");
        }
        if self.vaults.scan.is_empty() {
            anyhow::bail!("vaults.scan must list at least one vault");
        }
        let m = &self.market;
        if m.ltv_limit <= Decimal::ZERO || m.ltv_limit >= Decimal::ONE {
            anyhow::bail!("market.ltv_limit must be in (0, 1), got {}", m.ltv_limit);
        }
        if m.collateral_price <= Decimal::ZERO {
            anyhow::bail!("market.collateral_price must be > 0, got {}", m.collateral_price);
        }
        if m.collateral_decimals > crate::amount::MAX_DECIMALS || m.debt_decimals > crate::amount::MAX_DECIMALS {
            anyhow::bail!("market decimals must not exceed {}", crate::amount::MAX_DECIMALS);
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name).with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The gateway bearer token, if one is configured.
    pub fn gateway_token(&self) -> Result<Option<SecretString>> {
        match &self.gateway.api_token_env {
            Some(name) => Ok(Some(SecretString::new(Self::resolve_env(name)?))),
            None => Ok(None),
        }
    }
}
