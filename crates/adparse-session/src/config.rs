//! Environment-driven configuration and the tariff table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use adparse_client::HttpClientConfig;
use adparse_core::{TariffPlan, TariffTier, DEFAULT_STARTING_BALANCE};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_EXTRACT_URL: &str =
    "https://functions.poehali.dev/aaec67af-c395-457f-b39e-ebdcbb62240c";
pub const DEFAULT_HISTORY_URL: &str =
    "https://functions.poehali.dev/1c021a25-7781-4ccb-903b-f167c8dcc2cb";
pub const DEFAULT_USER_AGENT: &str = "adparse/0.1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("parsing tariff table: {0}")]
    Tariffs(#[from] serde_yaml::Error),
    #[error("tariff {tier} must cost at least 1, got {price}")]
    FreeTariff { tier: TariffTier, price: u32 },
}

/// Whether billing may drive the balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancePolicy {
    /// Charges are recorded but never block a parse; the balance may go negative.
    #[default]
    Advisory,
    /// A parse is refused up front when the balance cannot cover the current price.
    Enforced,
}

impl FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(BalancePolicy::Advisory),
            "enforced" => Ok(BalancePolicy::Enforced),
            other => Err(format!("expected advisory or enforced, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TariffFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    tiers: Vec<TariffEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TariffEntry {
    tier: TariffTier,
    price: u32,
}

/// Price per successful extraction for every tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TariffTable {
    prices: HashMap<TariffTier, u32>,
}

impl Default for TariffTable {
    fn default() -> Self {
        Self {
            prices: TariffTier::ALL
                .into_iter()
                .map(|tier| (tier, tier.default_price()))
                .collect(),
        }
    }
}

impl TariffTable {
    /// Built-in prices overridden by whichever tiers the YAML document lists.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: TariffFile = serde_yaml::from_str(yaml)?;
        let mut table = Self::default();
        for entry in file.tiers {
            if entry.price == 0 {
                return Err(ConfigError::FreeTariff {
                    tier: entry.tier,
                    price: entry.price,
                });
            }
            table.prices.insert(entry.tier, entry.price);
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading tariff table {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("parsing tariff table {}", path.display()))
    }

    pub fn plan(&self, tier: TariffTier) -> TariffPlan {
        TariffPlan {
            tier,
            price: self
                .prices
                .get(&tier)
                .copied()
                .unwrap_or_else(|| tier.default_price()),
        }
    }

    /// Every tier in display order.
    pub fn plans(&self) -> Vec<TariffPlan> {
        TariffTier::ALL.into_iter().map(|tier| self.plan(tier)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub extract_url: String,
    pub history_url: String,
    pub history_limit: Option<u32>,
    pub starting_balance: i64,
    pub tariff_tier: TariffTier,
    pub tariffs_path: Option<PathBuf>,
    pub balance_policy: BalancePolicy,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            extract_url: DEFAULT_EXTRACT_URL.to_string(),
            history_url: DEFAULT_HISTORY_URL.to_string(),
            history_limit: None,
            starting_balance: DEFAULT_STARTING_BALANCE,
            tariff_tier: TariffTier::default(),
            tariffs_path: None,
            balance_policy: BalancePolicy::default(),
            http_timeout_secs: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            extract_url: lookup("ADPARSE_EXTRACT_URL").unwrap_or(defaults.extract_url),
            history_url: lookup("ADPARSE_HISTORY_URL").unwrap_or(defaults.history_url),
            history_limit: parse_var(&lookup, "ADPARSE_HISTORY_LIMIT")?,
            starting_balance: parse_var(&lookup, "ADPARSE_STARTING_BALANCE")?
                .unwrap_or(defaults.starting_balance),
            tariff_tier: parse_var(&lookup, "ADPARSE_TARIFF_TIER")?.unwrap_or(defaults.tariff_tier),
            tariffs_path: lookup("ADPARSE_TARIFFS_PATH").map(PathBuf::from),
            balance_policy: parse_var(&lookup, "ADPARSE_BALANCE_POLICY")?
                .unwrap_or(defaults.balance_policy),
            http_timeout_secs: parse_var(&lookup, "ADPARSE_HTTP_TIMEOUT_SECS")?,
            user_agent: lookup("ADPARSE_USER_AGENT").unwrap_or(defaults.user_agent),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout_secs.map(Duration::from_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn load_tariffs(&self) -> anyhow::Result<TariffTable> {
        match &self.tariffs_path {
            Some(path) => TariffTable::load(path),
            None => Ok(TariffTable::default()),
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err: T::Err| ConfigError::Invalid {
            var,
            value: value.clone(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_match_the_current_tariff() {
        let config = SessionConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.starting_balance, 450);
        assert_eq!(config.tariff_tier, TariffTier::Standard);
        assert_eq!(config.balance_policy, BalancePolicy::Advisory);
        assert_eq!(config.history_limit, None);
        assert!(config.http_client_config().timeout.is_none());
    }

    #[test]
    fn env_overrides_are_parsed() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            ("ADPARSE_EXTRACT_URL", "http://localhost:9000/parse"),
            ("ADPARSE_HISTORY_LIMIT", "25"),
            ("ADPARSE_STARTING_BALANCE", "100"),
            ("ADPARSE_TARIFF_TIER", "premium"),
            ("ADPARSE_BALANCE_POLICY", "Enforced"),
            ("ADPARSE_HTTP_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.extract_url, "http://localhost:9000/parse");
        assert_eq!(config.history_limit, Some(25));
        assert_eq!(config.starting_balance, 100);
        assert_eq!(config.tariff_tier, TariffTier::Premium);
        assert_eq!(config.balance_policy, BalancePolicy::Enforced);
        assert_eq!(config.http_client_config().timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = SessionConfig::from_lookup(lookup_from(&[("ADPARSE_TARIFF_TIER", "gold")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ADPARSE_TARIFF_TIER", .. }));

        let err = SessionConfig::from_lookup(lookup_from(&[("ADPARSE_HISTORY_LIMIT", "-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("ADPARSE_HISTORY_LIMIT"));
    }

    #[test]
    fn yaml_overrides_only_listed_tiers() {
        let table = TariffTable::from_yaml_str(
            "version: 1\ntiers:\n  - tier: premium\n    price: 8\n",
        )
        .unwrap();
        assert_eq!(table.plan(TariffTier::Premium).price, 8);
        assert_eq!(table.plan(TariffTier::Standard).price, 15);
        assert_eq!(
            table.plans().iter().map(|p| p.tier).collect::<Vec<_>>(),
            TariffTier::ALL.to_vec()
        );
    }

    #[test]
    fn zero_price_tiers_are_rejected() {
        let err = TariffTable::from_yaml_str("version: 1\ntiers:\n  - tier: basic\n    price: 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::FreeTariff { tier: TariffTier::Basic, .. }));
    }

    #[test]
    fn tariff_file_is_loaded_from_config_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "version: 1\ntiers:\n  - tier: standard\n    price: 12").unwrap();
        let config = SessionConfig {
            tariffs_path: Some(file.path().to_path_buf()),
            ..SessionConfig::default()
        };
        let table = config.load_tariffs().unwrap();
        assert_eq!(table.plan(TariffTier::Standard).price, 12);
    }
}
