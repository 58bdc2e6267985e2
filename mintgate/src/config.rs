use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::flow::cadence;
use crate::listener::EventFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetNetwork {
    #[default]
    Testnet,
    Mainnet,
}

impl TargetNetwork {
    pub fn access_node_url(self) -> &'static str {
        match self {
            Self::Testnet => "https://rest-testnet.onflow.org",
            Self::Mainnet => "https://rest-mainnet.onflow.org",
        }
    }

    /// Where the `NonFungibleToken` standard contract is deployed.
    pub fn nft_standard_address(self) -> &'static str {
        match self {
            Self::Testnet => "0x631e88ae7f1d7c20",
            Self::Mainnet => "0x1d7e57aa55817448",
        }
    }

    /// Collection contract watched when no override is configured.
    /// Mainnet has no default and must be configured explicitly.
    pub fn default_contract_address(self) -> Option<&'static str> {
        match self {
            Self::Testnet => Some("0xf8d6e0586b0a20c7"),
            Self::Mainnet => None,
        }
    }
}

impl FromStr for TargetNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(format!("unknown network {other:?}")),
        }
    }
}

impl fmt::Display for TargetNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testnet => f.write_str("testnet"),
            Self::Mainnet => f.write_str("mainnet"),
        }
    }
}

/// Settings for one SDK instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    pub api_key: String,
    pub environment: Environment,
    pub target_network: TargetNetwork,
    /// Absolute URL, or a reference resolved against `app_base_url`.
    pub rewards_source_url: String,
    pub app_base_url: Option<String>,
    pub access_node_url: Option<String>,
    pub contract_address: Option<String>,
    /// Contract name of the collection, used in scripts and event types.
    pub asset_type: String,
    pub event_name: String,
    pub debug: bool,
    pub auto_refresh: bool,
    pub refresh_interval: Duration,
    pub evaluation_timeout: Duration,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

impl SdkConfig {
    pub const DEFAULT_REWARDS_SOURCE: &'static str = "/rewards.json";
    pub const DEFAULT_ASSET_TYPE: &'static str = "GhibliNFT";
    pub const DEFAULT_EVENT_NAME: &'static str = "Deposit";
    pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
    pub const DEFAULT_EVALUATION_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
    pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            environment: Environment::default(),
            target_network: TargetNetwork::default(),
            rewards_source_url: Self::DEFAULT_REWARDS_SOURCE.to_string(),
            app_base_url: None,
            access_node_url: None,
            contract_address: None,
            asset_type: Self::DEFAULT_ASSET_TYPE.to_string(),
            event_name: Self::DEFAULT_EVENT_NAME.to_string(),
            debug: true,
            auto_refresh: true,
            refresh_interval: Duration::from_millis(Self::DEFAULT_REFRESH_INTERVAL_MS),
            evaluation_timeout: Duration::from_millis(Self::DEFAULT_EVALUATION_TIMEOUT_MS),
            poll_interval: Duration::from_millis(Self::DEFAULT_POLL_INTERVAL_MS),
            http_timeout: Duration::from_millis(Self::DEFAULT_HTTP_TIMEOUT_MS),
        }
    }

    /// Reads `MINTGATE_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("MINTGATE_API_KEY").ok_or(ConfigError::Missing("MINTGATE_API_KEY"))?;
        let mut cfg = Self::new(api_key);

        if let Some(v) = var("MINTGATE_ENVIRONMENT") {
            cfg.environment = parse("MINTGATE_ENVIRONMENT", &v)?;
        }
        if let Some(v) = var("MINTGATE_NETWORK") {
            cfg.target_network = parse("MINTGATE_NETWORK", &v)?;
        }
        if let Some(v) = var("MINTGATE_REWARDS_URL") {
            cfg.rewards_source_url = v;
        }
        cfg.app_base_url = var("MINTGATE_APP_URL");
        cfg.access_node_url = var("MINTGATE_ACCESS_NODE");
        cfg.contract_address = var("MINTGATE_CONTRACT");
        if let Some(v) = var("MINTGATE_ASSET_TYPE") {
            cfg.asset_type = v;
        }
        if let Some(v) = var("MINTGATE_EVENT") {
            cfg.event_name = v;
        }
        cfg.debug = match var("MINTGATE_DEBUG") {
            Some(v) => parse("MINTGATE_DEBUG", &v)?,
            None => cfg.environment == Environment::Development,
        };
        if let Some(v) = var("MINTGATE_AUTO_REFRESH") {
            cfg.auto_refresh = parse("MINTGATE_AUTO_REFRESH", &v)?;
        }
        if let Some(v) = var("MINTGATE_REFRESH_INTERVAL_MS") {
            cfg.refresh_interval = millis("MINTGATE_REFRESH_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("MINTGATE_EVAL_TIMEOUT_MS") {
            cfg.evaluation_timeout = millis("MINTGATE_EVAL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("MINTGATE_POLL_INTERVAL_MS") {
            cfg.poll_interval = millis("MINTGATE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = var("MINTGATE_HTTP_TIMEOUT_MS") {
            cfg.http_timeout = millis("MINTGATE_HTTP_TIMEOUT_MS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.rewards_source_url.trim().is_empty() {
            return Err(ConfigError::Missing("rewards_source_url"));
        }
        if self.asset_type.trim().is_empty() {
            return Err(ConfigError::Missing("asset_type"));
        }
        if self.event_name.trim().is_empty() {
            return Err(ConfigError::Missing("event_name"));
        }
        if self.evaluation_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "evaluation_timeout",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "poll_interval",
                message: "must be greater than zero".to_string(),
            });
        }
        self.app_base_url()?;
        self.contract_address()?;
        Ok(())
    }

    /// Auto-refresh runs only when enabled with a non-zero interval.
    pub fn auto_refresh_interval(&self) -> Option<Duration> {
        (self.auto_refresh && !self.refresh_interval.is_zero()).then_some(self.refresh_interval)
    }

    pub fn access_node_url(&self) -> &str {
        self.access_node_url
            .as_deref()
            .unwrap_or_else(|| self.target_network.access_node_url())
    }

    pub fn app_base_url(&self) -> Result<Option<Url>, ConfigError> {
        self.app_base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|e| ConfigError::Invalid {
                    key: "app_base_url",
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    /// The collection contract for the selected network, `0x`-prefixed.
    pub fn contract_address(&self) -> Result<String, ConfigError> {
        let raw = self
            .contract_address
            .as_deref()
            .or_else(|| self.target_network.default_contract_address())
            .ok_or(ConfigError::Missing("contract_address"))?;
        cadence::normalize_address(raw).map_err(|e| ConfigError::Invalid {
            key: "contract_address",
            message: e.to_string(),
        })
    }

    pub fn event_filter(&self) -> Result<EventFilter, ConfigError> {
        Ok(EventFilter {
            contract_address: self.contract_address()?,
            asset_type: self.asset_type.clone(),
            event_name: self.event_name.clone(),
        })
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

fn millis(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, raw).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_follow_the_testnet_deployment() {
        let cfg = SdkConfig::from_lookup(lookup(&[("MINTGATE_API_KEY", "k")])).unwrap();
        assert_eq!(cfg.rewards_source_url, "/rewards.json");
        assert_eq!(cfg.target_network, TargetNetwork::Testnet);
        assert_eq!(cfg.contract_address().unwrap(), "0xf8d6e0586b0a20c7");
        assert_eq!(cfg.auto_refresh_interval(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.access_node_url(), "https://rest-testnet.onflow.org");
        assert!(cfg.debug);
    }

    #[test]
    fn api_key_is_required() {
        let err = SdkConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("MINTGATE_API_KEY"));
    }

    #[test]
    fn mainnet_needs_a_contract() {
        let err = SdkConfig::from_lookup(lookup(&[
            ("MINTGATE_API_KEY", "k"),
            ("MINTGATE_NETWORK", "mainnet"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("contract_address"));

        let cfg = SdkConfig::from_lookup(lookup(&[
            ("MINTGATE_API_KEY", "k"),
            ("MINTGATE_NETWORK", "mainnet"),
            ("MINTGATE_CONTRACT", "1D7E57AA55817448"),
            ("MINTGATE_ENVIRONMENT", "production"),
        ]))
        .unwrap();
        assert_eq!(cfg.contract_address().unwrap(), "0x1d7e57aa55817448");
        assert!(!cfg.debug);
    }

    #[test]
    fn zero_interval_disables_auto_refresh() {
        let cfg = SdkConfig::from_lookup(lookup(&[
            ("MINTGATE_API_KEY", "k"),
            ("MINTGATE_REFRESH_INTERVAL_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.auto_refresh_interval(), None);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = SdkConfig::from_lookup(lookup(&[
            ("MINTGATE_API_KEY", "k"),
            ("MINTGATE_NETWORK", "devnet"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MINTGATE_NETWORK", .. }));

        let err = SdkConfig::from_lookup(lookup(&[
            ("MINTGATE_API_KEY", "k"),
            ("MINTGATE_APP_URL", "not a url"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "app_base_url", .. }));
    }

    #[test]
    fn event_filter_uses_configured_names() {
        let mut cfg = SdkConfig::new("k");
        cfg.asset_type = "Moments".into();
        cfg.event_name = "Minted".into();
        let filter = cfg.event_filter().unwrap();
        assert_eq!(filter.event_type(), "A.f8d6e0586b0a20c7.Moments.Minted");
    }
}
