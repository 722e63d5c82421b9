use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("sweep interval must be at least one second")]
    SweepIntervalTooShort,
    #[error("max referrals must be at least one")]
    NoReferralBudget,
}

/// Resolver configuration bundle.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Accept AAAA glue and query nameservers over IPv6 addresses.
    pub use_ipv6: bool,
    /// Set the DO bit on upstream queries and validate the DNSSEC chain.
    pub dnssec_enabled: bool,
    /// Maximum referral-loop iterations per lookup; nested NS-address
    /// lookups share the same depth budget.
    pub max_referrals: usize,
    /// Cache sweeper period.
    pub sweep_interval: Duration,
    /// Per-exchange UDP deadline.
    pub query_timeout: Duration,
    /// Address the server binary listens on.
    pub bind_addr: SocketAddr,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            use_ipv6: false,
            dnssec_enabled: true,
            max_referrals: 10,
            sweep_interval: Duration::from_secs(60),
            query_timeout: Duration::from_secs(2),
            bind_addr: "0.0.0.0:1053".parse().expect("static default address"),
        }
    }
}

impl ResolverConfig {
    /// Load configuration from `RATATOSKR_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("RATATOSKR_BIND_ADDR") {
            config.bind_addr = v
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(v.clone()))?;
        }
        if let Some(v) = env_bool("RATATOSKR_USE_IPV6") {
            config.use_ipv6 = v;
        }
        if let Some(v) = env_bool("RATATOSKR_DNSSEC") {
            config.dnssec_enabled = v;
        }
        if let Some(v) = env_u64("RATATOSKR_MAX_REFERRALS") {
            config.max_referrals = v as usize;
        }
        if let Some(v) = env_u64("RATATOSKR_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_u64("RATATOSKR_QUERY_TIMEOUT_SECS") {
            config.query_timeout = Duration::from_secs(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval < Duration::from_secs(1) {
            return Err(ConfigError::SweepIntervalTooShort);
        }
        if self.max_referrals == 0 {
            return Err(ConfigError::NoReferralBudget);
        }
        Ok(())
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!(key, value = other, "unparseable boolean, ignoring");
            None
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "unparseable integer, ignoring");
            None
        }
    }
}
