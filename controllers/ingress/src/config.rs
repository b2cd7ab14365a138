//! Environment configuration.

use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::ControllerError;

/// Longest accepted resync period: one year.
const MAX_RESYNC_SECS: u64 = 365 * 24 * 60 * 60;

/// Runtime settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Namespace to watch; `None` watches all of them
    pub namespace: Option<String>,
    /// Cache resync period; zero disables resyncs
    pub resync: Duration,
    /// How long to wait for the initial sync; `None` waits forever
    pub cache_sync_timeout: Option<Duration>,
    /// Ingress class this controller owns
    pub ingress_class: String,
    /// Whether ingresses without any class are ours
    pub watch_without_class: bool,
    /// Name reported on published events
    pub controller_name: String,
    /// Window in which notify bursts are coalesced
    pub notify_debounce: Duration,
}

impl Config {
    /// Reads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timeout = parse_u64(&lookup, "CACHE_SYNC_TIMEOUT_SECS", 0)?;
        let resync = parse_u64(&lookup, "RESYNC_PERIOD_SECS", 600)?;
        if resync > MAX_RESYNC_SECS {
            return Err(ControllerError::InvalidConfig(format!(
                "RESYNC_PERIOD_SECS must be at most {MAX_RESYNC_SECS}, got {resync}"
            )));
        }
        let debounce = parse_u64(&lookup, "NOTIFY_DEBOUNCE_MILLIS", 500)?;

        Ok(Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            resync: Duration::from_secs(resync),
            cache_sync_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
            ingress_class: lookup("INGRESS_CLASS").unwrap_or_else(|| "haproxy".to_string()),
            watch_without_class: parse_bool(&lookup, "WATCH_INGRESS_WITHOUT_CLASS", false)?,
            controller_name: lookup("CONTROLLER_NAME")
                .unwrap_or_else(|| "ingress-controller".to_string()),
            notify_debounce: Duration::from_millis(debounce),
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Ingress class: {}", self.ingress_class);
        info!("  Watch ingress without class: {}", self.watch_without_class);
        info!("  Resync period: {:?}", self.resync);
        match self.cache_sync_timeout {
            Some(timeout) => info!("  Cache sync timeout: {:?}", timeout),
            None => info!("  Cache sync timeout: none"),
        }
        info!("  Notify debounce: {:?}", self.notify_debounce);
        info!("  Controller name: {}", self.controller_name);
    }
}

fn parse_u64<F>(lookup: &F, name: &str, default: u64) -> Result<u64, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "{name} must be a non-negative integer, got {value:?}"
            ))
        }),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, name: &str, default: bool) -> Result<bool, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ControllerError::InvalidConfig(format!(
                "{name} must be a boolean, got {value:?}"
            ))),
        },
        None => Ok(default),
    }
}
