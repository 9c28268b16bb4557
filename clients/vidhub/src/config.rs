use crate::background::DEFAULT_POLL_INTERVAL;
use eyre::Context;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Settings shared by everything that talks to the backend.
///
/// Start from [`ClientConfig::default`] or [`ClientConfig::from_env`]; the latter reads
/// `VIDHUB_API_URL`, `VIDHUB_HTTP_TIMEOUT_SECS`, and `VIDHUB_POLL_INTERVAL_MS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> eyre::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> eyre::Result<Self> {
        let mut config = Self::default();
        if let Some(url) = lookup("VIDHUB_API_URL").filter(|url| !url.trim().is_empty()) {
            config.base_url = url.trim().to_string();
        }
        if let Some(secs) = lookup("VIDHUB_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("parse VIDHUB_HTTP_TIMEOUT_SECS '{secs}'"))?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = lookup("VIDHUB_POLL_INTERVAL_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .with_context(|| format!("parse VIDHUB_POLL_INTERVAL_MS '{ms}'"))?;
            if ms == 0 {
                eyre::bail!("VIDHUB_POLL_INTERVAL_MS must be greater than zero");
            }
            config.poll_interval = Duration::from_millis(ms);
        }
        tracing::debug!(?config, "loaded client configuration");
        Ok(config)
    }

    pub fn http_client(&self) -> eyre::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build reqwest client")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ClientConfig::from_lookup(lookup_in(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
        assert_eq!(config.base_url, "http://localhost:8080");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup_in(&[
            ("VIDHUB_API_URL", "https://api.vidhub.example"),
            ("VIDHUB_HTTP_TIMEOUT_SECS", "5"),
            ("VIDHUB_POLL_INTERVAL_MS", "500"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://api.vidhub.example");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = ClientConfig::from_lookup(lookup_in(&[("VIDHUB_HTTP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("VIDHUB_HTTP_TIMEOUT_SECS"));

        assert!(
            ClientConfig::from_lookup(lookup_in(&[("VIDHUB_POLL_INTERVAL_MS", "0")])).is_err()
        );
    }
}
