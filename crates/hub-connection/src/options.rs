//! Client configuration.
//!
//! Options can be built in code or loaded from TOML:
//!
//! ```toml
//! endpoint = "https://hub.example.com/hubs/game"
//! server_timeout_ms = 30000
//! keep_alive_ms = 15000
//! handshake_timeout_ms = 15000
//! backoff_min_ms = 500
//! backoff_max_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::HubError;

/// Lower bound of the reconnect backoff window when none is given.
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(500);

/// Upper bound of the reconnect backoff window when none is given.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(2000);

/// Validated hub client configuration.
///
/// The backoff window is always ordered: `backoff_min() <= backoff_max()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    endpoint: String,
    server_timeout: Option<Duration>,
    keep_alive: Option<Duration>,
    handshake_timeout: Option<Duration>,
    backoff_min: Duration,
    backoff_max: Duration,
}

/// Transport-facing subset of [`ClientOptions`].
///
/// `None` means the transport's own default applies.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub endpoint: String,
    pub server_timeout: Option<Duration>,
    pub keep_alive: Option<Duration>,
    pub handshake_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Creates options for `endpoint` with default backoff bounds.
    ///
    /// Fails if the endpoint is empty or whitespace.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, HubError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(HubError::InvalidConfig("endpoint must not be blank".into()));
        }
        Ok(Self {
            endpoint,
            server_timeout: None,
            keep_alive: None,
            handshake_timeout: None,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
        })
    }

    /// Sets the reconnect backoff window. Inverted bounds are swapped.
    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        if max < min {
            self.backoff_min = max;
            self.backoff_max = min;
        } else {
            self.backoff_min = min;
            self.backoff_max = max;
        }
        self
    }

    pub fn with_server_timeout(mut self, timeout: Duration) -> Self {
        self.server_timeout = Some(timeout);
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Parses and validates options from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, HubError> {
        let file: OptionsFile = toml::from_str(content)?;
        file.into_options()
    }

    /// Loads and validates options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "client options loaded");
        Ok(options)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn server_timeout(&self) -> Option<Duration> {
        self.server_timeout
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    pub fn backoff_min(&self) -> Duration {
        self.backoff_min
    }

    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    /// Settings a transport needs to open its connection.
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            endpoint: self.endpoint.clone(),
            server_timeout: self.server_timeout,
            keep_alive: self.keep_alive,
            handshake_timeout: self.handshake_timeout,
        }
    }

    /// Picks a reconnect delay uniformly from `[backoff_min, backoff_max]`.
    pub fn sample_backoff(&self) -> Duration {
        rand::thread_rng().gen_range(self.backoff_min..=self.backoff_max)
    }
}

/// On-disk representation. Durations are plain milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptionsFile {
    endpoint: String,
    server_timeout_ms: Option<u64>,
    keep_alive_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    backoff_min_ms: Option<u64>,
    backoff_max_ms: Option<u64>,
}

impl OptionsFile {
    fn into_options(self) -> Result<ClientOptions, HubError> {
        let min = self
            .backoff_min_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF_MIN);
        let max = self
            .backoff_max_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF_MAX);

        let mut options = ClientOptions::new(self.endpoint)?.with_backoff(min, max);
        options.server_timeout = self.server_timeout_ms.map(Duration::from_millis);
        options.keep_alive = self.keep_alive_ms.map(Duration::from_millis);
        options.handshake_timeout = self.handshake_timeout_ms.map(Duration::from_millis);
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ClientOptions::new("http://localhost:5000/hub").unwrap();
        assert_eq!(opts.endpoint(), "http://localhost:5000/hub");
        assert_eq!(opts.backoff_min(), Duration::from_millis(500));
        assert_eq!(opts.backoff_max(), Duration::from_millis(2000));
        assert!(opts.server_timeout().is_none());
        assert!(opts.keep_alive().is_none());
        assert!(opts.handshake_timeout().is_none());
    }

    #[test]
    fn blank_endpoint_rejected() {
        for endpoint in ["", "   ", "\t\n"] {
            let result = ClientOptions::new(endpoint);
            assert!(
                matches!(result, Err(HubError::InvalidConfig(_))),
                "endpoint {endpoint:?} should be rejected"
            );
        }
    }

    #[test]
    fn inverted_backoff_is_swapped() {
        let opts = ClientOptions::new("http://hub")
            .unwrap()
            .with_backoff(Duration::from_millis(1000), Duration::from_millis(500));
        assert_eq!(opts.backoff_min(), Duration::from_millis(500));
        assert_eq!(opts.backoff_max(), Duration::from_millis(1000));
    }

    #[test]
    fn sampled_backoff_stays_in_window() {
        let opts = ClientOptions::new("http://hub")
            .unwrap()
            .with_backoff(Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..1000 {
            let delay = opts.sample_backoff();
            assert!(
                delay >= opts.backoff_min() && delay <= opts.backoff_max(),
                "{delay:?} outside window"
            );
        }
    }

    #[test]
    fn huge_backoff_bounds_still_sample() {
        let max = Duration::new(18_446_744_073, 709_551_617);
        let opts = ClientOptions::new("http://localhost:5000/hub")
            .unwrap()
            .with_backoff(Duration::from_secs(1), max);
        for _ in 0..100 {
            let delay = opts.sample_backoff();
            assert!(delay >= Duration::from_secs(1) && delay <= max);
        }

        let opts = ClientOptions::from_toml_str(
            "endpoint = \"http://hub\"\nbackoff_max_ms = 18446744073709551615\n",
        )
        .unwrap();
        let delay = opts.sample_backoff();
        assert!(delay >= DEFAULT_BACKOFF_MIN && delay <= opts.backoff_max());
    }

    #[test]
    fn degenerate_backoff_window() {
        let opts = ClientOptions::new("http://hub")
            .unwrap()
            .with_backoff(Duration::from_millis(250), Duration::from_millis(250));
        assert_eq!(opts.sample_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn transport_settings_carry_timeouts() {
        let opts = ClientOptions::new("http://hub")
            .unwrap()
            .with_server_timeout(Duration::from_secs(30))
            .with_keep_alive(Duration::from_secs(15))
            .with_handshake_timeout(Duration::from_secs(5));
        let settings = opts.transport_settings();
        assert_eq!(settings.endpoint, "http://hub");
        assert_eq!(settings.server_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.keep_alive, Some(Duration::from_secs(15)));
        assert_eq!(settings.handshake_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn toml_full() {
        let toml_str = r#"
            endpoint = "https://hub.example.com/game"
            server_timeout_ms = 30000
            keep_alive_ms = 15000
            handshake_timeout_ms = 5000
            backoff_min_ms = 2000
            backoff_max_ms = 750
        "#;
        let opts = ClientOptions::from_toml_str(toml_str).unwrap();
        assert_eq!(opts.endpoint(), "https://hub.example.com/game");
        assert_eq!(opts.server_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(opts.keep_alive(), Some(Duration::from_secs(15)));
        assert_eq!(opts.handshake_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(opts.backoff_min(), Duration::from_millis(750));
        assert_eq!(opts.backoff_max(), Duration::from_millis(2000));
    }

    #[test]
    fn toml_partial_uses_defaults() {
        let opts = ClientOptions::from_toml_str(r#"endpoint = "http://hub""#).unwrap();
        assert_eq!(opts.backoff_min(), DEFAULT_BACKOFF_MIN);
        assert_eq!(opts.backoff_max(), DEFAULT_BACKOFF_MAX);
        assert!(opts.keep_alive().is_none());
    }

    #[test]
    fn toml_missing_endpoint_rejected() {
        let result = ClientOptions::from_toml_str("backoff_min_ms = 10");
        assert!(matches!(result, Err(HubError::InvalidConfig(_))));
    }

    #[test]
    fn toml_malformed_rejected() {
        let result = ClientOptions::from_toml_str("endpoint = ");
        assert!(matches!(result, Err(HubError::Config(_))));
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("client.toml");
        std::fs::write(&path, "endpoint = \"http://hub\"\nbackoff_max_ms = 900\n").unwrap();

        let opts = ClientOptions::load(&path).unwrap();
        assert_eq!(opts.endpoint(), "http://hub");
        assert_eq!(opts.backoff_max(), Duration::from_millis(900));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = ClientOptions::load(tmp.path().join("absent.toml"));
        assert!(matches!(result, Err(HubError::Io(_))));
    }
}
