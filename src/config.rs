//! Server configuration
//!
//! Built in code with [`ServerConfig::builder`] or loaded from `H1SERVE_*`
//! environment variables with [`ServerConfig::from_env`].

use std::env;
use std::path::{Path, PathBuf};

/// Default worker count
pub const DEFAULT_WORKERS: usize = 16;

/// Default maximum request body size (2.5 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 2_621_440;

/// Default ceiling on the header block, sized for about 38 header lines of
/// up to 4 KiB each
pub const DEFAULT_MAX_HEADER_SIZE: usize = 4096 * 38;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration (immutable after building)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    host: String,
    port: u16,
    use_ipv6: bool,
    workers: usize,
    queue_capacity: Option<usize>,
    max_body_size: usize,
    max_header_size: usize,
    media_root: PathBuf,
    verbose: bool,
}

impl ServerConfig {
    /// Create a configuration builder with defaults
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Load configuration from the environment
    ///
    /// Reads `H1SERVE_HOST`, `H1SERVE_PORT`, `H1SERVE_IPV6`,
    /// `H1SERVE_WORKERS`, `H1SERVE_QUEUE_CAPACITY`, `H1SERVE_MAX_BODY_SIZE`,
    /// `H1SERVE_MAX_HEADER_SIZE`, `H1SERVE_MEDIA_ROOT` and `H1SERVE_VERBOSE`.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = ServerConfigBuilder::new();

        if let Some(host) = lookup("H1SERVE_HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = lookup("H1SERVE_PORT") {
            builder = builder.port(parse_value("H1SERVE_PORT", &port)?);
        }
        if let Some(flag) = lookup("H1SERVE_IPV6") {
            builder = builder.use_ipv6(parse_flag("H1SERVE_IPV6", &flag)?);
        }
        if let Some(workers) = lookup("H1SERVE_WORKERS") {
            builder = builder.workers(parse_value("H1SERVE_WORKERS", &workers)?);
        }
        if let Some(capacity) = lookup("H1SERVE_QUEUE_CAPACITY") {
            builder = builder.queue_capacity(parse_value("H1SERVE_QUEUE_CAPACITY", &capacity)?);
        }
        if let Some(size) = lookup("H1SERVE_MAX_BODY_SIZE") {
            builder = builder.max_body_size(parse_value("H1SERVE_MAX_BODY_SIZE", &size)?);
        }
        if let Some(size) = lookup("H1SERVE_MAX_HEADER_SIZE") {
            builder = builder.max_header_size(parse_value("H1SERVE_MAX_HEADER_SIZE", &size)?);
        }
        if let Some(root) = lookup("H1SERVE_MEDIA_ROOT") {
            builder = builder.media_root(root);
        }
        if let Some(flag) = lookup("H1SERVE_VERBOSE") {
            builder = builder.verbose(parse_flag("H1SERVE_VERBOSE", &flag)?);
        }

        builder.build()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_ipv6(&self) -> bool {
        self.use_ipv6
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Pending-connection limit; `None` means unbounded
    pub fn queue_capacity(&self) -> Option<usize> {
        self.queue_capacity
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    /// Root for uploaded files; handed to body-processing code untouched
    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
            use_ipv6: false,
            workers: DEFAULT_WORKERS,
            queue_capacity: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            media_root: PathBuf::from("media"),
            verbose: false,
        }
    }
}

/// Builder for [`ServerConfig`]
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the bind port (0 lets the OS pick)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Bind an IPv6 socket instead of IPv4
    pub fn use_ipv6(mut self, use_ipv6: bool) -> Self {
        self.config.use_ipv6 = use_ipv6;
        self
    }

    /// Set the worker thread count
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Bound the number of accepted connections waiting for a worker
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = Some(capacity);
        self
    }

    /// Set the maximum request body size in bytes
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set the maximum header block size in bytes
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.config.max_header_size = size;
        self
    }

    /// Set the media root
    pub fn media_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.media_root = root.into();
        self
    }

    /// Log per-request timings
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let config = self.config;

        if config.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if config.queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        // The terminating blank line alone is four bytes.
        if config.max_header_size < 4 {
            return Err(ConfigError::Invalid(format!(
                "max header size {} is too small",
                config.max_header_size
            )));
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
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
    fn test_defaults() {
        let config = ServerConfig::builder().build().unwrap();
        assert_eq!(config.host(), "127.0.0.1");
        assert_eq!(config.port(), 8000);
        assert!(!config.use_ipv6());
        assert_eq!(config.workers(), 16);
        assert_eq!(config.queue_capacity(), None);
        assert_eq!(config.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.max_header_size(), 155_648);
        assert!(!config.verbose());
    }

    #[test]
    fn test_builder() {
        let media = tempfile::tempdir().unwrap();
        let config = ServerConfig::builder()
            .host("::1")
            .port(9000)
            .use_ipv6(true)
            .workers(4)
            .queue_capacity(32)
            .max_body_size(1024)
            .media_root(media.path())
            .verbose(true)
            .build()
            .unwrap();

        assert_eq!(config.host(), "::1");
        assert_eq!(config.port(), 9000);
        assert!(config.use_ipv6());
        assert_eq!(config.workers(), 4);
        assert_eq!(config.queue_capacity(), Some(32));
        assert_eq!(config.max_body_size(), 1024);
        assert_eq!(config.media_root(), media.path());
        assert!(config.verbose());
    }

    #[test]
    fn test_validation() {
        assert!(ServerConfig::builder().workers(0).build().is_err());
        assert!(ServerConfig::builder().queue_capacity(0).build().is_err());
        assert!(ServerConfig::builder().max_header_size(3).build().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("H1SERVE_HOST", "0.0.0.0"),
            ("H1SERVE_PORT", "8080"),
            ("H1SERVE_WORKERS", "2"),
            ("H1SERVE_VERBOSE", "yes"),
            ("H1SERVE_MAX_BODY_SIZE", "4096"),
        ]))
        .unwrap();

        assert_eq!(config.host(), "0.0.0.0");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.workers(), 2);
        assert!(config.verbose());
        assert_eq!(config.max_body_size(), 4096);
        assert!(!config.use_ipv6());
    }

    #[test]
    fn test_from_lookup_invalid() {
        let result = ServerConfig::from_lookup(lookup(&[("H1SERVE_PORT", "eighty")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: "H1SERVE_PORT", .. })
        ));

        let result = ServerConfig::from_lookup(lookup(&[("H1SERVE_IPV6", "maybe")]));
        assert!(result.is_err());
    }
}
