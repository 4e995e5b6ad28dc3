//! Listener configuration.

use std::time::Duration;

use arbiter_config::ServiceConfig;

/// Default authorization endpoint address.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8152";

/// Default admin endpoint address.
pub const DEFAULT_ADMIN_ADDR: &str = "127.0.0.1:8153";

/// Default bound on an authorization request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Addresses and limits for the HTTP listeners.
///
/// # Example
///
/// ```rust
/// use arbiter_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::builder()
///     .http_addr("127.0.0.1:9152")
///     .shutdown_timeout(Duration::from_secs(5))
///     .build();
///
/// assert_eq!(config.http_addr(), "127.0.0.1:9152");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    http_addr: String,
    admin_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl ServerConfig {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Authorization endpoint address.
    pub fn http_addr(&self) -> &str {
        &self.http_addr
    }

    /// Admin endpoint address.
    pub fn admin_addr(&self) -> &str {
        &self.admin_addr
    }

    /// How long to drain open connections on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Upper bound on reading and answering one request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Largest accepted request body.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl From<&ServiceConfig> for ServerConfig {
    fn from(service: &ServiceConfig) -> Self {
        Self::builder()
            .http_addr(&service.http_addr)
            .admin_addr(&service.admin_addr)
            .shutdown_timeout(Duration::from_secs(service.shutdown_timeout_secs))
            .request_timeout(Duration::from_millis(service.request_timeout_ms))
            .build()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    http_addr: String,
    admin_addr: String,
    shutdown_timeout: Duration,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            admin_addr: DEFAULT_ADMIN_ADDR.to_string(),
            shutdown_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfigBuilder {
    /// Sets the authorization endpoint address.
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Sets the admin endpoint address.
    pub fn admin_addr(mut self, addr: impl Into<String>) -> Self {
        self.admin_addr = addr.into();
        self
    }

    /// Sets the drain bound.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the body size limit.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr,
            admin_addr: self.admin_addr,
            shutdown_timeout: self.shutdown_timeout,
            request_timeout: self.request_timeout,
            max_body_bytes: self.max_body_bytes,
        }
    }
}
