//! Server configuration.

use crate::error::{ServerError, ServerResult};
use qbsync_protocol::QueryOptions;
use std::fmt;
use std::time::Duration;

/// Environment variable holding the Web Connector user name.
pub const ENV_USERNAME: &str = "QBWC_USERNAME";
/// Environment variable holding the Web Connector password.
pub const ENV_PASSWORD: &str = "QBWC_PASSWORD";
/// Environment variable holding the default company file.
pub const ENV_COMPANY_FILE: &str = "QBWC_COMPANY_FILE";

/// The single credential pair accepted by `authenticate`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Accepted credentials.
    pub credentials: Credentials,
    /// Company file returned by `authenticate` (empty: use the open file).
    pub company_file: String,
    /// Value returned by `serverVersion`.
    pub server_version: String,
    /// Oldest Web Connector version accepted without a warning.
    pub min_client_version: String,
    /// Sessions older than this are evicted.
    pub session_ttl: Duration,
    /// Upper bound for any session or event store call.
    pub store_timeout: Duration,
    /// Shape of the generated qbXML queries.
    pub query: QueryOptions,
}

impl ServerConfig {
    /// Creates a configuration accepting the given credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            company_file: String::new(),
            server_version: "1.0.0".into(),
            min_client_version: "2.0.0.0".into(),
            session_ttl: Duration::from_secs(4 * 60 * 60),
            store_timeout: Duration::from_secs(5),
            query: QueryOptions::default(),
        }
    }

    /// Reads credentials and the company file from the environment.
    ///
    /// Everything else keeps its default.
    pub fn from_env() -> ServerResult<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| ServerError::Config(format!("{name} is not set")))
        };
        let credentials = Credentials::new(var(ENV_USERNAME)?, var(ENV_PASSWORD)?);
        let company_file = std::env::var(ENV_COMPANY_FILE).unwrap_or_default();
        Ok(Self::new(credentials).with_company_file(company_file))
    }

    /// Sets the company file returned on authentication.
    pub fn with_company_file(mut self, company_file: impl Into<String>) -> Self {
        self.company_file = company_file.into();
        self
    }

    /// Sets the reported server version.
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    /// Sets the minimum client version.
    pub fn with_min_client_version(mut self, version: impl Into<String>) -> Self {
        self.min_client_version = version.into();
        self
    }

    /// Sets the session time-to-live.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the store call timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Sets `MaxReturned` for generated queries.
    pub fn with_max_returned(mut self, max: u32) -> Self {
        self.query.max_returned = max;
        self
    }

    /// Sets the sales look-back window in days.
    pub fn with_sales_look_back_days(mut self, days: u64) -> Self {
        self.query.sales_look_back_days = days;
        self
    }

    /// Also pull invoices during the sales phase.
    pub fn with_invoices(mut self, include: bool) -> Self {
        self.query.include_invoices = include;
        self
    }

    /// Sets the announced qbXML version.
    pub fn with_qbxml_version(mut self, version: impl Into<String>) -> Self {
        self.query.qbxml_version = version.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ServerConfig::new(Credentials::new("user", "pass"));
        assert_eq!(config.min_client_version, "2.0.0.0");
        assert_eq!(config.server_version, "1.0.0");
        assert_eq!(config.query.sales_look_back_days, 30);
        assert!(config.company_file.is_empty());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new(Credentials::new("user", "pass"))
            .with_company_file("Shop.qbw")
            .with_session_ttl(Duration::from_secs(60))
            .with_store_timeout(Duration::from_millis(250))
            .with_max_returned(25)
            .with_invoices(true);

        assert_eq!(config.company_file, "Shop.qbw");
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.query.max_returned, 25);
        assert!(config.query.include_invoices);
    }

    #[test]
    fn password_is_not_debug_printed() {
        let printed = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(printed.contains("user"));
        assert!(!printed.contains("hunter2"));
    }
}
