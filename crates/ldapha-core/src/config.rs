//! Directory client configuration.
//!
//! [`DirectoryConfig`] is built either programmatically (`new` + `with_*`
//! overrides) or deserialized from a configuration document. Deserialization
//! accepts the legacy key aliases (`dn`, `password`, `tls`, `base`), a single
//! host or a list of hosts, and an option map that is resolved into typed
//! [`ConnectionOption`]s before the configuration is handed out.

use crate::backoff::{
    Backoff, DEFAULT_CURRENT_BACKOFF_SECS, DEFAULT_MAX_BACKOFF_SECS, DEFAULT_MIN_BACKOFF_SECS,
};
use crate::options::ConnectionOption;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;
use validator::Validate;

/// Default LDAP port.
pub const DEFAULT_PORT: u16 = 389;
/// Default LDAP protocol version.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 3;
/// Default search filter.
pub const DEFAULT_FILTER: &str = "(objectClass=*)";
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SearchScope {
    /// Base object only.
    #[serde(rename = "base")]
    Base,
    /// One level below the base.
    #[serde(rename = "one", alias = "onelevel")]
    OneLevel,
    /// Entire subtree.
    #[default]
    #[serde(rename = "sub", alias = "subtree")]
    Subtree,
}

/// Bind credentials. An empty DN means an anonymous bind.
#[derive(Debug, Clone)]
pub struct Credentials {
    dn: String,
    password: SecretString,
}

impl Credentials {
    /// Create credentials for a simple bind.
    #[must_use]
    pub fn new(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Anonymous credentials.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(String::new(), String::new())
    }

    /// Bind DN.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Bind password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns true when binding anonymously.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.dn.is_empty()
    }
}

/// Configuration for a directory client instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawDirectoryConfig")]
pub struct DirectoryConfig {
    hosts: Vec<String>,
    port: u16,
    version: u32,
    starttls: bool,
    credentials: Credentials,
    base_dn: String,
    filter: String,
    scope: SearchScope,
    options: Vec<ConnectionOption>,
    auto_reconnect: bool,
    backoff: Backoff,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    connection_timeout_secs: u64,
    operation_timeout_secs: u64,
    retry_timeout_secs: Option<u64>,
}

impl DirectoryConfig {
    /// Creates a configuration for the given hosts with every other setting at
    /// its default.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if no hosts are given or a host entry is
    /// malformed.
    pub fn new<I, S>(hosts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts = normalize_hosts(hosts.into_iter().map(Into::into).collect())?;

        Ok(Self {
            hosts,
            port: DEFAULT_PORT,
            version: DEFAULT_PROTOCOL_VERSION,
            starttls: false,
            credentials: Credentials::anonymous(),
            base_dn: String::new(),
            filter: DEFAULT_FILTER.to_string(),
            scope: SearchScope::Subtree,
            options: Vec::new(),
            auto_reconnect: false,
            backoff: Backoff::default(),
            tls_verify: true,
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            retry_timeout_secs: None,
        })
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for malformed documents, unknown options
    /// or values out of range.
    pub fn from_json(document: &str) -> Result<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Configured hosts, in rotation order.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Default port for hosts without an explicit port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Requested LDAP protocol version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Whether connections are upgraded with StartTLS.
    #[must_use]
    pub const fn starttls(&self) -> bool {
        self.starttls
    }

    /// Initial bind credentials.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Default search base.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Default search filter.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Default search scope.
    #[must_use]
    pub const fn scope(&self) -> SearchScope {
        self.scope
    }

    /// Connection options, in application order.
    #[must_use]
    pub fn options(&self) -> &[ConnectionOption] {
        &self.options
    }

    /// Whether dropped sessions are re-established transparently.
    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// Initial backoff state.
    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Upper bound on the time an operation spends reconnecting and retrying.
    #[must_use]
    pub fn retry_timeout(&self) -> Option<Duration> {
        self.retry_timeout_secs.map(Duration::from_secs)
    }

    /// Overrides the default port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the protocol version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Enables or disables StartTLS.
    #[must_use]
    pub const fn with_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    /// Sets the bind credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the default search base.
    #[must_use]
    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = base_dn.into();
        self
    }

    /// Sets the default search filter.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Sets the default search scope.
    #[must_use]
    pub const fn with_scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Appends a connection option.
    #[must_use]
    pub fn with_option(mut self, option: ConnectionOption) -> Self {
        self.options.push(option);
        self
    }

    /// Enables or disables transparent reconnection.
    #[must_use]
    pub const fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Overrides the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, min: Duration, current: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(min, current, max);
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Bounds the reconnect-and-retry loop of every operation.
    #[must_use]
    pub const fn with_retry_timeout_secs(mut self, seconds: u64) -> Self {
        self.retry_timeout_secs = Some(seconds);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostList {
    One(String),
    Many(Vec<String>),
}

impl Default for HostList {
    fn default() -> Self {
        Self::One("localhost".to_string())
    }
}

/// Wire shape of the configuration document.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
struct RawDirectoryConfig {
    #[serde(default)]
    host: HostList,

    #[validate(range(min = 1))]
    #[serde(default = "default_port")]
    port: u16,

    #[validate(range(min = 2, max = 3))]
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default, alias = "tls")]
    starttls: bool,

    #[serde(default, alias = "dn")]
    binddn: String,

    #[serde(default, alias = "password")]
    bindpw: Option<SecretString>,

    #[serde(default, alias = "base")]
    basedn: String,

    /// Kept in document order; options are applied in that order.
    #[serde(default)]
    options: serde_json::Map<String, serde_json::Value>,

    #[serde(default = "default_filter")]
    filter: String,

    #[serde(default)]
    scope: SearchScope,

    #[serde(default)]
    auto_reconnect: bool,

    #[serde(default = "default_min_backoff")]
    min_backoff: u64,

    #[serde(default = "default_current_backoff")]
    current_backoff: u64,

    #[validate(range(min = 1))]
    #[serde(default = "default_max_backoff")]
    max_backoff: u64,

    #[serde(default = "default_tls_verify")]
    tls_verify: bool,

    #[serde(default)]
    tls_ca_cert: Option<PathBuf>,

    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout")]
    connection_timeout: u64,

    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_operation_timeout")]
    operation_timeout: u64,

    #[serde(default)]
    retry_timeout: Option<u64>,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_version() -> u32 {
    DEFAULT_PROTOCOL_VERSION
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

const fn default_min_backoff() -> u64 {
    DEFAULT_MIN_BACKOFF_SECS
}

const fn default_current_backoff() -> u64 {
    DEFAULT_CURRENT_BACKOFF_SECS
}

const fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_SECS
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

impl TryFrom<RawDirectoryConfig> for DirectoryConfig {
    type Error = Error;

    fn try_from(raw: RawDirectoryConfig) -> Result<Self> {
        raw.validate()?;

        if !(raw.min_backoff <= raw.current_backoff && raw.current_backoff <= raw.max_backoff) {
            return Err(Error::ConfigError(format!(
                "backoff must satisfy min <= current <= max (got {}/{}/{})",
                raw.min_backoff, raw.current_backoff, raw.max_backoff
            )));
        }

        let hosts = match raw.host {
            HostList::One(host) => vec![host],
            HostList::Many(hosts) => hosts,
        };

        let options = raw
            .options
            .iter()
            .map(|(name, value)| ConnectionOption::parse(name, value))
            .collect::<Result<Vec<_>>>()?;

        let password = raw
            .bindpw
            .map(|secret| secret.expose_secret().to_string())
            .unwrap_or_default();

        Ok(Self {
            hosts: normalize_hosts(hosts)?,
            port: raw.port,
            version: raw.version,
            starttls: raw.starttls,
            credentials: Credentials::new(raw.binddn, password),
            base_dn: raw.basedn,
            filter: raw.filter,
            scope: raw.scope,
            options,
            auto_reconnect: raw.auto_reconnect,
            backoff: Backoff::new(
                Duration::from_secs(raw.min_backoff),
                Duration::from_secs(raw.current_backoff),
                Duration::from_secs(raw.max_backoff),
            ),
            tls_verify: raw.tls_verify,
            tls_ca_cert: raw.tls_ca_cert,
            connection_timeout_secs: raw.connection_timeout,
            operation_timeout_secs: raw.operation_timeout,
            retry_timeout_secs: raw.retry_timeout,
        })
    }
}

/// Trims host entries, rejects empty lists, and reduces `ldap://` URLs to
/// `host[:port]`.
fn normalize_hosts(hosts: Vec<String>) -> Result<Vec<String>> {
    if hosts.is_empty() {
        return Err(Error::ConfigError("no servers configured".to_string()));
    }

    hosts
        .into_iter()
        .map(|host| {
            let host = host.trim();
            if host.is_empty() {
                return Err(Error::ConfigError("empty host entry".to_string()));
            }
            if !host.contains("://") {
                return Ok(host.to_string());
            }

            let url = Url::parse(host)?;
            if url.scheme() != "ldap" {
                return Err(Error::ConfigError(format!(
                    "unsupported scheme `{}` in `{host}`; use `ldap://` with starttls",
                    url.scheme()
                )));
            }
            let name = url
                .host_str()
                .ok_or_else(|| Error::ConfigError(format!("host URL `{host}` has no host")))?;
            let entry = match url.port() {
                Some(port) => format!("{name}:{port}"),
                None => name.to_string(),
            };
            debug!(url = %host, host = %entry, "host URL normalized");
            Ok(entry)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DerefAliases;

    #[test]
    fn test_defaults() {
        let config = DirectoryConfig::new(["ldap.example.com"]).unwrap();
        assert_eq!(config.hosts(), ["ldap.example.com"]);
        assert_eq!(config.port(), 389);
        assert_eq!(config.version(), 3);
        assert!(!config.starttls());
        assert!(config.credentials().is_anonymous());
        assert_eq!(config.filter(), "(objectClass=*)");
        assert_eq!(config.scope(), SearchScope::Subtree);
        assert!(!config.auto_reconnect());
        assert_eq!(config.backoff(), Backoff::default());
        assert!(config.retry_timeout().is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let config = DirectoryConfig::new(["a", "b"])
            .unwrap()
            .with_port(1389)
            .with_starttls(true)
            .with_credentials(Credentials::new("cn=admin,dc=test", "secret"))
            .with_base_dn("dc=test")
            .with_scope(SearchScope::OneLevel)
            .with_option(ConnectionOption::SizeLimit(10))
            .with_auto_reconnect(true)
            .with_backoff(
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(80),
            )
            .with_operation_timeout_secs(30)
            .with_retry_timeout_secs(120);

        assert_eq!(config.port(), 1389);
        assert!(config.starttls());
        assert_eq!(config.credentials().dn(), "cn=admin,dc=test");
        assert_eq!(config.credentials().password(), "secret");
        assert_eq!(config.base_dn(), "dc=test");
        assert_eq!(config.options(), [ConnectionOption::SizeLimit(10)]);
        assert!(config.auto_reconnect());
        assert_eq!(config.backoff().max(), Duration::from_millis(80));
        assert_eq!(config.operation_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_empty_host_list_rejected() {
        let err = DirectoryConfig::new(Vec::<String>::new()).unwrap_err();
        assert_eq!(err, Error::ConfigError("no servers configured".to_string()));
    }

    #[test]
    fn test_host_urls_are_normalized() {
        let config =
            DirectoryConfig::new(["ldap://ldap1.example.com:1389", " ldap2.example.com "]).unwrap();
        assert_eq!(config.hosts(), ["ldap1.example.com:1389", "ldap2.example.com"]);

        assert!(DirectoryConfig::new(["ldaps://ldap1.example.com"]).is_err());
    }

    #[test]
    fn test_legacy_aliases() {
        let config = DirectoryConfig::from_json(
            r#"{
                "host": "ldap.example.com",
                "dn": "cn=admin,dc=test",
                "password": "secret",
                "tls": true,
                "base": "dc=test"
            }"#,
        )
        .unwrap();

        assert_eq!(config.credentials().dn(), "cn=admin,dc=test");
        assert_eq!(config.credentials().password(), "secret");
        assert!(config.starttls());
        assert_eq!(config.base_dn(), "dc=test");
    }

    #[test]
    fn test_full_document() {
        let config = DirectoryConfig::from_json(
            r#"{
                "host": ["a.example.com", "b.example.com"],
                "port": 636,
                "version": 3,
                "starttls": false,
                "binddn": "cn=admin,dc=test",
                "bindpw": "secret",
                "basedn": "dc=test",
                "filter": "(objectClass=person)",
                "scope": "one",
                "options": {"LDAP_OPT_DEREF": "always", "sizelimit": 100},
                "auto_reconnect": true,
                "min_backoff": 2,
                "current_backoff": 4,
                "max_backoff": 16,
                "retry_timeout": 60
            }"#,
        )
        .unwrap();

        assert_eq!(config.hosts().len(), 2);
        assert_eq!(config.port(), 636);
        assert_eq!(config.scope(), SearchScope::OneLevel);
        assert_eq!(
            config.options(),
            [
                ConnectionOption::Deref(DerefAliases::Always),
                ConnectionOption::SizeLimit(100)
            ]
        );
        assert!(config.auto_reconnect());
        assert_eq!(config.backoff().current(), Duration::from_secs(4));
        assert_eq!(config.retry_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_options_keep_document_order() {
        let config =
            DirectoryConfig::from_json(r#"{"options": {"timelimit": 5, "deref": "always"}}"#)
                .unwrap();
        assert_eq!(
            config.options(),
            [
                ConnectionOption::TimeLimit(5),
                ConnectionOption::Deref(DerefAliases::Always)
            ]
        );
    }

    #[test]
    fn test_unknown_option_rejected_at_load() {
        let err = DirectoryConfig::from_json(r#"{"options": {"LDAP_OPT_RESTART": true}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(message) if message.contains("LDAP_OPT_RESTART")));
    }

    #[test]
    fn test_backoff_ordering_enforced() {
        let err = DirectoryConfig::from_json(
            r#"{"min_backoff": 8, "current_backoff": 2, "max_backoff": 32}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_version_range_validated() {
        assert!(DirectoryConfig::from_json(r#"{"version": 4}"#).is_err());
        assert!(DirectoryConfig::from_json(r#"{"version": 2}"#).is_ok());
    }

    #[test]
    fn test_default_host() {
        let config = DirectoryConfig::from_json("{}").unwrap();
        assert_eq!(config.hosts(), ["localhost"]);
    }
}
