//! Error types for directory operations.
//!
//! Every failure surfaced by the client is a variant of [`Error`]. Variants that
//! originate from an LDAP result keep the numeric result code so callers can
//! make their own decisions, and [`Error::is_retryable`] identifies the single
//! class that the client recovers from by reconnecting.

use thiserror::Error;

/// Numeric LDAP result codes (RFC 4511 plus the client-side codes used by
/// common SDKs) that the client classifies explicitly.
pub mod result_code {
    /// Operation completed.
    pub const SUCCESS: u32 = 0;
    /// Server-side operations error; also the signature of a dropped session.
    pub const OPERATIONS_ERROR: u32 = 1;
    /// Malformed protocol exchange.
    pub const PROTOCOL_ERROR: u32 = 2;
    /// Server-enforced time limit hit.
    pub const TIME_LIMIT_EXCEEDED: u32 = 3;
    /// Server-enforced size limit hit.
    pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
    /// Base or target entry does not exist.
    pub const NO_SUCH_OBJECT: u32 = 32;
    /// Invalid bind credentials.
    pub const INVALID_CREDENTIALS: u32 = 49;
    /// Operation refused on an entry with subordinates.
    pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
    /// Entry already exists.
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    /// Unclassified server or client failure.
    pub const OTHER: u32 = 80;
    /// Client-side: server unreachable or connection lost.
    pub const SERVER_DOWN: u32 = 81;
    /// Client-side: malformed search filter.
    pub const FILTER_ERROR: u32 = 87;
    /// Client-side: transport could not be opened.
    pub const CONNECT_ERROR: u32 = 91;
}

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Configuration error (no hosts, malformed parameter, unknown option).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport could not be opened.
    #[error("Connection to {host} failed: {message}")]
    Connection {
        /// Host the connection attempt was made against
        host: String,
        /// Error message
        message: String,
    },

    /// Server rejected the requested protocol version.
    #[error("LDAP protocol version {version} rejected: {message}")]
    ProtocolVersion {
        /// Requested protocol version
        version: u32,
        /// Error message
        message: String,
    },

    /// Server does not advertise StartTLS or the upgrade failed.
    #[error("StartTLS unavailable: {0}")]
    TlsUnsupported(String),

    /// Bind was rejected.
    #[error("Bind failed (LDAP code {code}): {message}")]
    Bind {
        /// LDAP result code
        code: u32,
        /// Error message
        message: String,
    },

    /// Session dropped underneath a well-formed request.
    #[error("Operations error (LDAP code {code}): {message}")]
    Operations {
        /// LDAP result code
        code: u32,
        /// Error message
        message: String,
    },

    /// Delete refused because the entry has subordinates.
    #[error("Entry {0} has children; use a recursive delete")]
    HasChildren(String),

    /// Malformed search filter.
    #[error("Invalid search filter: {0}")]
    FilterSyntax(String),

    /// Lookup yielded no entries.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No session and auto-reconnect is disabled.
    #[error("Not connected to any directory server")]
    NotConnected,

    /// Any other non-success LDAP result.
    #[error("Directory error (LDAP code {code}): {message}")]
    Directory {
        /// LDAP result code
        code: u32,
        /// Error message
        message: String,
    },

    /// Operation or retry deadline elapsed.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Metadata cache error
    #[error("Cache error: {0}")]
    CacheError(String),

    /// One or more entries of a subtree could not be deleted.
    #[error("Deleting subtree {dn} failed for {} entries", .failures.len())]
    SubtreeDeleteFailed {
        /// Root of the subtree
        dn: String,
        /// Failed entries with their errors, deepest first
        failures: Vec<(String, Error)>,
    },

    /// Cross-directory move failed and the staged copy was removed again.
    #[error("Move aborted and rolled back: {cause}")]
    MoveRolledBack {
        /// Error that aborted the move
        cause: Box<Error>,
    },

    /// Cross-directory move failed and removing the staged copy failed too.
    #[error("Move aborted ({cause}); rollback failed: {compensation}")]
    MoveCompensationFailed {
        /// Error that aborted the move
        cause: Box<Error>,
        /// Error raised while removing the staged copy
        compensation: Box<Error>,
    },
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classifies a non-success LDAP result code.
    #[must_use]
    pub fn from_result_code(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            result_code::OPERATIONS_ERROR | result_code::SERVER_DOWN => {
                Self::Operations { code, message }
            }
            result_code::NOT_ALLOWED_ON_NON_LEAF => Self::HasChildren(message),
            result_code::FILTER_ERROR => Self::FilterSyntax(message),
            _ => Self::Directory { code, message },
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Connection { .. } => "CONNECTION_ERROR",
            Self::ProtocolVersion { .. } => "PROTOCOL_VERSION_ERROR",
            Self::TlsUnsupported(_) => "TLS_UNSUPPORTED",
            Self::Bind { .. } => "BIND_ERROR",
            Self::Operations { .. } => "OPERATIONS_ERROR",
            Self::HasChildren(_) => "HAS_CHILDREN",
            Self::FilterSyntax(_) => "FILTER_SYNTAX_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotConnected => "NOT_CONNECTED",
            Self::Directory { .. } => "DIRECTORY_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::CacheError(_) => "CACHE_ERROR",
            Self::SubtreeDeleteFailed { .. } => "SUBTREE_DELETE_FAILED",
            Self::MoveRolledBack { .. } => "MOVE_ROLLED_BACK",
            Self::MoveCompensationFailed { .. } => "MOVE_COMPENSATION_FAILED",
        }
    }

    /// Returns the LDAP result code carried by this error, if any.
    #[must_use]
    pub const fn result_code(&self) -> Option<u32> {
        match self {
            Self::Bind { code, .. } | Self::Operations { code, .. } | Self::Directory { code, .. } => {
                Some(*code)
            }
            Self::HasChildren(_) => Some(result_code::NOT_ALLOWED_ON_NON_LEAF),
            Self::FilterSyntax(_) => Some(result_code::FILTER_ERROR),
            Self::Connection { .. } => Some(result_code::CONNECT_ERROR),
            _ => None,
        }
    }

    /// Returns true for the only class the client recovers from by
    /// reconnecting and retrying the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Operations { .. })
    }

    /// Returns true for errors surfaced at `warn` level rather than `debug`.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::Connection { .. }
                | Self::SubtreeDeleteFailed { .. }
                | Self::MoveCompensationFailed { .. }
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid host URL: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
