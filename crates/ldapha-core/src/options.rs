//! Connection options.
//!
//! Options are a closed set. Names from the configuration map are resolved
//! once, at load time, into typed [`ConnectionOption`] values; unknown names and
//! malformed values are configuration errors.

use crate::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Alias dereferencing policy for searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefAliases {
    /// Never dereference.
    #[default]
    Never,
    /// Dereference while searching below the base.
    Searching,
    /// Dereference when locating the base.
    Finding,
    /// Always dereference.
    Always,
}

impl DerefAliases {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_u64()? {
                0 => Some(Self::Never),
                1 => Some(Self::Searching),
                2 => Some(Self::Finding),
                3 => Some(Self::Always),
                _ => None,
            },
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "never" => Some(Self::Never),
                "searching" => Some(Self::Searching),
                "finding" => Some(Self::Finding),
                "always" => Some(Self::Always),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Kinds of supported connection options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    /// Alias dereferencing.
    Deref,
    /// Server-side entry count limit for searches.
    SizeLimit,
    /// Server-side time limit for searches, in seconds.
    TimeLimit,
    /// Client-side timeout for each operation.
    Timeout,
    /// Referral chasing.
    Referrals,
}

impl OptionKind {
    /// Canonical option name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deref => "deref",
            Self::SizeLimit => "sizelimit",
            Self::TimeLimit => "timelimit",
            Self::Timeout => "timeout",
            Self::Referrals => "referrals",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptionKind {
    type Err = Error;

    /// Accepts the canonical names case-insensitively, with or without an
    /// `LDAP_OPT_` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let name = lowered.strip_prefix("ldap_opt_").unwrap_or(&lowered);
        match name {
            "deref" => Ok(Self::Deref),
            "sizelimit" | "size_limit" => Ok(Self::SizeLimit),
            "timelimit" | "time_limit" => Ok(Self::TimeLimit),
            "timeout" | "network_timeout" => Ok(Self::Timeout),
            "referrals" => Ok(Self::Referrals),
            _ => Err(Error::ConfigError(format!("unknown connection option `{s}`"))),
        }
    }
}

/// A typed connection option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOption {
    /// Alias dereferencing policy.
    Deref(DerefAliases),
    /// Maximum entries returned by a search (0 = server default).
    SizeLimit(i32),
    /// Maximum seconds a search may take on the server (0 = server default).
    TimeLimit(i32),
    /// Client-side operation timeout.
    Timeout(Duration),
    /// Whether referrals are chased.
    Referrals(bool),
}

impl ConnectionOption {
    /// Resolve a configuration entry into a typed option.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for unknown names or values of the wrong
    /// shape.
    pub fn parse(name: &str, value: &Value) -> Result<Self> {
        let kind: OptionKind = name.parse()?;
        let invalid = || Error::ConfigError(format!("invalid value `{value}` for option `{kind}`"));

        match kind {
            OptionKind::Deref => DerefAliases::from_value(value)
                .map(Self::Deref)
                .ok_or_else(invalid),
            OptionKind::SizeLimit => as_limit(value).map(Self::SizeLimit).ok_or_else(invalid),
            OptionKind::TimeLimit => as_limit(value).map(Self::TimeLimit).ok_or_else(invalid),
            OptionKind::Timeout => value
                .as_u64()
                .map(|secs| Self::Timeout(Duration::from_secs(secs)))
                .ok_or_else(invalid),
            OptionKind::Referrals => as_flag(value).map(Self::Referrals).ok_or_else(invalid),
        }
    }

    /// The kind of this option.
    #[must_use]
    pub const fn kind(&self) -> OptionKind {
        match self {
            Self::Deref(_) => OptionKind::Deref,
            Self::SizeLimit(_) => OptionKind::SizeLimit,
            Self::TimeLimit(_) => OptionKind::TimeLimit,
            Self::Timeout(_) => OptionKind::Timeout,
            Self::Referrals(_) => OptionKind::Referrals,
        }
    }
}

fn as_limit(value: &Value) -> Option<i32> {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .filter(|n| *n >= 0)
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_option_names() {
        assert_eq!("deref".parse::<OptionKind>().unwrap(), OptionKind::Deref);
        assert_eq!(
            "LDAP_OPT_SIZELIMIT".parse::<OptionKind>().unwrap(),
            OptionKind::SizeLimit
        );
        assert_eq!(
            "network_timeout".parse::<OptionKind>().unwrap(),
            OptionKind::Timeout
        );
        assert!(matches!(
            "LDAP_OPT_RESTART".parse::<OptionKind>(),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(
            ConnectionOption::parse("deref", &json!("always")).unwrap(),
            ConnectionOption::Deref(DerefAliases::Always)
        );
        assert_eq!(
            ConnectionOption::parse("LDAP_OPT_DEREF", &json!(2)).unwrap(),
            ConnectionOption::Deref(DerefAliases::Finding)
        );
        assert_eq!(
            ConnectionOption::parse("sizelimit", &json!(500)).unwrap(),
            ConnectionOption::SizeLimit(500)
        );
        assert_eq!(
            ConnectionOption::parse("timeout", &json!(7)).unwrap(),
            ConnectionOption::Timeout(Duration::from_secs(7))
        );
        assert_eq!(
            ConnectionOption::parse("referrals", &json!(0)).unwrap(),
            ConnectionOption::Referrals(false)
        );
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(ConnectionOption::parse("sizelimit", &json!(-1)).is_err());
        assert!(ConnectionOption::parse("deref", &json!("sometimes")).is_err());
        assert!(ConnectionOption::parse("timeout", &json!("ten")).is_err());
        assert!(ConnectionOption::parse("referrals", &json!("yes")).is_err());
    }

    #[test]
    fn test_kind_round_trips_name() {
        let option = ConnectionOption::TimeLimit(30);
        assert_eq!(option.kind(), OptionKind::TimeLimit);
        assert_eq!(option.kind().to_string(), "timelimit");
    }
}
