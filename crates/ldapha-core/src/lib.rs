//! # ldapha-core
//!
//! Core types shared by the `ldapha` directory client.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and LDAP result code classification
//! - [`config`] - Client configuration and bind credentials
//! - [`options`] - Typed connection options
//! - [`backoff`] - Reconnection backoff controller

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod options;

// Re-export commonly used types
pub use backoff::Backoff;
pub use config::{Credentials, DirectoryConfig, SearchScope};
pub use error::{Error, Result};
pub use options::{ConnectionOption, DerefAliases, OptionKind};
