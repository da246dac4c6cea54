//! Resilient LDAP directory client.
//!
//! [`DirectoryClient`] keeps one session to one of several configured
//! directory servers. It fails over between hosts, reconnects with
//! exponential backoff when the session drops, resends the interrupted
//! operation, and caches RootDSE and schema lookups.
//!
//! ```no_run
//! use ldapha::{DirectoryClient, DirectoryConfig, SearchParams};
//!
//! # async fn run() -> ldapha::Result<()> {
//! let config = DirectoryConfig::new(["ldap1.example.com", "ldap2.example.com"])?
//!     .with_base_dn("dc=example,dc=com")
//!     .with_auto_reconnect(true);
//! let mut client = DirectoryClient::connect(config).await?;
//! let people = client
//!     .search(None, Some("(objectClass=person)"), SearchParams::new())
//!     .await?;
//! println!("{} people", people.count());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

mod cache;
mod client;
mod connector;
pub mod dn;
mod entry;
mod hosts;
mod ldap3_transport;
mod schema;
mod search;
#[cfg(test)]
mod testing;
mod transport;

pub use cache::{JsonFileSchemaStore, RootDse, SchemaStore, DEFAULT_ROOT_DSE_ATTRIBUTES, STARTTLS_OID};
pub use client::{DirectoryClient, MAX_SUBTREE_DEPTH};
pub use dn::{join_dn, split_dn, DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::{DirectoryModification, Entry};
pub use hosts::{split_host_port, HostRotation};
pub use ldap3_transport::Ldap3Factory;
pub use schema::{AttributeType, ObjectClass, Schema, SchemaElement, SchemaItem, DIRECTORY_STRING_SYNTAX};
pub use search::{escape_filter_value, normalize_filter, SearchParams, SearchResult};
pub use transport::{LdapTransport, RenameRequest, SearchRequest, SearchResponse, TransportFactory};

pub use ldapha_core::{
    Backoff, ConnectionOption, Credentials, DerefAliases, DirectoryConfig, Error, OptionKind,
    SearchScope,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ldapha_core::Result<T>;
