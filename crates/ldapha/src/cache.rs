//! RootDSE and schema caches.
//!
//! Both caches live inside one client instance. RootDSE records are keyed by
//! the requested attribute set and never evicted. The schema cache tracks an
//! explicit unfetched / fetching / fetched marker so a re-entrant lookup during
//! a fetch fails fast instead of starting another fetch.

use crate::entry::Entry;
use crate::schema::Schema;
use crate::transport::{LdapTransport, SearchRequest};
use async_trait::async_trait;
use ldapha_core::error::result_code;
use ldapha_core::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// StartTLS extended operation OID.
pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// Attributes read when no explicit RootDSE attributes are requested.
pub const DEFAULT_ROOT_DSE_ATTRIBUTES: &[&str] = &[
    "namingContexts",
    "altServer",
    "supportedExtension",
    "supportedControl",
    "supportedSASLMechanisms",
    "supportedLDAPVersion",
    "subschemaSubentry",
];

/// The server's root entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDse {
    entry: Entry,
}

impl RootDse {
    /// Wraps the entry read from the empty DN.
    #[must_use]
    pub fn new(entry: Entry) -> Self {
        Self { entry }
    }

    /// Values of an attribute; empty when absent.
    #[must_use]
    pub fn values(&self, attribute: &str) -> &[String] {
        self.entry.values(attribute).unwrap_or_default()
    }

    /// Returns true when the server lists the extended operation.
    #[must_use]
    pub fn supports_extension(&self, oid: &str) -> bool {
        self.values("supportedExtension").iter().any(|value| value == oid)
    }

    /// Returns true when the server lists the control.
    #[must_use]
    pub fn supports_control(&self, oid: &str) -> bool {
        self.values("supportedControl").iter().any(|value| value == oid)
    }

    /// Returns true when the server lists the protocol version.
    #[must_use]
    pub fn supports_version(&self, version: u32) -> bool {
        self.values("supportedLDAPVersion")
            .iter()
            .any(|value| value.trim().parse::<u32>().ok() == Some(version))
    }

    /// Naming contexts served.
    #[must_use]
    pub fn naming_contexts(&self) -> &[String] {
        self.values("namingContexts")
    }

    /// DN of the subschema entry, if advertised.
    #[must_use]
    pub fn subschema_subentry(&self) -> Option<&str> {
        self.entry.first("subschemaSubentry")
    }
}

/// Normalized request attributes: the defaults when empty, otherwise
/// de-duplicated case-insensitively in request order.
#[must_use]
pub(crate) fn root_dse_attributes(attributes: &[String]) -> Vec<String> {
    if attributes.is_empty() {
        return DEFAULT_ROOT_DSE_ATTRIBUTES
            .iter()
            .map(ToString::to_string)
            .collect();
    }
    let mut seen = Vec::<String>::new();
    for attribute in attributes {
        if !seen.iter().any(|s| s.eq_ignore_ascii_case(attribute)) {
            seen.push(attribute.clone());
        }
    }
    seen
}

/// Cache key: sorted, lower-cased attribute names.
#[must_use]
pub(crate) fn root_dse_key(attributes: &[String]) -> String {
    let mut names: Vec<String> = attributes
        .iter()
        .map(|attribute| attribute.to_ascii_lowercase())
        .collect();
    names.sort();
    names.dedup();
    names.join(",")
}

/// Reads the RootDSE on an open transport.
///
/// # Errors
///
/// Propagates transport failures and non-success result codes.
pub(crate) async fn read_root_dse(
    transport: &mut dyn LdapTransport,
    attributes: &[String],
) -> Result<RootDse> {
    let request = SearchRequest::base_object("", attributes.to_vec());
    let response = transport.search(&request).await?;
    if response.code != result_code::SUCCESS {
        return Err(Error::from_result_code(response.code, response.message));
    }
    Ok(root_dse_from_entries(response.entries))
}

pub(crate) fn root_dse_from_entries(entries: Vec<Entry>) -> RootDse {
    RootDse::new(entries.into_iter().next().unwrap_or_default())
}

/// RootDSE records keyed by requested attribute set.
#[derive(Debug, Default)]
pub(crate) struct RootDseCache {
    entries: HashMap<String, Arc<RootDse>>,
}

impl RootDseCache {
    pub(crate) fn get(&self, key: &str) -> Option<Arc<RootDse>> {
        self.entries.get(key).cloned()
    }

    pub(crate) fn insert(&mut self, key: String, root_dse: RootDse) -> Arc<RootDse> {
        let root_dse = Arc::new(root_dse);
        self.entries.insert(key, Arc::clone(&root_dse));
        root_dse
    }

    /// Returns the cached record or reads and caches it.
    pub(crate) async fn fetch(
        &mut self,
        transport: &mut dyn LdapTransport,
        attributes: &[String],
    ) -> Result<Arc<RootDse>> {
        let attributes = root_dse_attributes(attributes);
        let key = root_dse_key(&attributes);
        if let Some(hit) = self.get(&key) {
            debug!(%key, "RootDSE cache hit");
            return Ok(hit);
        }
        let root_dse = read_root_dse(transport, &attributes).await?;
        Ok(self.insert(key, root_dse))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Persistent schema storage consulted before a live schema fetch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Loads a stored schema, `None` when nothing is stored.
    async fn load(&self) -> Result<Option<Schema>>;
    /// Stores a freshly fetched schema.
    async fn store(&self, schema: &Schema) -> Result<()>;
}

/// Stores the schema as a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSchemaStore {
    path: PathBuf,
}

impl JsonFileSchemaStore {
    /// Store backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchemaStore for JsonFileSchemaStore {
    async fn load(&self) -> Result<Option<Schema>> {
        let document = match tokio::fs::read_to_string(&self.path).await {
            Ok(document) => document,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::CacheError(format!(
                    "failed to read schema cache {}: {err}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&document).map(Some).map_err(|err| {
            Error::CacheError(format!(
                "corrupt schema cache {}: {err}",
                self.path.display()
            ))
        })
    }

    async fn store(&self, schema: &Schema) -> Result<()> {
        let document = serde_json::to_string(schema)
            .map_err(|err| Error::CacheError(format!("failed to encode schema: {err}")))?;
        tokio::fs::write(&self.path, document).await.map_err(|err| {
            Error::CacheError(format!(
                "failed to write schema cache {}: {err}",
                self.path.display()
            ))
        })
    }
}

#[derive(Debug, Clone, Default)]
enum SchemaState {
    #[default]
    Unfetched,
    Fetching,
    Fetched(Arc<Schema>),
}

/// In-memory schema plus the optional persistent store.
#[derive(Default)]
pub(crate) struct SchemaCache {
    state: Arc<Mutex<SchemaState>>,
    store: Option<Box<dyn SchemaStore>>,
}

pub(crate) enum SchemaLookup {
    Cached(Arc<Schema>),
    Fetch(FetchGuard),
}

/// Marks a fetch in flight; dropping it without [`FetchGuard::complete`]
/// returns the cache to the unfetched state.
pub(crate) struct FetchGuard {
    state: Arc<Mutex<SchemaState>>,
    completed: bool,
}

impl FetchGuard {
    pub(crate) fn complete(mut self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        *lock(&self.state) = SchemaState::Fetched(Arc::clone(&schema));
        self.completed = true;
        schema
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        if !self.completed {
            *lock(&self.state) = SchemaState::Unfetched;
        }
    }
}

fn lock(state: &Mutex<SchemaState>) -> std::sync::MutexGuard<'_, SchemaState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SchemaCache {
    pub(crate) fn set_store(&mut self, store: Box<dyn SchemaStore>) {
        self.store = Some(store);
    }

    pub(crate) fn store(&self) -> Option<&dyn SchemaStore> {
        self.store.as_deref()
    }

    /// Returns the cached schema, or marks a fetch in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheError`] when a fetch is already in flight.
    pub(crate) fn begin(&self) -> Result<SchemaLookup> {
        let mut state = lock(&self.state);
        match &*state {
            SchemaState::Fetched(schema) => Ok(SchemaLookup::Cached(Arc::clone(schema))),
            SchemaState::Fetching => Err(Error::CacheError(
                "schema fetch already in progress".to_string(),
            )),
            SchemaState::Unfetched => {
                *state = SchemaState::Fetching;
                Ok(SchemaLookup::Fetch(FetchGuard {
                    state: Arc::clone(&self.state),
                    completed: false,
                }))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_fetched(&self) -> bool {
        matches!(*lock(&self.state), SchemaState::Fetched(_))
    }
}
