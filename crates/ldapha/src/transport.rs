//! Transport abstraction.
//!
//! [`TransportFactory`] opens a connection to one `host:port`; the resulting
//! [`LdapTransport`] performs protocol operations on it. The client never talks
//! to `ldap3` directly, which keeps the connection lifecycle testable with
//! mocks and lets callers plug in other transports.

use crate::entry::{DirectoryModification, Entry};
use async_trait::async_trait;
use ldapha_core::error::result_code;
use ldapha_core::{ConnectionOption, Error, Result, SearchScope};

/// A search as sent to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base.
    pub base: String,
    /// Scope.
    pub scope: SearchScope,
    /// Filter string.
    pub filter: String,
    /// Requested attributes; all user attributes when empty.
    pub attributes: Vec<String>,
    /// Size limit (0 = transport default).
    pub size_limit: i32,
    /// Time limit in seconds (0 = transport default).
    pub time_limit: i32,
    /// Return attribute names only.
    pub types_only: bool,
}

impl SearchRequest {
    /// Base-scope read of a single entry.
    #[must_use]
    pub fn base_object(base: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            base: base.into(),
            scope: SearchScope::Base,
            filter: "(objectClass=*)".to_string(),
            attributes,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
        }
    }
}

/// Raw search outcome: the entries plus the server's result code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResponse {
    /// Entries returned before the final result.
    pub entries: Vec<Entry>,
    /// LDAP result code of the search.
    pub code: u32,
    /// Diagnostic message.
    pub message: String,
}

impl SearchResponse {
    /// Successful response with the given entries.
    #[must_use]
    pub fn success(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            code: result_code::SUCCESS,
            message: String::new(),
        }
    }
}

/// A modify-DN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    /// Entry to rename.
    pub dn: String,
    /// New leaf RDN.
    pub new_rdn: String,
    /// New parent, when the entry moves within the tree.
    pub new_superior: Option<String>,
    /// Remove the old RDN value from the entry.
    pub delete_old_rdn: bool,
}

/// Operations on one open connection.
///
/// Implementations report non-success results of write operations and binds
/// as errors classified with [`Error::from_result_code`] (binds as
/// [`Error::Bind`]). A lost connection is reported as [`Error::Operations`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapTransport: Send {
    /// Upgrades the connection with StartTLS.
    async fn start_tls(&mut self) -> Result<()>;
    /// Forces the protocol version without consulting the server.
    async fn set_protocol_version(&mut self, version: u32) -> Result<()>;
    /// Simple bind; an empty DN binds anonymously.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    /// Applies a connection option.
    async fn set_option(&mut self, option: ConnectionOption) -> Result<()>;
    /// Runs a search; the server's result code is returned, not raised.
    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse>;
    /// Adds an entry.
    async fn add(&mut self, entry: &Entry) -> Result<()>;
    /// Deletes a leaf entry.
    async fn delete(&mut self, dn: &str) -> Result<()>;
    /// Modifies an entry.
    async fn modify(&mut self, dn: &str, changes: &[DirectoryModification]) -> Result<()>;
    /// Renames or moves an entry within the same server.
    async fn rename(&mut self, request: &RenameRequest) -> Result<()>;
    /// Unbinds and closes the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens transports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a connection to `host:port`.
    async fn open(&self, host: &str, port: u16) -> Result<Box<dyn LdapTransport>>;
}

/// An operation that the retry wrapper may send more than once.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Request<'r> {
    Search(&'r SearchRequest),
    Add(&'r Entry),
    Delete(&'r str),
    Modify(&'r str, &'r [DirectoryModification]),
    Rename(&'r RenameRequest),
}

#[derive(Debug)]
pub(crate) enum Response {
    Done,
    Search(SearchResponse),
}

impl Request<'_> {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Add(_) => "add",
            Self::Delete(_) => "delete",
            Self::Modify(..) => "modify",
            Self::Rename(_) => "rename",
        }
    }

    pub(crate) fn target(&self) -> &str {
        match self {
            Self::Search(request) => &request.base,
            Self::Add(entry) => entry.dn(),
            Self::Delete(dn) | Self::Modify(dn, _) => dn,
            Self::Rename(request) => &request.dn,
        }
    }

    /// Sends the request. Search result codes other than success, no such
    /// object and size limit exceeded become errors here, so the caller
    /// classifies every failure the same way.
    pub(crate) async fn send(&self, transport: &mut dyn LdapTransport) -> Result<Response> {
        match *self {
            Self::Search(request) => {
                let response = transport.search(request).await?;
                match response.code {
                    result_code::SUCCESS
                    | result_code::NO_SUCH_OBJECT
                    | result_code::SIZE_LIMIT_EXCEEDED => Ok(Response::Search(response)),
                    code => Err(Error::from_result_code(code, response.message)),
                }
            }
            Self::Add(entry) => transport.add(entry).await.map(|()| Response::Done),
            Self::Delete(dn) => transport.delete(dn).await.map(|()| Response::Done),
            Self::Modify(dn, changes) => transport.modify(dn, changes).await.map(|()| Response::Done),
            Self::Rename(request) => transport.rename(request).await.map(|()| Response::Done),
        }
    }
}
