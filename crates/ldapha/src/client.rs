//! Directory client with host failover and automatic reconnection.

use crate::cache::{
    root_dse_attributes, root_dse_from_entries, root_dse_key, RootDse, RootDseCache, SchemaCache,
    SchemaLookup, SchemaStore,
};
use crate::connector::{Connector, Session};
use crate::dn::DistinguishedName;
use crate::entry::{DirectoryModification, Entry};
use crate::hosts::HostRotation;
use crate::ldap3_transport::Ldap3Factory;
use crate::schema::Schema;
use crate::search::{normalize_filter, SearchParams, SearchResult};
use crate::transport::{RenameRequest, Request, Response, SearchRequest, SearchResponse, TransportFactory};
use ldapha_core::error::result_code;
use ldapha_core::{
    Backoff, ConnectionOption, Credentials, DirectoryConfig, Error, OptionKind, Result, SearchScope,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Deepest subtree, in levels below the base, that a recursive delete walks.
pub const MAX_SUBTREE_DEPTH: usize = 64;

const SUBSCHEMA_ATTRIBUTES: &[&str] = &["attributeTypes", "objectClasses"];
const DEFAULT_SUBSCHEMA_DN: &str = "cn=Subschema";

/// LDAP client bound to one configuration.
///
/// Owns at most one session. With `auto_reconnect` enabled, operations that
/// lose the session reconnect (with backoff, across all configured hosts)
/// and are sent again.
pub struct DirectoryClient {
    config: DirectoryConfig,
    factory: Box<dyn TransportFactory>,
    session: Option<Session>,
    hosts: HostRotation,
    backoff: Backoff,
    credentials: Credentials,
    options: Vec<ConnectionOption>,
    root_dse: RootDseCache,
    schema: SchemaCache,
    text_attributes: HashMap<String, bool>,
    reconnects: u64,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("hosts", &self.hosts)
            .field("session", &self.session)
            .field("backoff", &self.backoff)
            .field("reconnects", &self.reconnects)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    /// Connects with the `ldap3` transport.
    ///
    /// # Errors
    ///
    /// Returns the error of the last host tried when no host accepts the
    /// connection, or [`Error::ConfigError`] for unusable TLS settings.
    pub async fn connect(config: DirectoryConfig) -> Result<Self> {
        let factory = Ldap3Factory::new(&config)?;
        Self::with_factory(config, Box::new(factory)).await
    }

    /// Connects through a custom transport factory.
    ///
    /// # Errors
    ///
    /// Same as [`DirectoryClient::connect`].
    pub async fn with_factory(
        config: DirectoryConfig,
        factory: Box<dyn TransportFactory>,
    ) -> Result<Self> {
        let mut client = Self {
            hosts: HostRotation::new(config.hosts().to_vec()),
            backoff: config.backoff(),
            credentials: config.credentials().clone(),
            options: config.options().to_vec(),
            config,
            factory,
            session: None,
            root_dse: RootDseCache::default(),
            schema: SchemaCache::default(),
            text_attributes: HashMap::new(),
            reconnects: 0,
        };
        client.session = Some(client.establish().await?);
        Ok(client)
    }

    /// Configuration the client was created with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Returns true while a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Host entry of the open session.
    #[must_use]
    pub fn current_host(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.host.as_str())
    }

    /// Hosts currently believed down, in configured order.
    #[must_use]
    pub fn down_hosts(&self) -> Vec<String> {
        self.hosts.down_hosts()
    }

    /// Delay the next reconnect attempt waits before connecting.
    #[must_use]
    pub const fn current_backoff(&self) -> Duration {
        self.backoff.current()
    }

    /// Number of successful reconnects since the client was created.
    #[must_use]
    pub const fn reconnect_count(&self) -> u64 {
        self.reconnects
    }

    /// Protocol version in use.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.config.version()
    }

    async fn establish(&mut self) -> Result<Session> {
        let connector = Connector {
            config: &self.config,
            factory: self.factory.as_ref(),
            credentials: self.config.credentials(),
            options: &self.options,
        };
        connector.connect(&mut self.hosts, &mut self.root_dse).await
    }

    /// Re-establishes a lost session.
    ///
    /// Waits for the current backoff delay, clears the down set, connects and
    /// binds again with the credentials last passed to
    /// [`DirectoryClient::bind`]. Each failure doubles the delay up to the
    /// configured maximum; success resets it. A single attempt is made.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when auto-reconnect is disabled, or the
    /// connection or bind error of the attempt.
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        if !self.config.auto_reconnect() {
            return Err(Error::NotConnected);
        }

        let delay = self.backoff.current();
        debug!(?delay, "waiting before reconnect");
        sleep(delay).await;
        self.hosts.reset_down_set();

        let mut session = match self.establish().await {
            Ok(session) => session,
            Err(err) => {
                let next = self.backoff.next_delay();
                warn!(error = %err, next_delay = ?next, "reconnect failed");
                return Err(err);
            }
        };

        if let Err(err) = session
            .transport
            .simple_bind(self.credentials.dn(), self.credentials.password())
            .await
        {
            let next = self.backoff.next_delay();
            self.hosts.mark_down(&session.host);
            warn!(host = %session.host, error = %err, next_delay = ?next, "re-bind after reconnect failed");
            return Err(err);
        }

        self.backoff.reset_delay();
        self.reconnects += 1;
        info!(host = %session.host, reconnects = self.reconnects, "reconnected");
        self.session = Some(session);
        Ok(())
    }

    async fn session(&mut self) -> Result<&mut Session> {
        if self.session.is_none() {
            self.reconnect().await?;
        }
        self.session.as_mut().ok_or(Error::NotConnected)
    }

    /// Sends a request, reconnecting and resending while the session keeps
    /// dropping underneath it.
    async fn execute(&mut self, request: Request<'_>) -> Result<Response> {
        let deadline = self.config.retry_timeout().map(|limit| Instant::now() + limit);
        let mut last_error: Option<Error> = None;

        loop {
            if self.session.is_none() {
                if !self.config.auto_reconnect() {
                    return Err(last_error.unwrap_or(Error::NotConnected));
                }
                if let Some(deadline) = deadline {
                    if Instant::now() + self.backoff.current() > deadline {
                        let cause = last_error
                            .map_or_else(|| "no session".to_string(), |err| err.to_string());
                        return Err(Error::Timeout(format!(
                            "{} {} gave up reconnecting: {cause}",
                            request.name(),
                            request.target()
                        )));
                    }
                }
                if let Err(err) = self.reconnect().await {
                    if !is_transient(&err) {
                        return Err(report(err));
                    }
                    last_error = Some(err);
                    continue;
                }
            }

            let Some(session) = self.session.as_mut() else {
                continue;
            };
            match request.send(session.transport.as_mut()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && self.config.auto_reconnect() => {
                    warn!(
                        operation = request.name(),
                        target = request.target(),
                        host = %session.host,
                        error = %err,
                        "session lost, reconnecting"
                    );
                    self.session = None;
                    last_error = Some(err);
                }
                Err(err) => return Err(report(err)),
            }
        }
    }

    async fn run_search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        match self.execute(Request::Search(request)).await? {
            Response::Search(response) => Ok(response),
            Response::Done => Ok(SearchResponse::default()),
        }
    }

    /// Binds with new credentials. Later reconnects bind with them too.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] when the server rejects the credentials; the
    /// bind is never retried.
    pub async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let session = self.session().await?;
        session.transport.simple_bind(dn, password).await?;
        debug!(host = %session.host, anonymous = dn.is_empty(), "bound");
        self.credentials = Credentials::new(dn, password);
        Ok(())
    }

    /// Unbinds and closes the session.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the unbind; the session is closed
    /// regardless.
    pub async fn unbind(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.transport.unbind().await,
            None => Ok(()),
        }
    }

    /// Closes the session, logging instead of returning unbind errors.
    pub async fn disconnect(&mut self) {
        if let Err(err) = self.unbind().await {
            warn!(error = %err, "unbind failed while disconnecting");
        }
    }

    /// StartTLS is negotiated while connecting. Calling this while
    /// disconnected enables it for the next connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] while a session is open.
    pub fn start_tls(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::InvalidRequest(
                "StartTLS must be negotiated before binding; enable `starttls` in the configuration"
                    .to_string(),
            ));
        }
        self.config = self.config.clone().with_starttls(true);
        Ok(())
    }

    /// Sets a connection option on the open session and for every later
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the session rejects the option.
    pub async fn set_option(&mut self, option: ConnectionOption) -> Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.transport.set_option(option).await?;
        }
        match self.options.iter_mut().find(|current| current.kind() == option.kind()) {
            Some(current) => *current = option,
            None => self.options.push(option),
        }
        Ok(())
    }

    /// Current value of a connection option, if set.
    #[must_use]
    pub fn get_option(&self, kind: OptionKind) -> Option<ConnectionOption> {
        self.options.iter().copied().find(|option| option.kind() == kind)
    }

    /// Reads the RootDSE. Each distinct attribute set is read once per
    /// client; an empty set reads the standard operational attributes.
    ///
    /// # Errors
    ///
    /// Propagates search errors.
    pub async fn root_dse(&mut self, attributes: &[String]) -> Result<Arc<RootDse>> {
        let attributes = root_dse_attributes(attributes);
        let key = root_dse_key(&attributes);
        if let Some(hit) = self.root_dse.get(&key) {
            return Ok(hit);
        }
        let response = self
            .run_search(&SearchRequest::base_object("", attributes))
            .await?;
        Ok(self.root_dse.insert(key, root_dse_from_entries(response.entries)))
    }

    /// Registers persistent schema storage consulted before a live fetch.
    pub fn set_schema_store(&mut self, store: Box<dyn SchemaStore>) {
        self.schema.set_store(store);
    }

    /// Returns the server schema, fetching it once per client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheError`] when called while a fetch is in flight,
    /// [`Error::NotFound`] when the subschema entry is missing, or the search
    /// error.
    pub async fn schema(&mut self) -> Result<Arc<Schema>> {
        let guard = match self.schema.begin()? {
            SchemaLookup::Cached(schema) => return Ok(schema),
            SchemaLookup::Fetch(guard) => guard,
        };

        if let Some(store) = self.schema.store() {
            match store.load().await {
                Ok(Some(schema)) => {
                    debug!("schema loaded from store");
                    return Ok(guard.complete(schema));
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "schema store unreadable, fetching live"),
            }
        }

        let dse = self.root_dse(&["subschemaSubentry".to_string()]).await?;
        let dn = dse.subschema_subentry().unwrap_or(DEFAULT_SUBSCHEMA_DN).to_string();
        let attributes = SUBSCHEMA_ATTRIBUTES.iter().map(ToString::to_string).collect();
        let response = self
            .run_search(&SearchRequest::base_object(dn.as_str(), attributes))
            .await?;
        let entry = response
            .entries
            .first()
            .ok_or_else(|| Error::NotFound(format!("subschema entry `{dn}`")))?;
        let schema = Schema::from_entry(entry);
        debug!(
            %dn,
            attribute_types = schema.attribute_type_count(),
            object_classes = schema.object_class_count(),
            "schema fetched"
        );

        if let Some(store) = self.schema.store() {
            if let Err(err) = store.store(&schema).await {
                warn!(error = %err, "failed to persist schema");
            }
        }
        Ok(guard.complete(schema))
    }

    /// Returns true when values of the attribute are Directory Strings.
    ///
    /// # Errors
    ///
    /// Propagates schema errors.
    pub async fn is_text_attribute(&mut self, attribute: &str) -> Result<bool> {
        let key = attribute.to_ascii_lowercase();
        if let Some(decision) = self.text_attributes.get(&key) {
            return Ok(*decision);
        }
        let decision = self.schema().await?.is_utf8(attribute);
        self.text_attributes.insert(key, decision);
        Ok(decision)
    }

    /// Searches the directory.
    ///
    /// `base` and `filter` default to the configured base DN and filter. A
    /// missing base or an exhausted size limit yields a (possibly partial)
    /// result, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterSyntax`] for malformed filters and other search
    /// failures as classified errors.
    pub async fn search(
        &mut self,
        base: Option<&str>,
        filter: Option<&str>,
        params: SearchParams,
    ) -> Result<SearchResult> {
        let filter = normalize_filter(filter.unwrap_or(self.config.filter()))?;
        let request = SearchRequest {
            base: base.unwrap_or(self.config.base_dn()).to_string(),
            scope: params.scope.unwrap_or(self.config.scope()),
            filter,
            attributes: params.attributes.clone(),
            size_limit: params.size_limit,
            time_limit: params.time_limit,
            types_only: params.types_only,
        };
        let response = self.run_search(&request).await?;
        debug!(base = %request.base, filter = %request.filter, count = response.entries.len(), "search complete");
        Ok(SearchResult::new(
            response.entries,
            params.attributes,
            response.code == result_code::SIZE_LIMIT_EXCEEDED,
        ))
    }

    /// Adds an entry.
    ///
    /// # Errors
    ///
    /// Returns the classified server error.
    pub async fn add(&mut self, entry: &Entry) -> Result<()> {
        self.execute(Request::Add(entry)).await.map(|_| ())
    }

    /// Deletes an entry, or its whole subtree when `recursive` is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HasChildren`] when a non-recursive delete targets an
    /// entry with subordinates, [`Error::SubtreeDeleteFailed`] when some
    /// entries of a subtree could not be deleted.
    pub async fn delete(&mut self, dn: &str, recursive: bool) -> Result<()> {
        if recursive {
            self.delete_subtree(dn).await
        } else {
            self.execute(Request::Delete(dn)).await.map(|_| ())
        }
    }

    /// Collects the subtree first, then deletes deepest first. Ancestors of
    /// entries that failed are left in place.
    async fn delete_subtree(&mut self, dn: &str) -> Result<()> {
        let base = DistinguishedName::parse(dn)?;
        let request = SearchRequest {
            scope: SearchScope::Subtree,
            ..SearchRequest::base_object(dn, vec!["1.1".to_string()])
        };
        let response = self.run_search(&request).await?;
        match response.code {
            result_code::NO_SUCH_OBJECT => return Err(Error::NotFound(dn.to_string())),
            result_code::SIZE_LIMIT_EXCEEDED => {
                return Err(Error::from_result_code(
                    result_code::SIZE_LIMIT_EXCEEDED,
                    format!(
                        "subtree below {dn} exceeds the size limit after {} entries; nothing deleted",
                        response.entries.len()
                    ),
                ));
            }
            _ => {}
        }

        // Parsed names order and relate entries; deletes carry the DN the
        // server returned.
        let mut subtree = Vec::with_capacity(response.entries.len());
        for entry in response.entries {
            let name = DistinguishedName::parse(entry.dn())?;
            if name.depth().saturating_sub(base.depth()) > MAX_SUBTREE_DEPTH {
                return Err(Error::InvalidRequest(format!(
                    "subtree below {dn} is deeper than {MAX_SUBTREE_DEPTH} levels"
                )));
            }
            subtree.push((name, entry.dn().to_string()));
        }
        subtree.sort_by_key(|(name, _)| std::cmp::Reverse(name.depth()));

        let mut failed: Vec<DistinguishedName> = Vec::new();
        let mut failures = Vec::new();
        for (name, target) in subtree {
            if failed.iter().any(|failure| failure.is_descendant_of(&name)) {
                debug!(dn = %target, "keeping ancestor of failed delete");
                continue;
            }
            if let Err(err) = self.execute(Request::Delete(&target)).await {
                warn!(dn = %target, error = %err, "subtree delete failed");
                failures.push((target, err));
                failed.push(name);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(report(Error::SubtreeDeleteFailed {
                dn: dn.to_string(),
                failures,
            }))
        }
    }

    /// Modifies an entry.
    ///
    /// # Errors
    ///
    /// Returns the classified server error.
    pub async fn modify(&mut self, dn: &str, changes: &[DirectoryModification]) -> Result<()> {
        self.execute(Request::Modify(dn, changes)).await.map(|_| ())
    }

    /// Writes the changes recorded on the entry and clears them.
    ///
    /// # Errors
    ///
    /// Returns the classified server error; the changes stay pending.
    pub async fn update(&mut self, entry: &mut Entry) -> Result<()> {
        if !entry.has_changes() {
            return Ok(());
        }
        self.execute(Request::Modify(entry.dn(), entry.pending_changes()))
            .await?;
        entry.mark_applied();
        Ok(())
    }

    /// Returns true when the entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed DNs or failed searches.
    pub async fn exists(&mut self, dn: &str) -> Result<bool> {
        let name = DistinguishedName::parse(dn)?;
        let request = match name.parent() {
            Some(parent) => SearchRequest {
                scope: SearchScope::OneLevel,
                filter: name.rdn_filter(),
                ..SearchRequest::base_object(parent.as_str(), vec!["1.1".to_string()])
            },
            None => SearchRequest::base_object(name.as_str(), vec!["1.1".to_string()]),
        };
        let response = self.run_search(&request).await?;
        Ok(!response.entries.is_empty())
    }

    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the entry does not exist.
    pub async fn get_entry(&mut self, dn: &str, attributes: &[String]) -> Result<Entry> {
        let response = self
            .run_search(&SearchRequest::base_object(dn, attributes.to_vec()))
            .await?;
        response
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(dn.to_string()))
    }

    /// Moves an entry to `new_dn`.
    ///
    /// Without `target` the entry is renamed on this directory. With a target
    /// it is copied there and deleted here; when the delete fails the copy is
    /// removed again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MoveRolledBack`] or [`Error::MoveCompensationFailed`]
    /// when a cross-directory move fails after staging the copy.
    pub async fn move_entry(
        &mut self,
        dn: &str,
        new_dn: &str,
        target: Option<&mut DirectoryClient>,
    ) -> Result<()> {
        let Some(target) = target else {
            return self.rename(dn, new_dn).await;
        };

        let entry = self.get_entry(dn, &[]).await?;
        let staged = staged_copy(&entry, new_dn)?;
        target.add(&staged).await?;

        let Err(cause) = self.delete(dn, false).await else {
            info!(from = %dn, to = %new_dn, "entry moved across directories");
            return Ok(());
        };
        warn!(dn = %dn, error = %cause, "source delete failed, removing staged copy");
        match target.delete(new_dn, false).await {
            Ok(()) => Err(report(Error::MoveRolledBack {
                cause: Box::new(cause),
            })),
            Err(compensation) => Err(report(Error::MoveCompensationFailed {
                cause: Box::new(cause),
                compensation: Box::new(compensation),
            })),
        }
    }

    async fn rename(&mut self, dn: &str, new_dn: &str) -> Result<()> {
        let old = DistinguishedName::parse(dn)?;
        let new = DistinguishedName::parse(new_dn)?;
        let new_parent = new.parent();
        let new_superior = match (&new_parent, old.parent()) {
            (Some(to), Some(from)) if to.same_entry(&from) => None,
            (Some(to), _) => Some(to.as_str().to_string()),
            (None, _) => None,
        };
        let request = RenameRequest {
            dn: dn.trim().to_string(),
            new_rdn: new.rdn_string(),
            new_superior,
            delete_old_rdn: true,
        };
        self.execute(Request::Rename(&request)).await.map(|_| ())
    }

    /// Copies an entry to `new_dn`, on `target` or on this directory.
    ///
    /// # Errors
    ///
    /// Returns the classified add error.
    pub async fn copy_entry(
        &mut self,
        entry: &Entry,
        new_dn: &str,
        target: Option<&mut DirectoryClient>,
    ) -> Result<Entry> {
        let copy = staged_copy(entry, new_dn)?;
        match target {
            Some(target) => target.add(&copy).await?,
            None => self.add(&copy).await?,
        }
        Ok(copy)
    }
}

/// Entry under a new DN, carrying the values of its new RDN.
fn staged_copy(entry: &Entry, new_dn: &str) -> Result<Entry> {
    let name = DistinguishedName::parse(new_dn)?;
    let mut copy = entry.clone();
    copy.set_dn(new_dn.trim());
    for rdn in name.rdn() {
        let present = copy
            .values(rdn.attribute())
            .is_some_and(|values| values.iter().any(|value| value == rdn.value()));
        if !present {
            copy.add(rdn.attribute(), [rdn.value()]);
        }
    }
    copy.mark_applied();
    Ok(copy)
}

/// Logs an error about to be surfaced, at `warn` when it needs attention.
fn report(err: Error) -> Error {
    if err.should_log() {
        warn!(code = err.error_code(), error = %err, "directory operation failed");
    } else {
        debug!(code = err.error_code(), error = %err, "directory operation failed");
    }
    err
}

/// Reconnect failures worth another attempt inside the retry loop.
fn is_transient(err: &Error) -> bool {
    err.is_retryable() || matches!(err, Error::Connection { .. } | Error::Timeout(_))
}
