//! Session establishment across the configured hosts.
//!
//! The connector walks the hosts that are not marked down, in configured
//! order, and returns the first fully established session: transport open,
//! optional StartTLS upgrade, protocol version agreed, bound and configured.

use crate::cache::{RootDseCache, STARTTLS_OID};
use crate::hosts::{split_host_port, HostRotation};
use crate::transport::{LdapTransport, TransportFactory};
use ldapha_core::{ConnectionOption, Credentials, DirectoryConfig, Error, Result};
use tracing::{debug, info, warn};

/// An established, bound connection.
pub(crate) struct Session {
    pub(crate) transport: Box<dyn LdapTransport>,
    pub(crate) host: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("host", &self.host).finish_non_exhaustive()
    }
}

/// Everything a connection attempt needs besides the mutable tables.
pub(crate) struct Connector<'a> {
    pub(crate) config: &'a DirectoryConfig,
    pub(crate) factory: &'a dyn TransportFactory,
    pub(crate) credentials: &'a Credentials,
    pub(crate) options: &'a [ConnectionOption],
}

impl Connector<'_> {
    /// Tries each host that is not down. Hosts that fail are marked down.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] without hosts, otherwise the error of
    /// the last host tried, or a generic [`Error::Connection`] when no host
    /// was eligible.
    pub(crate) async fn connect(
        &self,
        hosts: &mut HostRotation,
        root_dse: &mut RootDseCache,
    ) -> Result<Session> {
        if hosts.is_empty() {
            return Err(Error::ConfigError("no servers configured".to_string()));
        }

        let mut last_error = None;
        for host in hosts.candidates() {
            debug!(%host, "connecting to directory server");
            match self.establish(&host, root_dse).await {
                Ok(transport) => {
                    info!(%host, "directory session established");
                    return Ok(Session { transport, host });
                }
                Err(err) => {
                    warn!(%host, error = %err, "directory server unavailable, marking down");
                    hosts.mark_down(&host);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Connection {
            host: hosts.hosts().join(","),
            message: "no reachable directory server".to_string(),
        }))
    }

    async fn establish(
        &self,
        host: &str,
        root_dse: &mut RootDseCache,
    ) -> Result<Box<dyn LdapTransport>> {
        let (name, port) = split_host_port(host, self.config.port());
        let mut transport = self.factory.open(&name, port).await?;

        if self.config.starttls() {
            // The RootDSE cache belongs to the client, not the host: once one
            // host has been read, every later host is judged by that record.
            let dse = root_dse
                .fetch(transport.as_mut(), &["supportedExtension".to_string()])
                .await?;
            let advertised = dse.supports_extension(STARTTLS_OID);
            debug!(%host, advertised, "StartTLS support checked against cached RootDSE");
            if !advertised {
                return Err(Error::TlsUnsupported(format!(
                    "{host} does not advertise StartTLS"
                )));
            }
            transport.start_tls().await.map_err(|err| match err {
                Error::TlsUnsupported(_) => err,
                other => Error::TlsUnsupported(other.to_string()),
            })?;
            debug!(%host, "StartTLS negotiated");
        }

        let version = self.config.version();
        let version_forced = match transport.set_protocol_version(version).await {
            Ok(()) => true,
            Err(err) => {
                debug!(%host, version, error = %err, "protocol version not forced, verifying after bind");
                false
            }
        };

        let dn = self.credentials.dn();
        transport
            .simple_bind(dn, self.credentials.password())
            .await
            .map_err(|err| match err {
                Error::Bind { code, message } if !version_forced => Error::Bind {
                    code,
                    message: format!("{message} (server may not support LDAP version {version})"),
                },
                other => other,
            })?;
        debug!(%host, anonymous = dn.is_empty(), "bound");

        if !version_forced {
            let dse = root_dse
                .fetch(transport.as_mut(), &["supportedLDAPVersion".to_string()])
                .await?;
            if !dse.supports_version(version) {
                return Err(Error::ProtocolVersion {
                    version,
                    message: format!("{host} does not list it in supportedLDAPVersion"),
                });
            }
        }

        for option in self.options {
            transport.set_option(*option).await?;
        }

        Ok(transport)
    }
}
