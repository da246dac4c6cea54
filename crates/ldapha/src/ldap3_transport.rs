//! `ldap3`-backed transport.

use crate::entry::{DirectoryModification, Entry};
use crate::transport::{LdapTransport, RenameRequest, SearchRequest, SearchResponse, TransportFactory};
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry, SearchOptions};
use ldapha_core::error::result_code;
use ldapha_core::{ConnectionOption, DerefAliases, DirectoryConfig, Error, Result, SearchScope};
use native_tls::{Certificate, TlsConnector};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
struct TlsSettings {
    verify: bool,
    ca_pem: Option<Vec<u8>>,
    connection_timeout: Duration,
}

/// Opens `ldap3` connections with the TLS and timeout settings of a
/// configuration.
#[derive(Debug, Clone)]
pub struct Ldap3Factory {
    tls: TlsSettings,
    operation_timeout: Duration,
}

impl Ldap3Factory {
    /// Creates a factory for the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the CA certificate cannot be read.
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let ca_pem = config
            .tls_ca_cert()
            .map(|path| {
                fs::read(path).map_err(|err| {
                    Error::ConfigError(format!(
                        "failed to read CA certificate {}: {err}",
                        path.display()
                    ))
                })
            })
            .transpose()?;

        Ok(Self {
            tls: TlsSettings {
                verify: config.tls_verify(),
                ca_pem,
                connection_timeout: config.connection_timeout(),
            },
            operation_timeout: config.operation_timeout(),
        })
    }
}

#[async_trait]
impl TransportFactory for Ldap3Factory {
    async fn open(&self, host: &str, port: u16) -> Result<Box<dyn LdapTransport>> {
        let url = ldap_url(host, port);
        let ldap = open_connection(&self.tls, &url, false)
            .await
            .map_err(|err| Error::Connection {
                host: format!("{host}:{port}"),
                message: err.to_string(),
            })?;
        Ok(Box::new(Ldap3Transport {
            ldap,
            url,
            tls: self.tls.clone(),
            operation_timeout: self.operation_timeout,
            deref: DerefAliases::default(),
            size_limit: 0,
            time_limit: 0,
        }))
    }
}

fn ldap_url(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("ldap://[{host}]:{port}")
    } else {
        format!("ldap://{host}:{port}")
    }
}

async fn open_connection(tls: &TlsSettings, url: &str, starttls: bool) -> Result<ldap3::Ldap> {
    let settings = build_ldap_settings(tls)?.set_starttls(starttls);
    let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
        .await
        .map_err(map_ldap_error)?;
    ldap3::drive!(conn);
    Ok(ldap)
}

fn build_ldap_settings(tls: &TlsSettings) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(tls.connection_timeout);

    if !tls.verify {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(pem) = &tls.ca_pem {
        let certificate = Certificate::from_pem(pem)
            .map_err(|err| Error::ConfigError(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::ConfigError(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

/// One `ldap3` connection. Search defaults set through connection options
/// apply to every search that does not override them.
struct Ldap3Transport {
    ldap: ldap3::Ldap,
    url: String,
    tls: TlsSettings,
    operation_timeout: Duration,
    deref: DerefAliases,
    size_limit: i32,
    time_limit: i32,
}

#[async_trait]
impl LdapTransport for Ldap3Transport {
    async fn start_tls(&mut self) -> Result<()> {
        // ldap3 negotiates StartTLS only while opening a connection.
        if let Err(err) = self.ldap.unbind().await {
            debug!(url = %self.url, error = %err, "unbind before StartTLS reopen failed");
        }
        self.ldap = open_connection(&self.tls, &self.url, true)
            .await
            .map_err(|err| Error::TlsUnsupported(err.to_string()))?;
        Ok(())
    }

    async fn set_protocol_version(&mut self, version: u32) -> Result<()> {
        if version == 3 {
            Ok(())
        } else {
            Err(Error::ProtocolVersion {
                version,
                message: "ldap3 speaks LDAPv3 only".to_string(),
            })
        }
    }

    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let result = timeout(self.operation_timeout, self.ldap.simple_bind(dn, password))
            .await
            .map_err(|_| Error::Timeout("LDAP bind timed out".to_string()))?
            .map_err(map_ldap_error)?;
        if result.rc == result_code::SUCCESS {
            Ok(())
        } else {
            Err(Error::Bind {
                code: result.rc,
                message: result.text,
            })
        }
    }

    async fn set_option(&mut self, option: ConnectionOption) -> Result<()> {
        match option {
            ConnectionOption::Deref(deref) => self.deref = deref,
            ConnectionOption::SizeLimit(limit) => self.size_limit = limit,
            ConnectionOption::TimeLimit(limit) => self.time_limit = limit,
            ConnectionOption::Timeout(duration) => self.operation_timeout = duration,
            ConnectionOption::Referrals(false) => {}
            ConnectionOption::Referrals(true) => {
                return Err(Error::ConfigError(
                    "referral chasing is not supported".to_string(),
                ))
            }
        }
        debug!(option = ?option, "connection option applied");
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        let options = SearchOptions::new()
            .deref(to_ldap3_deref(self.deref))
            .sizelimit(pick_limit(request.size_limit, self.size_limit))
            .timelimit(pick_limit(request.time_limit, self.time_limit))
            .typesonly(request.types_only);

        let fut = self.ldap.with_search_options(options).search(
            &request.base,
            to_ldap3_scope(request.scope),
            &request.filter,
            request.attributes.clone(),
        );
        let ldap3::SearchResult(entries, result) = timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| Error::Timeout("LDAP search timed out".to_string()))?
            .map_err(map_ldap_error)?;

        Ok(SearchResponse {
            entries: entries
                .into_iter()
                .map(|entry| entry_from_search(SearchEntry::construct(entry)))
                .collect(),
            code: result.rc,
            message: result.text,
        })
    }

    async fn add(&mut self, entry: &Entry) -> Result<()> {
        let fut = self.ldap.add(entry.dn(), add_attributes(entry));
        ensure_success(finish(self.operation_timeout, "add", fut).await?)
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let fut = self.ldap.delete(dn);
        ensure_success(finish(self.operation_timeout, "delete", fut).await?)
    }

    async fn modify(&mut self, dn: &str, changes: &[DirectoryModification]) -> Result<()> {
        let mods = changes
            .iter()
            .map(|change| match change {
                DirectoryModification::Add { attribute, values } => Mod::Add(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
                DirectoryModification::Delete { attribute, values } => Mod::Delete(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
                DirectoryModification::Replace { attribute, values } => Mod::Replace(
                    attribute.clone(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                ),
            })
            .collect::<Vec<_>>();
        let fut = self.ldap.modify(dn, mods);
        ensure_success(finish(self.operation_timeout, "modify", fut).await?)
    }

    async fn rename(&mut self, request: &RenameRequest) -> Result<()> {
        let fut = self.ldap.modifydn(
            &request.dn,
            &request.new_rdn,
            request.delete_old_rdn,
            request.new_superior.as_deref(),
        );
        ensure_success(finish(self.operation_timeout, "rename", fut).await?)
    }

    async fn unbind(&mut self) -> Result<()> {
        timeout(self.operation_timeout, self.ldap.unbind())
            .await
            .map_err(|_| Error::Timeout("LDAP unbind timed out".to_string()))?
            .map_err(map_ldap_error)
    }
}

/// `ldap3` files attributes with any non-UTF-8 value under `bin_attrs`.
fn entry_from_search(entry: SearchEntry) -> Entry {
    entry.bin_attrs.into_iter().fold(
        Entry::from_attributes(entry.dn, entry.attrs),
        |built, (name, values)| built.with_binary_attribute(name, values),
    )
}

/// Text and binary values of an entry as the byte pairs `Ldap::add` takes.
fn add_attributes(entry: &Entry) -> Vec<(Vec<u8>, HashSet<Vec<u8>>)> {
    let mut attributes: HashMap<String, HashSet<Vec<u8>>> = HashMap::new();
    for (name, values) in entry.attributes() {
        attributes
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(values.iter().map(|value| value.as_bytes().to_vec()));
    }
    for (name, values) in entry.binary_attributes() {
        attributes
            .entry(name.to_ascii_lowercase())
            .or_default()
            .extend(values.iter().cloned());
    }
    attributes
        .into_iter()
        .map(|(name, values)| (name.into_bytes(), values))
        .collect()
}

async fn finish<F>(limit: Duration, operation: &str, fut: F) -> Result<ldap3::LdapResult>
where
    F: std::future::Future<Output = ldap3::result::Result<ldap3::LdapResult>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("LDAP {operation} timed out")))?
        .map_err(map_ldap_error)
}

const fn pick_limit(requested: i32, default: i32) -> i32 {
    if requested > 0 {
        requested
    } else {
        default
    }
}

fn ensure_success(result: ldap3::LdapResult) -> Result<()> {
    if result.rc == result_code::SUCCESS {
        Ok(())
    } else {
        Err(Error::from_result_code(result.rc, result.text))
    }
}

const fn to_ldap3_scope(scope: SearchScope) -> Scope {
    match scope {
        SearchScope::Base => Scope::Base,
        SearchScope::OneLevel => Scope::OneLevel,
        SearchScope::Subtree => Scope::Subtree,
    }
}

const fn to_ldap3_deref(deref: DerefAliases) -> ldap3::DerefAliases {
    match deref {
        DerefAliases::Never => ldap3::DerefAliases::Never,
        DerefAliases::Searching => ldap3::DerefAliases::Searching,
        DerefAliases::Finding => ldap3::DerefAliases::Finding,
        DerefAliases::Always => ldap3::DerefAliases::Always,
    }
}

/// Classifies `ldap3` failures. Anything that means the connection is gone
/// becomes a retryable operations error.
fn map_ldap_error(err: LdapError) -> Error {
    match &err {
        LdapError::LdapResult { result } => Error::from_result_code(result.rc, result.text.clone()),
        LdapError::FilterParsing => Error::FilterSyntax(err.to_string()),
        LdapError::Timeout { .. } => Error::Timeout(err.to_string()),
        LdapError::Io { .. }
        | LdapError::EndOfStream
        | LdapError::OpSend { .. }
        | LdapError::ResultRecv { .. } => Error::Operations {
            code: result_code::SERVER_DOWN,
            message: err.to_string(),
        },
        _ => Error::Directory {
            code: result_code::OTHER,
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_bracket_ipv6_literals() {
        assert_eq!(ldap_url("ldap1", 389), "ldap://ldap1:389");
        assert_eq!(ldap_url("::1", 1389), "ldap://[::1]:1389");
    }

    #[test]
    fn request_limits_override_connection_defaults() {
        assert_eq!(pick_limit(0, 100), 100);
        assert_eq!(pick_limit(5, 100), 5);
    }

    #[test]
    fn lost_connections_are_retryable() {
        let err = map_ldap_error(LdapError::EndOfStream);
        assert!(err.is_retryable());
        assert_eq!(err.result_code(), Some(result_code::SERVER_DOWN));

        let err = map_ldap_error(LdapError::FilterParsing);
        assert!(matches!(err, Error::FilterSyntax(_)));
    }

    #[test]
    fn result_codes_are_classified() {
        let ok = ldap3::LdapResult {
            rc: 0,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        };
        assert!(ensure_success(ok.clone()).is_ok());

        let non_leaf = ldap3::LdapResult { rc: 66, ..ok };
        assert!(matches!(ensure_success(non_leaf), Err(Error::HasChildren(_))));
    }

    #[test]
    fn binary_values_survive_search_and_add() {
        let photo = vec![0xff, 0xd8, 0xff, 0xe0];
        let entry = entry_from_search(SearchEntry {
            dn: "cn=a,dc=test".to_string(),
            attrs: HashMap::from([("cn".to_string(), vec!["a".to_string()])]),
            bin_attrs: HashMap::from([("jpegPhoto".to_string(), vec![photo.clone()])]),
        });
        assert_eq!(entry.first("cn"), Some("a"));
        assert_eq!(entry.binary_values("jpegPhoto").unwrap(), [photo.clone()]);

        let attributes: HashMap<_, _> = add_attributes(&entry).into_iter().collect();
        assert_eq!(attributes.len(), 2);
        assert!(attributes[b"jpegphoto".as_slice()].contains(&photo));
        assert!(attributes[b"cn".as_slice()].contains(b"a".as_slice()));
    }

    #[test]
    fn missing_ca_certificate_is_a_config_error() {
        let config = DirectoryConfig::new(["ldap1"])
            .unwrap()
            .with_tls_ca_cert("/nonexistent/ldapha-ca.pem".into());
        assert!(matches!(Ldap3Factory::new(&config), Err(Error::ConfigError(_))));
    }
}
