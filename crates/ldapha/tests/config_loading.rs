//! Integration tests for loading client configuration documents and wiring
//! them into a client through the public transport traits.

use async_trait::async_trait;
use ldapha::{
    ConnectionOption, DerefAliases, DirectoryClient, DirectoryConfig, Entry, Error, LdapTransport,
    OptionKind, RenameRequest, SearchRequest, SearchResponse, SearchScope, TransportFactory,
};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Get the path to the test fixtures directory.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn load_fixture(name: &str) -> DirectoryConfig {
    let path = fixtures_dir().join(name);
    let document = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture at {}: {}", path.display(), e));
    DirectoryConfig::from_json(&document)
        .unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e))
}

#[test]
fn test_load_replicated_config() {
    let config = load_fixture("replicated.json");

    assert_eq!(
        config.hosts(),
        [
            "ldap1.example.com",
            "ldap2.example.com:1389",
            "[2001:db8::10]:636"
        ]
    );
    assert!(config.starttls());
    assert_eq!(
        config.credentials().dn(),
        "cn=reader,ou=services,dc=example,dc=com"
    );
    assert_eq!(config.credentials().password(), "s3cret");
    assert_eq!(config.scope(), SearchScope::OneLevel);
    assert_eq!(config.filter(), "(objectClass=inetOrgPerson)");
    assert!(config.auto_reconnect());

    let backoff = config.backoff();
    assert_eq!(backoff.min(), Duration::from_secs(2));
    assert_eq!(backoff.max(), Duration::from_secs(60));
    assert_eq!(config.operation_timeout(), Duration::from_secs(20));
    assert_eq!(config.retry_timeout(), Some(Duration::from_secs(300)));

    // Applied in the order the document lists them.
    assert_eq!(
        config.options(),
        [
            ConnectionOption::TimeLimit(30),
            ConnectionOption::Deref(DerefAliases::Always),
            ConnectionOption::SizeLimit(500),
            ConnectionOption::Referrals(false),
        ]
    );
}

#[test]
fn test_load_legacy_aliases() {
    let config = load_fixture("legacy.json");

    assert_eq!(config.hosts(), ["directory.example.com"]);
    assert!(!config.starttls());
    assert_eq!(config.credentials().dn(), "cn=admin,dc=example,dc=com");
    assert_eq!(config.base_dn(), "dc=example,dc=com");
    assert_eq!(config.port(), 389);
    assert_eq!(config.version(), 3);
    assert_eq!(config.scope(), SearchScope::Subtree);
    assert!(!config.auto_reconnect());
    assert!(config.retry_timeout().is_none());
}

#[test]
fn test_reject_bad_documents() {
    let cases = [
        r#"{"host": []}"#,
        r#"{"host": "ldaps://ldap1"}"#,
        r#"{"options": {"LDAP_OPT_X_TLS_NEWCTX": 0}}"#,
        r#"{"min_backoff": 10, "max_backoff": 5}"#,
        r#"{"version": 4}"#,
        r#"{"bogus": true}"#,
    ];
    for document in cases {
        assert!(
            matches!(DirectoryConfig::from_json(document), Err(Error::ConfigError(_))),
            "accepted {document}"
        );
    }
}

/// A transport that records what the client sends to it.
#[derive(Clone, Default)]
struct Recorder {
    opened: Arc<Mutex<Vec<(String, u16)>>>,
    options: Arc<Mutex<Vec<ConnectionOption>>>,
}

#[async_trait]
impl TransportFactory for Recorder {
    async fn open(&self, host: &str, port: u16) -> ldapha::Result<Box<dyn LdapTransport>> {
        self.opened.lock().unwrap().push((host.to_string(), port));
        if host == "ldap1.example.com" {
            return Err(Error::Connection {
                host: host.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl LdapTransport for Recorder {
    async fn start_tls(&mut self) -> ldapha::Result<()> {
        Ok(())
    }

    async fn set_protocol_version(&mut self, _version: u32) -> ldapha::Result<()> {
        Ok(())
    }

    async fn simple_bind(&mut self, _dn: &str, _password: &str) -> ldapha::Result<()> {
        Ok(())
    }

    async fn set_option(&mut self, option: ConnectionOption) -> ldapha::Result<()> {
        self.options.lock().unwrap().push(option);
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> ldapha::Result<SearchResponse> {
        let mut root = Entry::new("");
        if request.base.is_empty() {
            root = root.with_attribute("supportedExtension", [ldapha::STARTTLS_OID]);
        }
        Ok(SearchResponse::success(vec![root]))
    }

    async fn add(&mut self, _entry: &Entry) -> ldapha::Result<()> {
        Ok(())
    }

    async fn delete(&mut self, _dn: &str) -> ldapha::Result<()> {
        Ok(())
    }

    async fn modify(
        &mut self,
        _dn: &str,
        _changes: &[ldapha::DirectoryModification],
    ) -> ldapha::Result<()> {
        Ok(())
    }

    async fn rename(&mut self, _request: &RenameRequest) -> ldapha::Result<()> {
        Ok(())
    }

    async fn unbind(&mut self) -> ldapha::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_loaded_config_drives_failover() {
    let config = load_fixture("replicated.json");
    let recorder = Recorder::default();

    let client = DirectoryClient::with_factory(config, Box::new(recorder.clone()))
        .await
        .unwrap();

    assert_eq!(client.current_host(), Some("ldap2.example.com:1389"));
    assert_eq!(client.down_hosts(), ["ldap1.example.com"]);
    assert_eq!(
        *recorder.opened.lock().unwrap(),
        [
            ("ldap1.example.com".to_string(), 389),
            ("ldap2.example.com".to_string(), 1389)
        ]
    );
    assert_eq!(recorder.options.lock().unwrap().len(), 4);
    assert_eq!(
        client.get_option(OptionKind::TimeLimit),
        Some(ConnectionOption::TimeLimit(30))
    );
}
