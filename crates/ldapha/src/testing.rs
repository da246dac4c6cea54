//! In-memory directory used by scenario tests.

use crate::dn::DistinguishedName;
use crate::entry::{DirectoryModification, Entry};
use crate::transport::{LdapTransport, RenameRequest, SearchRequest, SearchResponse, TransportFactory};
use async_trait::async_trait;
use ldapha_core::error::result_code;
use ldapha_core::{ConnectionOption, Error, Result, SearchScope};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    root_dse: Entry,
    refuse_delete: HashSet<String>,
    refuse_add: HashSet<String>,
    opens: usize,
}

/// Shared handle to a fake directory tree. Clones see the same data.
#[derive(Clone, Default)]
pub(crate) struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

fn key(dn: &str) -> String {
    DistinguishedName::parse(dn)
        .map_or_else(|_| dn.to_ascii_lowercase(), |dn| dn.as_str().to_ascii_lowercase())
}

impl FakeDirectory {
    pub(crate) fn new() -> Self {
        let directory = Self::default();
        directory.lock().root_dse = Entry::new("")
            .with_attribute("supportedLDAPVersion", ["3"])
            .with_attribute("namingContexts", ["dc=test"])
            .with_attribute("subschemaSubentry", ["cn=Subschema"]);
        directory
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_entries<I, S>(self, dns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for dn in dns {
            let name = DistinguishedName::parse(dn.as_ref()).unwrap();
            let mut entry = Entry::new(name.as_str()).with_attribute("objectClass", ["top"]);
            for rdn in name.rdn() {
                entry = entry.with_attribute(rdn.attribute(), [rdn.value()]);
            }
            self.insert(entry);
        }
        self
    }

    pub(crate) fn insert(&self, entry: Entry) {
        self.lock().entries.insert(key(entry.dn()), entry);
    }

    pub(crate) fn get(&self, dn: &str) -> Option<Entry> {
        self.lock().entries.get(&key(dn)).cloned()
    }

    pub(crate) fn contains(&self, dn: &str) -> bool {
        self.get(dn).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn refuse_delete(&self, dn: &str) {
        self.lock().refuse_delete.insert(key(dn));
    }

    pub(crate) fn refuse_add(&self, dn: &str) {
        self.lock().refuse_add.insert(key(dn));
    }

    pub(crate) fn opens(&self) -> usize {
        self.lock().opens
    }
}

#[async_trait]
impl TransportFactory for FakeDirectory {
    async fn open(&self, _host: &str, _port: u16) -> Result<Box<dyn LdapTransport>> {
        self.lock().opens += 1;
        Ok(Box::new(self.clone()))
    }
}

fn has_children(state: &State, dn: &DistinguishedName) -> bool {
    state.entries.values().any(|entry| {
        DistinguishedName::parse(entry.dn()).is_ok_and(|candidate| candidate.is_descendant_of(dn))
    })
}

fn in_scope(candidate: &DistinguishedName, base: &DistinguishedName, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => candidate.same_entry(base),
        SearchScope::OneLevel => candidate
            .parent()
            .is_some_and(|parent| parent.same_entry(base)),
        SearchScope::Subtree => candidate.same_entry(base) || candidate.is_descendant_of(base),
    }
}

/// Understands `(objectClass=*)`, presence and equality terms.
fn matches(entry: &Entry, filter: &str) -> bool {
    let term = filter.trim_start_matches('(').trim_end_matches(')');
    let Some((attribute, value)) = term.split_once('=') else {
        return true;
    };
    if value == "*" {
        return attribute.eq_ignore_ascii_case("objectClass") || entry.has_attribute(attribute);
    }
    entry
        .values(attribute)
        .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
}

fn not_found(dn: &str) -> Error {
    Error::from_result_code(result_code::NO_SUCH_OBJECT, format!("no such object: {dn}"))
}

#[async_trait]
impl LdapTransport for FakeDirectory {
    async fn start_tls(&mut self) -> Result<()> {
        Ok(())
    }

    async fn set_protocol_version(&mut self, _version: u32) -> Result<()> {
        Ok(())
    }

    async fn simple_bind(&mut self, _dn: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    async fn set_option(&mut self, _option: ConnectionOption) -> Result<()> {
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        let state = self.lock();
        if request.base.is_empty() && request.scope == SearchScope::Base {
            return Ok(SearchResponse::success(vec![state.root_dse.clone()]));
        }

        let base = DistinguishedName::parse(&request.base)?;
        if !state.entries.contains_key(&key(&request.base)) {
            return Ok(SearchResponse {
                entries: Vec::new(),
                code: result_code::NO_SUCH_OBJECT,
                message: format!("no such object: {}", request.base),
            });
        }

        let mut entries: Vec<Entry> = state
            .entries
            .values()
            .filter(|entry| {
                DistinguishedName::parse(entry.dn())
                    .is_ok_and(|dn| in_scope(&dn, &base, request.scope))
            })
            .filter(|entry| matches(entry, &request.filter))
            .cloned()
            .collect();

        let limit = usize::try_from(request.size_limit).unwrap_or(0);
        if limit > 0 && entries.len() > limit {
            entries.truncate(limit);
            return Ok(SearchResponse {
                entries,
                code: result_code::SIZE_LIMIT_EXCEEDED,
                message: "size limit exceeded".to_string(),
            });
        }
        Ok(SearchResponse::success(entries))
    }

    async fn add(&mut self, entry: &Entry) -> Result<()> {
        let mut state = self.lock();
        let key = key(entry.dn());
        if state.refuse_add.contains(&key) {
            return Err(Error::from_result_code(50, "insufficient access"));
        }
        if state.entries.contains_key(&key) {
            return Err(Error::from_result_code(
                result_code::ENTRY_ALREADY_EXISTS,
                format!("already exists: {}", entry.dn()),
            ));
        }
        let mut stored = entry.clone();
        stored.mark_applied();
        state.entries.insert(key, stored);
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let mut state = self.lock();
        let key = key(dn);
        if state.refuse_delete.contains(&key) {
            return Err(Error::from_result_code(50, "insufficient access"));
        }
        if !state.entries.contains_key(&key) {
            return Err(not_found(dn));
        }
        if has_children(&state, &DistinguishedName::parse(dn)?) {
            return Err(Error::from_result_code(
                result_code::NOT_ALLOWED_ON_NON_LEAF,
                format!("{dn} has subordinates"),
            ));
        }
        state.entries.remove(&key);
        Ok(())
    }

    async fn modify(&mut self, dn: &str, changes: &[DirectoryModification]) -> Result<()> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(&key(dn)).ok_or_else(|| not_found(dn))?;
        for change in changes {
            match change {
                DirectoryModification::Add { attribute, values } => entry.add(attribute, values),
                DirectoryModification::Delete { attribute, values } => {
                    entry.delete(attribute, values);
                }
                DirectoryModification::Replace { attribute, values } => {
                    entry.replace(attribute, values);
                }
            }
        }
        entry.mark_applied();
        Ok(())
    }

    async fn rename(&mut self, request: &RenameRequest) -> Result<()> {
        let mut state = self.lock();
        let old = DistinguishedName::parse(&request.dn)?;
        let mut entry = state
            .entries
            .remove(&key(&request.dn))
            .ok_or_else(|| not_found(&request.dn))?;

        let parent = match &request.new_superior {
            Some(superior) => Some(DistinguishedName::parse(superior)?),
            None => old.parent(),
        };
        let rdn = DistinguishedName::parse(&request.new_rdn)?;
        let new = match parent {
            Some(parent) => rdn.join(&parent),
            None => rdn,
        };
        entry.set_dn(new.as_str());
        state.entries.insert(key(new.as_str()), entry);
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        Ok(())
    }
}
