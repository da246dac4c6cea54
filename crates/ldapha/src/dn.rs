//! Distinguished Name utilities.
//!
//! Used by the existence check, subtree delete and move operations to split a
//! DN into its RDN components and to rebuild DNs from them. Values are held
//! unescaped; RFC 4514 escapes, including `\XX` hex pairs, are decoded on
//! parse and re-applied when a name is serialized.

use std::fmt;
use thiserror::Error;

use ldapha_core::Error as CoreError;

use crate::search::escape_filter_value;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

/// A single attribute/value pair of an RDN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Create a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion of the RDN (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Attribute value portion of the RDN (unescaped).
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN matches the provided attribute name (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }

    fn same_as(&self, other: &Self) -> bool {
        self.matches_attribute(&other.attribute) && self.value.eq_ignore_ascii_case(&other.value)
    }
}

/// One RDN: a `+`-joined set of attribute/value pairs.
pub type Rdn = Vec<RelativeDistinguishedName>;

/// Parsed distinguished name.
///
/// [`DistinguishedName::as_str`] is the escaped serialization of the parsed
/// RDNs. It names the same entry as the input but need not match it byte for
/// byte (`\2C` comes back as `\,`), so requests for entries the server
/// returned should carry the server's DN string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    /// Parses a distinguished name from a string.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the distinguished name is empty,
    /// contains invalid syntax, or an escaped value is not UTF-8.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }
        Ok(Self::from_rdns(parse_rdns(input)?))
    }

    /// Builds a distinguished name from RDNs (leaf first).
    #[must_use]
    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self {
            raw: join_dn(&rdns),
            rdns,
        }
    }

    /// Escaped string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the RDN sets in order, leaf first.
    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Number of RDNs.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// The leaf RDN.
    #[must_use]
    pub fn rdn(&self) -> &[RelativeDistinguishedName] {
        self.rdns.first().map(Vec::as_slice).unwrap_or_default()
    }

    /// The leaf RDN as an escaped string (e.g. `cn=Smith\, John`).
    #[must_use]
    pub fn rdn_string(&self) -> String {
        join_dn(&self.rdns[..self.rdns.len().min(1)])
    }

    /// The parent DN, or `None` for a single-RDN name.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.len() < 2 {
            return None;
        }
        Some(Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Returns true if `self` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        let (mine, theirs) = (self.rdns.len(), ancestor.rdns.len());
        mine > theirs
            && self.rdns[mine - theirs..]
                .iter()
                .zip(&ancestor.rdns)
                .all(|(a, b)| rdn_equal(a, b))
    }

    /// Returns true when both names denote the same entry (case-insensitive).
    #[must_use]
    pub fn same_entry(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(&other.rdns)
                .all(|(a, b)| rdn_equal(a, b))
    }

    /// Search filter matching the leaf RDN, e.g. `(cn=John)` or
    /// `(&(cn=John)(uid=1234))` for a multi-valued RDN.
    #[must_use]
    pub fn rdn_filter(&self) -> String {
        let terms = self
            .rdn()
            .iter()
            .map(|rdn| format!("({}={})", rdn.attribute(), escape_filter_value(rdn.value())))
            .collect::<Vec<_>>();
        if terms.len() == 1 {
            terms.into_iter().collect()
        } else {
            format!("(&{})", terms.concat())
        }
    }

    /// Places this name below `suffix`.
    #[must_use]
    pub fn join(mut self, suffix: &DistinguishedName) -> Self {
        self.rdns.extend(suffix.rdns.iter().cloned());
        self.raw = join_dn(&self.rdns);
        self
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a DN into its RDNs, leaf first.
///
/// # Errors
///
/// Returns [`DistinguishedNameError`] for malformed input.
pub fn split_dn(dn: &str) -> std::result::Result<Vec<Rdn>, DistinguishedNameError> {
    DistinguishedName::parse(dn).map(|dn| dn.rdns)
}

/// Joins RDNs (leaf first) into an escaped DN string.
#[must_use]
pub fn join_dn(rdns: &[Rdn]) -> String {
    rdns.iter()
        .map(|rdn| {
            rdn.iter()
                .map(|component| format!("{}={}", component.attribute(), escape(component.value())))
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn rdn_equal(a: &Rdn, b: &Rdn) -> bool {
    a.len() == b.len() && a.iter().all(|left| b.iter().any(|right| left.same_as(right)))
}

/// One attribute/value pair being read. The value is collected as bytes so
/// hex escapes of multi-byte UTF-8 sequences decode correctly.
#[derive(Default)]
struct PairBuilder {
    attribute: String,
    value: Option<Vec<u8>>,
    // Unescaped spaces at the end of `value`; insignificant per RFC 4514.
    trailing_spaces: usize,
}

impl PairBuilder {
    fn in_value(&self) -> bool {
        self.value.is_some()
    }

    fn start_value(&mut self, input: &str) -> std::result::Result<(), DistinguishedNameError> {
        let attribute = self.attribute.trim();
        if attribute.is_empty() {
            return Err(DistinguishedNameError::MissingAttribute(input.to_string()));
        }
        self.attribute = attribute.to_string();
        self.value = Some(Vec::new());
        Ok(())
    }

    fn push_char(&mut self, ch: char) {
        let Some(value) = self.value.as_mut() else {
            return;
        };
        if ch == ' ' {
            if value.is_empty() {
                return;
            }
            self.trailing_spaces += 1;
        } else {
            self.trailing_spaces = 0;
        }
        value.extend_from_slice(ch.encode_utf8(&mut [0; 4]).as_bytes());
    }

    fn push_escaped(&mut self, bytes: &[u8]) {
        if let Some(value) = self.value.as_mut() {
            value.extend_from_slice(bytes);
            self.trailing_spaces = 0;
        }
    }

    fn finish(&mut self) -> std::result::Result<RelativeDistinguishedName, DistinguishedNameError> {
        let Self {
            attribute,
            value,
            trailing_spaces,
        } = std::mem::take(self);
        let mut value = value.unwrap_or_default();
        value.truncate(value.len() - trailing_spaces);
        if value.is_empty() {
            return Err(DistinguishedNameError::MissingValue(attribute));
        }
        let value = String::from_utf8(value).map_err(|err| {
            DistinguishedNameError::InvalidComponent(format!("{attribute}: {err}"))
        })?;
        Ok(RelativeDistinguishedName::new(attribute, value))
    }
}

fn parse_rdns(input: &str) -> std::result::Result<Vec<Rdn>, DistinguishedNameError> {
    let invalid = || DistinguishedNameError::InvalidComponent(input.to_string());
    let mut rdns = Vec::new();
    let mut rdn = Vec::new();
    let mut pair = PairBuilder::default();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if !pair.in_value() {
            match ch {
                '=' => pair.start_value(input)?,
                ',' | '+' => return Err(invalid()),
                _ => pair.attribute.push(ch),
            }
            continue;
        }

        match ch {
            '\\' => {
                let next = chars.next().ok_or(DistinguishedNameError::UnterminatedEscape)?;
                match next.to_digit(16) {
                    Some(high) => {
                        let low = chars
                            .next()
                            .and_then(|low| low.to_digit(16))
                            .ok_or_else(invalid)?;
                        let byte = u8::try_from((high << 4) | low).map_err(|_| invalid())?;
                        pair.push_escaped(&[byte]);
                    }
                    None => pair.push_escaped(next.encode_utf8(&mut [0; 4]).as_bytes()),
                }
            }
            ',' => {
                rdn.push(pair.finish()?);
                rdns.push(std::mem::take(&mut rdn));
            }
            '+' => rdn.push(pair.finish()?),
            _ => pair.push_char(ch),
        }
    }

    if !pair.in_value() {
        return Err(invalid());
    }
    rdn.push(pair.finish()?);
    rdns.push(rdn);
    Ok(rdns)
}

fn escape(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' ' | '#' if idx == 0 => {
                escaped.push('\\');
                escaped.push(ch);
            }
            ' ' if idx == last => escaped.push_str("\\ "),
            _ if ch.is_ascii_control() => {
                escaped.push_str(&format!("\\{:02X}", u32::from(ch)));
            }
            _ => escaped.push(ch),
        }
    }

    escaped
}
