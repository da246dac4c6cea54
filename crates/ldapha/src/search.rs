//! Search parameters, filter helpers and search results.

use crate::entry::Entry;
use ldapha_core::{Error, Result, SearchScope};

/// Optional parameters of a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    /// Scope override; the configured default scope when `None`.
    pub scope: Option<SearchScope>,
    /// Attributes to return; all user attributes when empty.
    pub attributes: Vec<String>,
    /// Maximum entries the server should return (0 = no client limit).
    pub size_limit: i32,
    /// Maximum seconds the server should spend (0 = no client limit).
    pub time_limit: i32,
    /// Return attribute names only.
    pub types_only: bool,
}

impl SearchParams {
    /// Parameters with every field at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scope.
    #[must_use]
    pub const fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets the requested attributes.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the size limit.
    #[must_use]
    pub const fn size_limit(mut self, limit: i32) -> Self {
        self.size_limit = limit;
        self
    }

    /// Sets the time limit.
    #[must_use]
    pub const fn time_limit(mut self, limit: i32) -> Self {
        self.time_limit = limit;
        self
    }
}

/// Result of a search.
///
/// A search whose base does not exist, or which hit the size limit, still
/// yields a result; the latter keeps the entries returned before the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    entries: Vec<Entry>,
    attributes: Vec<String>,
    size_limit_exceeded: bool,
}

impl SearchResult {
    pub(crate) fn new(entries: Vec<Entry>, attributes: Vec<String>, size_limit_exceeded: bool) -> Self {
        Self {
            entries,
            attributes,
            size_limit_exceeded,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry, if any.
    #[must_use]
    pub fn first_entry(&self) -> Option<&Entry> {
        self.entries.first()
    }

    /// All entries.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Attributes that were requested.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Returns true when the server stopped at its size limit.
    #[must_use]
    pub const fn size_limit_exceeded(&self) -> bool {
        self.size_limit_exceeded
    }

    /// Iterates over entries.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }
}

impl IntoIterator for SearchResult {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Escapes a value for use inside a search filter (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Checks a filter string for balanced parentheses and wraps a bare
/// `attr=value` term in parentheses.
///
/// This is a structural sanity check only; the server remains the authority
/// on filter syntax.
///
/// # Errors
///
/// Returns [`Error::FilterSyntax`] for empty or unbalanced filters.
pub fn normalize_filter(filter: &str) -> Result<String> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Err(Error::FilterSyntax("empty filter".to_string()));
    }

    let filter = if filter.starts_with('(') {
        filter.to_string()
    } else {
        format!("({filter})")
    };

    let mut depth: usize = 0;
    let mut escaped = false;
    for (idx, ch) in filter.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::FilterSyntax(format!("unbalanced `)` in {filter}")))?;
                if depth == 0 && idx + 1 != filter.len() {
                    return Err(Error::FilterSyntax(format!(
                        "trailing data after filter in {filter}"
                    )));
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::FilterSyntax(format!("unbalanced `(` in {filter}")));
    }
    if !filter.contains(['=', '~', '<', '>']) {
        return Err(Error::FilterSyntax(format!("no comparison in {filter}")));
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_special_characters() {
        assert_eq!(escape_filter_value("a*b(c)\\"), "a\\2ab\\28c\\29\\5c");
        assert_eq!(escape_filter_value("plain"), "plain");
    }

    #[test]
    fn normalize_wraps_bare_terms() {
        assert_eq!(normalize_filter("uid=jdoe").unwrap(), "(uid=jdoe)");
        assert_eq!(
            normalize_filter(" (&(uid=a)(cn=b)) ").unwrap(),
            "(&(uid=a)(cn=b))"
        );
        assert_eq!(normalize_filter("(cn=a\\29b)").unwrap(), "(cn=a\\29b)");
    }

    #[test]
    fn normalize_rejects_malformed_filters() {
        assert!(matches!(normalize_filter(""), Err(Error::FilterSyntax(_))));
        assert!(matches!(
            normalize_filter("(&(uid=a)(cn=b)"),
            Err(Error::FilterSyntax(_))
        ));
        assert!(matches!(
            normalize_filter("(uid=a))"),
            Err(Error::FilterSyntax(_))
        ));
        assert!(matches!(
            normalize_filter("(uid=a)(cn=b)"),
            Err(Error::FilterSyntax(_))
        ));
        assert!(matches!(normalize_filter("(uid)"), Err(Error::FilterSyntax(_))));
    }

    #[test]
    fn result_accessors() {
        let result = SearchResult::new(
            vec![Entry::new("cn=a,dc=test"), Entry::new("cn=b,dc=test")],
            vec!["cn".to_string()],
            true,
        );
        assert_eq!(result.count(), 2);
        assert_eq!(result.first_entry().unwrap().dn(), "cn=a,dc=test");
        assert!(result.size_limit_exceeded());
        assert_eq!(result.attributes(), ["cn"]);
        assert_eq!(result.iter().count(), 2);
        let dns: Vec<String> = result.into_iter().map(|e| e.dn().to_string()).collect();
        assert_eq!(dns, ["cn=a,dc=test", "cn=b,dc=test"]);
    }

    #[test]
    fn empty_result() {
        let result = SearchResult::default();
        assert_eq!(result.count(), 0);
        assert!(result.is_empty());
        assert!(result.first_entry().is_none());
    }
}
