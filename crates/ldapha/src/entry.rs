//! Directory entry model.
//!
//! An [`Entry`] holds a DN and its attribute values. Mutations are applied to
//! the local copy and recorded as [`DirectoryModification`]s;
//! `DirectoryClient::update` sends the recorded changes as one modify request.
//! Values that are not UTF-8 are kept apart as raw bytes so copies and moves
//! write them back unchanged.

use std::collections::BTreeMap;

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete (empty removes attribute).
        values: Vec<String>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values (empty removes attribute).
        values: Vec<String>,
    },
}

impl DirectoryModification {
    /// Attribute this modification targets.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

/// A directory entry with change tracking.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    dn: String,
    attributes: BTreeMap<String, Vec<String>>,
    binary: BTreeMap<String, Vec<Vec<u8>>>,
    changes: Vec<DirectoryModification>,
}

impl Entry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Creates an entry from attributes read from the directory.
    #[must_use]
    pub fn from_attributes<I>(dn: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        Self {
            dn: dn.into(),
            attributes: attributes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Builder-style setter for an attribute whose values are raw bytes.
    #[must_use]
    pub fn with_binary_attribute(
        mut self,
        attribute: impl Into<String>,
        values: Vec<Vec<u8>>,
    ) -> Self {
        self.binary.insert(attribute.into(), values);
        self
    }

    /// Builder-style attribute setter that does not record a change.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .insert(attribute.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Distinguished name of the entry.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Changes the DN locally (used when staging copies and moves).
    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = dn.into();
    }

    /// All values of an attribute (case-insensitive lookup).
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.key_for(attribute)
            .and_then(|key| self.attributes.get(key))
            .map(Vec::as_slice)
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Raw values of a binary attribute (case-insensitive lookup).
    #[must_use]
    pub fn binary_values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.binary
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns true when the attribute is present with at least one value.
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.values(attribute).is_some_and(|values| !values.is_empty())
            || self
                .binary_values(attribute)
                .is_some_and(|values| !values.is_empty())
    }

    /// Text attributes in name order.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.attributes
    }

    /// Binary attributes in name order.
    #[must_use]
    pub fn binary_attributes(&self) -> &BTreeMap<String, Vec<Vec<u8>>> {
        &self.binary
    }

    /// Adds values to an attribute and records the change.
    pub fn add<I, S>(&mut self, attribute: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let key = self.key_for(attribute).unwrap_or(attribute).to_string();
        let current = self.attributes.entry(key).or_default();
        for value in &values {
            if !current.contains(value) {
                current.push(value.clone());
            }
        }
        self.changes.push(DirectoryModification::Add {
            attribute: attribute.to_string(),
            values,
        });
    }

    /// Deletes values from an attribute (all values when `values` is empty)
    /// and records the change.
    pub fn delete<I, S>(&mut self, attribute: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if let Some(key) = self.key_for(attribute).map(str::to_string) {
            if values.is_empty() {
                self.attributes.remove(&key);
            } else if let Some(current) = self.attributes.get_mut(&key) {
                current.retain(|value| !values.contains(value));
                if current.is_empty() {
                    self.attributes.remove(&key);
                }
            }
        }
        self.changes.push(DirectoryModification::Delete {
            attribute: attribute.to_string(),
            values,
        });
    }

    /// Replaces all values of an attribute and records the change.
    pub fn replace<I, S>(&mut self, attribute: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if let Some(key) = self.key_for(attribute).map(str::to_string) {
            self.attributes.remove(&key);
        }
        if !values.is_empty() {
            self.attributes.insert(attribute.to_string(), values.clone());
        }
        self.changes.push(DirectoryModification::Replace {
            attribute: attribute.to_string(),
            values,
        });
    }

    /// Changes recorded since the entry was read or last applied.
    #[must_use]
    pub fn pending_changes(&self) -> &[DirectoryModification] {
        &self.changes
    }

    /// Returns true when there are changes to apply.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub(crate) fn mark_applied(&mut self) {
        self.changes.clear();
    }

    fn key_for(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(attribute))
            .map(String::as_str)
    }
}
