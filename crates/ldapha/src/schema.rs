//! Directory schema.
//!
//! Parses the `attributeTypes` and `objectClasses` values of a subschema entry
//! (RFC 4512 descriptions) far enough to answer name, syntax, and
//! must/may lookups. Unknown description fields are skipped.

use crate::entry::Entry;
use ldapha_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Directory String syntax; values of attributes with this syntax are UTF-8.
pub const DIRECTORY_STRING_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.15";

const MAX_SUPERTYPE_DEPTH: usize = 16;

/// Kinds of schema elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaItem {
    /// Attribute type definitions.
    Attribute,
    /// Object class definitions.
    ObjectClass,
}

/// Attribute type definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeType {
    /// Numeric OID.
    pub oid: String,
    /// Names, first one canonical.
    pub names: Vec<String>,
    /// Description.
    pub description: Option<String>,
    /// Supertype name or OID.
    pub superior: Option<String>,
    /// Syntax OID without length bound.
    pub syntax: Option<String>,
    /// Whether the attribute is single valued.
    pub single_value: bool,
}

/// Object class definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClass {
    /// Numeric OID.
    pub oid: String,
    /// Names, first one canonical.
    pub names: Vec<String>,
    /// Description.
    pub description: Option<String>,
    /// Superclasses.
    pub superiors: Vec<String>,
    /// Required attributes.
    pub must: Vec<String>,
    /// Optional attributes.
    pub may: Vec<String>,
}

/// A schema element returned by [`Schema::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaElement<'a> {
    /// An attribute type.
    Attribute(&'a AttributeType),
    /// An object class.
    ObjectClass(&'a ObjectClass),
}

/// Parsed directory schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    attribute_types: Vec<AttributeType>,
    object_classes: Vec<ObjectClass>,
}

impl Schema {
    /// Builds a schema from a subschema entry. Descriptions that fail to
    /// parse are skipped.
    #[must_use]
    pub fn from_entry(entry: &Entry) -> Self {
        let mut schema = Self::default();

        for description in entry.values("attributeTypes").unwrap_or_default() {
            match parse_attribute_type(description) {
                Some(attribute) => schema.attribute_types.push(attribute),
                None => debug!(%description, "skipping unparsable attribute type"),
            }
        }
        for description in entry.values("objectClasses").unwrap_or_default() {
            match parse_object_class(description) {
                Some(class) => schema.object_classes.push(class),
                None => debug!(%description, "skipping unparsable object class"),
            }
        }

        schema
    }

    /// Looks up an attribute type by name or OID (case-insensitive).
    #[must_use]
    pub fn attribute_type(&self, name: &str) -> Option<&AttributeType> {
        self.attribute_types
            .iter()
            .find(|attribute| matches_name(&attribute.oid, &attribute.names, name))
    }

    /// Looks up an object class by name or OID (case-insensitive).
    #[must_use]
    pub fn object_class(&self, name: &str) -> Option<&ObjectClass> {
        self.object_classes
            .iter()
            .find(|class| matches_name(&class.oid, &class.names, name))
    }

    /// Looks up a schema element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the schema has no such element.
    pub fn get(&self, item: SchemaItem, name: &str) -> Result<SchemaElement<'_>> {
        let found = match item {
            SchemaItem::Attribute => self.attribute_type(name).map(SchemaElement::Attribute),
            SchemaItem::ObjectClass => self.object_class(name).map(SchemaElement::ObjectClass),
        };
        found.ok_or_else(|| Error::NotFound(format!("schema has no {item:?} named `{name}`")))
    }

    /// Syntax of an attribute, following supertypes when the attribute does
    /// not declare one.
    #[must_use]
    pub fn effective_syntax(&self, name: &str) -> Option<&str> {
        let mut current = self.attribute_type(name)?;
        for _ in 0..MAX_SUPERTYPE_DEPTH {
            if let Some(syntax) = current.syntax.as_deref() {
                return Some(syntax);
            }
            current = self.attribute_type(current.superior.as_deref()?)?;
        }
        None
    }

    /// Returns true when values of the attribute are Directory Strings.
    #[must_use]
    pub fn is_utf8(&self, name: &str) -> bool {
        self.effective_syntax(name) == Some(DIRECTORY_STRING_SYNTAX)
    }

    /// Number of attribute types.
    #[must_use]
    pub fn attribute_type_count(&self) -> usize {
        self.attribute_types.len()
    }

    /// Number of object classes.
    #[must_use]
    pub fn object_class_count(&self) -> usize {
        self.object_classes.len()
    }
}

fn matches_name(oid: &str, names: &[String], wanted: &str) -> bool {
    oid == wanted || names.iter().any(|name| name.eq_ignore_ascii_case(wanted))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Quoted(String),
    Word(String),
}

fn tokenize(description: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = description.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '\'' => {
                chars.next();
                let quoted: String = chars.by_ref().take_while(|c| *c != '\'').collect();
                tokens.push(Token::Quoted(quoted));
            }
            c if c.is_whitespace() || c == '$' => {
                chars.next();
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '$') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    tokens
}

/// Reads one value or a parenthesized list of values.
fn read_list(tokens: &[Token], pos: &mut usize) -> Vec<String> {
    let mut values = Vec::new();
    match tokens.get(*pos) {
        Some(Token::Open) => {
            *pos += 1;
            while let Some(token) = tokens.get(*pos) {
                *pos += 1;
                match token {
                    Token::Close => break,
                    Token::Quoted(value) | Token::Word(value) => values.push(value.clone()),
                    Token::Open => {}
                }
            }
        }
        Some(Token::Quoted(value) | Token::Word(value)) => {
            *pos += 1;
            values.push(value.clone());
        }
        _ => {}
    }
    values
}

fn is_keyword(token: Option<&Token>) -> bool {
    matches!(token, Some(Token::Word(word))
        if word.chars().all(|c| c.is_ascii_uppercase() || c == '-' || c == '_'))
}

/// Walks `( oid KEY value ... )`, handing each keyword to `field`.
fn parse_description<F>(description: &str, mut field: F) -> Option<String>
where
    F: FnMut(&str, &[Token], &mut usize),
{
    let tokens = tokenize(description);
    if tokens.first() != Some(&Token::Open) {
        return None;
    }
    let Some(Token::Word(oid)) = tokens.get(1) else {
        return None;
    };

    let mut pos = 2;
    while let Some(token) = tokens.get(pos) {
        pos += 1;
        match token {
            Token::Close => break,
            Token::Word(keyword) => field(keyword, &tokens, &mut pos),
            _ => {}
        }
    }
    Some(oid.clone())
}

fn skip_unknown(tokens: &[Token], pos: &mut usize) {
    if !is_keyword(tokens.get(*pos)) && tokens.get(*pos) != Some(&Token::Close) {
        read_list(tokens, pos);
    }
}

fn parse_attribute_type(description: &str) -> Option<AttributeType> {
    let mut attribute = AttributeType::default();
    let oid = parse_description(description, |keyword, tokens, pos| match keyword {
        "NAME" => attribute.names = read_list(tokens, pos),
        "DESC" => attribute.description = read_list(tokens, pos).into_iter().next(),
        "SUP" => attribute.superior = read_list(tokens, pos).into_iter().next(),
        "SYNTAX" => {
            attribute.syntax = read_list(tokens, pos)
                .into_iter()
                .next()
                .map(|syntax| syntax.split('{').next().unwrap_or_default().to_string());
        }
        "SINGLE-VALUE" => attribute.single_value = true,
        "OBSOLETE" | "COLLECTIVE" | "NO-USER-MODIFICATION" => {}
        _ => skip_unknown(tokens, pos),
    })?;
    attribute.oid = oid;
    Some(attribute)
}

fn parse_object_class(description: &str) -> Option<ObjectClass> {
    let mut class = ObjectClass::default();
    let oid = parse_description(description, |keyword, tokens, pos| match keyword {
        "NAME" => class.names = read_list(tokens, pos),
        "DESC" => class.description = read_list(tokens, pos).into_iter().next(),
        "SUP" => class.superiors = read_list(tokens, pos),
        "MUST" => class.must = read_list(tokens, pos),
        "MAY" => class.may = read_list(tokens, pos),
        "STRUCTURAL" | "AUXILIARY" | "ABSTRACT" | "OBSOLETE" => {}
        _ => skip_unknown(tokens, pos),
    })?;
    class.oid = oid;
    Some(class)
}
