//! Directory entry model.
//!
//! An [`EntryRecord`] is what every query hands back: a DN, a display label
//! and an ordered, case-insensitive attribute table whose values are either
//! text or raw bytes.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::dn;

/// Attributes whose values are binary regardless of their content.
const KNOWN_BINARY_ATTRIBUTES: &[&str] = &[
    "audio",
    "authorityRevocationList",
    "cACertificate",
    "certificateRevocationList",
    "crossCertificatePair",
    "deltaRevocationList",
    "javaSerializedData",
    "jpegPhoto",
    "objectGUID",
    "objectSid",
    "personalSignature",
    "photo",
    "supportedAlgorithms",
    "thumbnailLogo",
    "thumbnailPhoto",
    "userCertificate",
    "userPKCS12",
    "userPassword",
    "userSMIMECertificate",
    "x500UniqueIdentifier",
];

/// Returns `true` if `name` denotes an attribute with binary syntax.
///
/// Matches the built-in list, any name carrying the `;binary` option, and
/// the caller-supplied `extra` names. Comparison is case-insensitive.
#[must_use]
pub fn is_binary_attribute(name: &str, extra: &[String]) -> bool {
    let base = name.split(';').next().unwrap_or(name);
    name.split(';')
        .skip(1)
        .any(|option| option.eq_ignore_ascii_case("binary"))
        || KNOWN_BINARY_ATTRIBUTES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(base))
        || extra.iter().any(|known| known.eq_ignore_ascii_case(base))
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AttributeValue {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (binary syntax, or not valid UTF-8).
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Classifies raw protocol bytes.
    ///
    /// Bytes of a binary attribute, or bytes that are not valid UTF-8, become
    /// [`AttributeValue::Binary`]; everything else is text.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, binary: bool) -> Self {
        if binary {
            return Self::Binary(bytes);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Self::Text(text),
            Err(err) => Self::Binary(err.into_bytes()),
        }
    }

    /// Returns the text, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of the value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Whether this is a binary value.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// A named, multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name as first returned by the directory.
    pub name: String,
    /// Values in directory order.
    pub values: Vec<AttributeValue>,
}

/// Insertion-ordered attribute table with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    entries: Vec<Attribute>,
}

impl AttributeMap {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to attribute `name`, creating the attribute if needed.
    ///
    /// A new attribute is placed after all existing ones; an existing one
    /// keeps its position and original spelling.
    pub fn push(&mut self, name: &str, value: impl Into<AttributeValue>) {
        let value = value.into();
        match self.position(name) {
            Some(idx) => self.entries[idx].values.push(value),
            None => self.entries.push(Attribute {
                name: name.to_string(),
                values: vec![value],
            }),
        }
    }

    /// Returns all values of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[AttributeValue]> {
        self.position(name).map(|idx| self.entries[idx].values.as_slice())
    }

    /// Returns the first text value of `name`.
    #[must_use]
    pub fn first_text(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.iter().find_map(AttributeValue::as_text))
    }

    /// Returns every text value of `name`.
    #[must_use]
    pub fn texts(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|values| values.iter().filter_map(AttributeValue::as_text).collect())
            .unwrap_or_default()
    }

    /// Whether the attribute is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of distinct attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|attr| attr.name.eq_ignore_ascii_case(name))
    }
}

impl<'a> IntoIterator for &'a AttributeMap {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// One directory entry.
///
/// Equality and hashing consider the DN only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    dn: String,
    label: String,
    /// Attribute table.
    pub attributes: AttributeMap,
    /// Lower-cased object class names in directory order.
    pub object_classes: Vec<String>,
}

impl EntryRecord {
    /// Creates an entry labelled with its leftmost RDN.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        let dn = dn.into();
        let label = dn::leftmost_rdn(&dn).to_string();
        Self::with_label(dn, label)
    }

    /// Creates an entry with an explicit label.
    #[must_use]
    pub fn with_label(dn: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            label: label.into(),
            attributes: AttributeMap::new(),
            object_classes: Vec::new(),
        }
    }

    /// Distinguished name.
    #[must_use]
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Appends an attribute value.
    pub fn add_value(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attributes.push(name, value);
    }

    /// Replaces the object classes, lower-casing each name.
    pub fn set_object_classes<I, S>(&mut self, classes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.object_classes = classes
            .into_iter()
            .map(|c| c.as_ref().to_lowercase())
            .collect();
    }

    /// Fills the object classes from the entry's own `objectClass` attribute.
    pub fn object_classes_from_attributes(&mut self) {
        let classes: Vec<String> = self
            .attributes
            .texts("objectClass")
            .into_iter()
            .map(str::to_string)
            .collect();
        self.set_object_classes(classes);
    }

    /// Whether the entry carries the given object class.
    #[must_use]
    pub fn has_object_class(&self, class: &str) -> bool {
        self.object_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(class))
    }
}

impl PartialEq for EntryRecord {
    fn eq(&self, other: &Self) -> bool {
        self.dn == other.dn
    }
}

impl Eq for EntryRecord {}

impl Hash for EntryRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dn.hash(state);
    }
}

/// Sorts entries by label using ordinal string comparison.
pub fn sort_by_label(entries: &mut [EntryRecord]) {
    entries.sort_by(|a, b| a.label.cmp(&b.label));
}
