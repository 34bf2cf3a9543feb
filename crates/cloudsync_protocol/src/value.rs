//! Dynamic document values.
//!
//! Synced entities travel as [`Document`]s: insertion-ordered maps from field
//! names to [`Value`]s. The entity's identity lives in the [`ID_FIELD`] field.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Name of the field that carries a document's id.
pub const ID_FIELD: &str = "_id";

/// A dynamic document value.
///
/// `MinValue` and `MaxValue` are the store's reserved range markers. Together
/// with `Null` they mean "no value" and can never identify an entity.
///
/// Equality is structural. Doubles compare by bit pattern so that `Value`
/// can be `Eq` and `Hash` and be used as a map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Sentinel that sorts before every other value.
    MinValue,
    /// Sentinel that sorts after every other value.
    MaxValue,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UUID.
    Guid(Uuid),
    /// Array of values.
    Array(Vec<Value>),
    /// Embedded document.
    Document(Document),
}

impl Value {
    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for the "no value" markers: `Null`, `MinValue` and `MaxValue`.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Value::Null | Value::MinValue | Value::MaxValue)
    }

    /// Short name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::MinValue => "min-value",
            Value::MaxValue => "max-value",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Guid(_) => "guid",
            Value::Array(_) => "array",
            Value::Document(_) => "document",
        }
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a double, if it is one.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Get this value as a string, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a UUID, if it is one.
    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            Value::Guid(g) => Some(*g),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an embedded document, if it is one.
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null)
            | (Value::MinValue, Value::MinValue)
            | (Value::MaxValue, Value::MaxValue) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null | Value::MinValue | Value::MaxValue => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(n) => n.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Guid(g) => g.hash(state),
            Value::Array(items) => items.hash(state),
            Value::Document(doc) => doc.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::MinValue => f.write_str("$minValue"),
            Value::MaxValue => f.write_str("$maxValue"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Guid(g) => write!(f, "{g}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Document(doc) => write!(f, "{doc}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Document(doc)
    }
}

/// An insertion-ordered map of field names to values.
///
/// Two documents are equal when they hold the same fields with equal values,
/// regardless of field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(IndexMap<String, Value>);

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Returns the document with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Removes a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Returns true if the field exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The value of the `_id` field.
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Field order does not take part in equality, so hash in key order.
        let mut fields: Vec<_> = self.0.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields.len().hash(state);
        for (key, value) in fields {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn sentinels() {
        assert!(Value::Null.is_sentinel());
        assert!(Value::MinValue.is_sentinel());
        assert!(Value::MaxValue.is_sentinel());
        assert!(!Value::Int(0).is_sentinel());
        assert!(!Value::Text(String::new()).is_sentinel());
    }

    #[test]
    fn int_and_double_are_distinct() {
        assert_ne!(Value::Int(1), Value::Double(1.0));
        assert_eq!(Value::Double(1.5), Value::Double(1.5));
    }

    #[test]
    fn document_equality_ignores_field_order() {
        let a = Document::new().with("_id", 1).with("Text", "x");
        let b = Document::new().with("Text", "x").with("_id", 1);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = Document::new().with("_id", 1).with("Text", "y");
        assert_ne!(a, c);
    }

    #[test]
    fn document_preserves_insertion_order() {
        let mut doc = Document::new().with("b", 1).with("a", 2).with("c", 3);
        doc.remove("a");
        let keys: Vec<_> = doc.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn document_id() {
        let doc = Document::new().with("_id", "abc").with("n", 2);
        assert_eq!(doc.id(), Some(&Value::Text("abc".into())));
        assert!(Document::new().with("n", 2).id().is_none());
    }

    #[test]
    fn value_accessors() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Int(42).as_text(), None);
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
        assert_eq!(Value::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
        let g = Uuid::new_v4();
        assert_eq!(Value::from(g).as_guid(), Some(g));
    }

    #[test]
    fn display() {
        let doc = Document::new().with("_id", 1).with("Text", "x");
        assert_eq!(doc.to_string(), "{_id: 1, Text: \"x\"}");
        assert_eq!(Value::Array(vec![1.into(), 2.into()]).to_string(), "[1, 2]");
    }
}
