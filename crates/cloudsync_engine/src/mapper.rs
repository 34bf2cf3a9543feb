//! Mapping between typed entities and documents.

use crate::error::{SyncError, SyncResult};
use cloudsync_protocol::{Document, EntityId, Value, ID_FIELD};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value as Json};

/// Converts typed entities to [`Document`]s and back.
///
/// Any type that implements `Serialize` and `Deserialize` as a struct (a JSON
/// object) can be synced, as long as it carries its id in the `_id` field:
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Note {
///     #[serde(rename = "_id")]
///     id: i64,
///     text: String,
/// }
/// ```
///
/// The mapping goes through `serde_json`, so the usual JSON limitations apply:
/// byte strings become arrays of integers and GUIDs become text. Documents
/// produced by the mapper are always valid patch entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentMapper;

impl DocumentMapper {
    /// Creates a mapper.
    pub fn new() -> Self {
        Self
    }

    /// Serializes an entity into a document.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEntity`] if the entity does not serialize to
    /// an object, or if the object has no usable `_id`.
    pub fn to_document<T: Serialize>(&self, entity: &T) -> SyncResult<Document> {
        let json = serde_json::to_value(entity)
            .map_err(|err| SyncError::invalid_entity::<T>(err.to_string()))?;
        let Json::Object(fields) = json else {
            return Err(SyncError::invalid_entity::<T>("does not serialize to an object"));
        };
        let document: Document = fields
            .into_iter()
            .map(|(key, value)| (key, from_json(value)))
            .collect();

        match document.id() {
            None => Err(SyncError::invalid_entity::<T>(format!(
                "missing '{ID_FIELD}' field"
            ))),
            Some(id) if id.is_null() => Err(SyncError::invalid_entity::<T>(format!(
                "'{ID_FIELD}' is null"
            ))),
            Some(_) => Ok(document),
        }
    }

    /// Deserializes a document into an entity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidEntity`] if the document does not match the
    /// entity's shape.
    pub fn from_document<T: DeserializeOwned>(&self, document: &Document) -> SyncResult<T> {
        let json = document_to_json::<T>(document)?;
        serde_json::from_value(json).map_err(|err| SyncError::invalid_entity::<T>(err.to_string()))
    }

    /// Returns the entity id an entity would be synced under.
    pub fn entity_id<T: Serialize>(&self, collection: &str, entity: &T) -> SyncResult<EntityId> {
        let document = self.to_document(entity)?;
        let id = document
            .id()
            .cloned()
            .ok_or_else(|| SyncError::invalid_entity::<T>(format!("missing '{ID_FIELD}' field")))?;
        EntityId::new(collection, id).map_err(|err| SyncError::invalid_entity::<T>(err.to_string()))
    }
}

fn from_json(value: Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Text(s),
        Json::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        Json::Object(fields) => Value::Document(
            fields
                .into_iter()
                .map(|(key, value)| (key, from_json(value)))
                .collect(),
        ),
    }
}

fn document_to_json<T>(document: &Document) -> SyncResult<Json> {
    let mut fields = Map::new();
    for (key, value) in document.iter() {
        fields.insert(key.to_string(), to_json::<T>(value)?);
    }
    Ok(Json::Object(fields))
}

fn to_json<T>(value: &Value) -> SyncResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::MinValue | Value::MaxValue => {
            return Err(SyncError::invalid_entity::<T>(format!(
                "{} has no entity representation",
                value.type_name()
            )))
        }
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Double(d) => Json::Number(Number::from_f64(*d).ok_or_else(|| {
            SyncError::invalid_entity::<T>(format!("non-finite double {d}"))
        })?),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Guid(guid) => Json::String(guid.hyphenated().to_string()),
        Value::Array(items) => Json::Array(
            items
                .iter()
                .map(to_json::<T>)
                .collect::<SyncResult<Vec<_>>>()?,
        ),
        Value::Document(document) => document_to_json::<T>(document)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        #[serde(rename = "_id")]
        id: i64,
        text: String,
        tags: Vec<String>,
        score: f64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Untagged {
        text: String,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Keyed {
        #[serde(rename = "_id")]
        id: Uuid,
    }

    fn note() -> Note {
        Note {
            id: 7,
            text: "hello".into(),
            tags: vec!["a".into(), "b".into()],
            score: 1.5,
        }
    }

    #[test]
    fn entity_to_document() {
        let document = DocumentMapper::new().to_document(&note()).unwrap();
        assert_eq!(document.id(), Some(&Value::Int(7)));
        assert_eq!(document.get("text"), Some(&Value::from("hello")));
        assert_eq!(document.get("score"), Some(&Value::Double(1.5)));
        assert_eq!(
            document.get("tags"),
            Some(&Value::Array(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn document_to_entity() {
        let mapper = DocumentMapper::new();
        let document = mapper.to_document(&note()).unwrap();
        let back: Note = mapper.from_document(&document).unwrap();
        assert_eq!(back, note());
    }

    #[test]
    fn entity_without_id_is_invalid() {
        let err = DocumentMapper::new()
            .to_document(&Untagged { text: "x".into() })
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidEntity { .. }));
        assert!(err.to_string().contains("Untagged"));
    }

    #[test]
    fn non_object_entity_is_invalid() {
        let err = DocumentMapper::new().to_document(&42_i64).unwrap_err();
        assert!(matches!(err, SyncError::InvalidEntity { .. }));
    }

    #[test]
    fn mismatched_document_is_invalid() {
        let document = Document::new().with(ID_FIELD, 1).with("text", 5);
        let result: SyncResult<Note> = DocumentMapper::new().from_document(&document);
        assert!(matches!(result, Err(SyncError::InvalidEntity { .. })));
    }

    #[test]
    fn guid_ids_map_through_text() {
        let mapper = DocumentMapper::new();
        let guid = Uuid::new_v4();
        let id = mapper.entity_id("keys", &Keyed { id: guid }).unwrap();
        assert_eq!(id.collection(), "keys");
        assert_eq!(id.id(), &Value::Text(guid.hyphenated().to_string()));

        let document = Document::new().with(ID_FIELD, guid);
        let keyed: Keyed = mapper.from_document(&document).unwrap();
        assert_eq!(keyed.id, guid);
    }

    #[test]
    fn sentinel_values_do_not_map() {
        let document = Document::new().with(ID_FIELD, 1).with("text", Value::MaxValue);
        let result: SyncResult<Note> = DocumentMapper::new().from_document(&document);
        assert!(result.is_err());
    }
}
