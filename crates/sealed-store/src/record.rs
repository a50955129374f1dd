//! The record model: a JSON object with a mandatory string `id`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the partition-key field.
pub const ID_FIELD: &str = "id";

/// Why a JSON object is not a valid record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has no id")]
    MissingId,
    #[error("record id must be a non-empty string")]
    InvalidId,
}

/// A stored item: an id plus opaque payload fields.
///
/// The id is kept apart from the payload so it cannot be changed or removed
/// through field edits; it is re-attached on serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record {
    id: String,
    fields: Map<String, Value>,
}

impl Record {
    /// Build a record from a JSON object that must carry an id.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, RecordError> {
        let id = match map.remove(ID_FIELD) {
            None => return Err(RecordError::MissingId),
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(_) => return Err(RecordError::InvalidId),
        };
        Ok(Self { id, fields: map })
    }

    /// Build a record, assigning a random UUID when the object has no id.
    pub fn from_map_or_assign_id(mut map: Map<String, Value>) -> Result<Self, RecordError> {
        if !map.contains_key(ID_FIELD) {
            map.insert(ID_FIELD.into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        Self::from_map(map)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_FIELD {
            return None;
        }
        self.fields.get(field)
    }

    /// Set a payload field. Writes to `id` are ignored.
    pub fn insert(&mut self, field: &str, value: Value) {
        if field != ID_FIELD {
            self.fields.insert(field.to_owned(), value);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Flatten back into a JSON object with `id` first.
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(ID_FIELD.into(), Value::String(self.id));
        map.extend(self.fields);
        map
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = RecordError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_map(map)
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.into_map()
    }
}
