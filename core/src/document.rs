//! Mutable document view with optional binding to a database.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::{Database, GetOptions};
use crate::error::{CouchError, Result};
use crate::json;

/// An ordered JSON object with `_id`/`_rev` accessors.
///
/// A document bound to a `Database` (via `bind` or `load_from_database`)
/// can `store` itself; an unbound one fails with `CouchError::Document`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(skip)]
    db: Option<Database>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields, db: None }
    }

    /// Wrap a JSON object; any other value is a validation error.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::from_map(fields)),
            _ => Err(CouchError::Validation("document must be a JSON object".into())),
        }
    }

    /// Document id, or `""` when not yet assigned.
    pub fn id(&self) -> &str {
        self.fields.get("_id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn set_id(&mut self, id: &str) {
        self.fields.insert("_id".into(), Value::String(id.to_string()));
    }

    /// Revision token, or `""` for a document never stored.
    pub fn rev(&self) -> &str {
        self.fields.get("_rev").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn set_rev(&mut self, rev: &str) {
        self.fields.insert("_rev".into(), Value::String(rev.to_string()));
    }

    pub fn db(&self) -> Result<&Database> {
        self.db
            .as_ref()
            .ok_or_else(|| CouchError::Document("database is not set".into()))
    }

    pub fn bind(&mut self, db: Database) {
        self.db = Some(db);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Remove `key`, keeping the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// Remove `key`, or return `default` when absent.
    pub fn pop(&mut self, key: &str, default: Value) -> Value {
        self.remove(key).unwrap_or(default)
    }

    /// Remove and return the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(String, Value)> {
        let key = self.fields.keys().next_back()?.clone();
        self.fields.shift_remove(&key).map(|value| (key, value))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.fields.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_json(&self) -> Result<String> {
        json::to_string(&self.fields)
    }

    /// Store through the bound database.
    pub fn store(&mut self) -> Result<()> {
        let db = self.db()?.clone();
        self.store_to(&db)
    }

    /// Store into `db`: a document without an id is added, otherwise its
    /// fields are merged over the stored revision. The new id and revision
    /// are written back.
    pub fn store_to(&mut self, db: &Database) -> Result<()> {
        let (id, rev) = if self.id().is_empty() {
            db.add(&self.to_value())?
        } else {
            let rev = Some(self.rev()).filter(|r| !r.is_empty());
            db.update(self.id(), &self.to_value(), rev)?
        };
        self.set_id(&id);
        self.set_rev(&rev);
        Ok(())
    }

    /// Replace the contents with the stored document (optionally revision
    /// `rev`) and bind `db`. A missing document is a 404 database error.
    pub fn load_from_database(&mut self, db: &Database, doc_id: &str, rev: Option<&str>) -> Result<()> {
        let options = rev.map(GetOptions::rev).unwrap_or_default();
        let mut fields = match db.get(doc_id, &options)? {
            Value::Object(map) if !map.is_empty() => map,
            _ => {
                return Err(CouchError::database_with(404, "Requested document not found"));
            }
        };
        let id = fields.shift_remove("_id");
        let rev = fields.shift_remove("_rev");

        self.fields = Map::new();
        if let Some(id) = id {
            self.fields.insert("_id".into(), id);
        }
        if let Some(rev) = rev {
            self.fields.insert("_rev".into(), rev);
        }
        self.fields.extend(fields);
        self.db = Some(db.clone());
        Ok(())
    }

    pub fn load(db: &Database, doc_id: &str) -> Result<Self> {
        let mut doc = Self::new();
        doc.load_from_database(db, doc_id, None)?;
        Ok(doc)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("fields", &self.fields)
            .field("db", &self.db.as_ref().map(Database::name))
            .finish()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Document {}>", Value::Object(self.fields.clone()))
    }
}

impl Index<&str> for Document {
    type Output = Value;

    /// Panics when `key` is absent, like `HashMap`.
    fn index(&self, key: &str) -> &Value {
        &self.fields[key]
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

impl Extend<(String, Value)> for Document {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.fields.extend(iter);
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
