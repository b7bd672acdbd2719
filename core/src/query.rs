//! Mango query and index definitions.
//!
//! `to_json` always emits `selector` and `limit`; every other field appears
//! only when it differs from the server default.

use serde_json::{json, Map, Value};

const DEFAULT_LIMIT: u64 = 25;

/// Sort direction for a `FindQuery` sort entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Body of a `_find` request.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub selector: Map<String, Value>,
    pub limit: u64,
    pub skip: u64,
    pub sort: Vec<Value>,
    pub fields: Vec<String>,
    pub use_index: Vec<String>,
    pub r: u32,
    pub bookmark: Option<String>,
    pub update: bool,
    pub stable: bool,
    pub stale: Option<String>,
    pub execution_stats: bool,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self {
            selector: Map::new(),
            limit: DEFAULT_LIMIT,
            skip: 0,
            sort: Vec::new(),
            fields: Vec::new(),
            use_index: Vec::new(),
            r: 1,
            bookmark: None,
            update: true,
            stable: false,
            stale: None,
            execution_stats: false,
        }
    }
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one selector condition, e.g. `("type", json!("number"))` or
    /// `("year", json!({"$gt": 2010}))`.
    pub fn filter(mut self, field: &str, condition: Value) -> Self {
        self.selector.insert(field.to_string(), condition);
        self
    }

    /// Replace the whole selector. Non-object values leave it empty.
    pub fn selector(mut self, selector: Value) -> Self {
        self.selector = match selector {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        let mut entry = Map::new();
        entry.insert(field.to_string(), json!(order.as_str()));
        self.sort.push(Value::Object(entry));
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Index hint: a design document id, optionally followed by an index name.
    pub fn use_index(mut self, ddoc: &str, name: Option<&str>) -> Self {
        self.use_index = std::iter::once(ddoc).chain(name).map(str::to_string).collect();
        self
    }

    pub fn bookmark(mut self, bookmark: &str) -> Self {
        self.bookmark = Some(bookmark.to_string());
        self
    }

    pub fn read_quorum(mut self, r: u32) -> Self {
        self.r = r;
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn stable(mut self, stable: bool) -> Self {
        self.stable = stable;
        self
    }

    pub fn stale(mut self, stale: &str) -> Self {
        self.stale = Some(stale.to_string());
        self
    }

    pub fn execution_stats(mut self, enabled: bool) -> Self {
        self.execution_stats = enabled;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("selector".into(), Value::Object(self.selector.clone()));
        out.insert("limit".into(), json!(self.limit));
        if self.skip > 0 {
            out.insert("skip".into(), json!(self.skip));
        }
        if !self.sort.is_empty() {
            out.insert("sort".into(), Value::Array(self.sort.clone()));
        }
        if !self.fields.is_empty() {
            out.insert("fields".into(), json!(self.fields));
        }
        match self.use_index.as_slice() {
            [] => {}
            [ddoc] => {
                out.insert("use_index".into(), json!(ddoc));
            }
            pair => {
                out.insert("use_index".into(), json!(pair));
            }
        }
        if self.r != 1 {
            out.insert("r".into(), json!(self.r));
        }
        if let Some(bookmark) = &self.bookmark {
            out.insert("bookmark".into(), json!(bookmark));
        }
        if !self.update {
            out.insert("update".into(), json!(false));
        }
        if self.stable {
            out.insert("stable".into(), json!(true));
        }
        if let Some(stale) = &self.stale {
            out.insert("stale".into(), json!(stale));
        }
        if self.execution_stats {
            out.insert("execution_stats".into(), json!(true));
        }
        Value::Object(out)
    }
}

/// Body of a `POST _index` request.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub fields: Vec<String>,
    pub name: String,
    pub ddoc: Option<String>,
    pub index_type: String,
}

impl Default for IndexQuery {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            name: String::new(),
            ddoc: None,
            index_type: "json".to_string(),
        }
    }
}

impl IndexQuery {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn ddoc(mut self, ddoc: &str) -> Self {
        self.ddoc = Some(ddoc.to_string());
        self
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("index".into(), json!({ "fields": self.fields }));
        out.insert("type".into(), json!(self.index_type));
        if !self.name.is_empty() {
            out.insert("name".into(), json!(self.name));
        }
        if let Some(ddoc) = &self.ddoc {
            out.insert("ddoc".into(), json!(ddoc));
        }
        Value::Object(out)
    }
}
