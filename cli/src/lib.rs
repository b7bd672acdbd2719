//! Dump databases to JSON files and restore them.
//!
//! A dump of `mydb` is written to `<dir>/mydb.json` as
//! `{"mydb": [doc, ...]}` with `_rev` stripped, so a restore creates fresh
//! first revisions instead of conflicting with the old ones.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use couch_core::{Client, GetOptions};
use serde_json::{Map, Value};
use tracing::info;

pub fn dump_path(dir: &Path, db_name: &str) -> PathBuf {
    dir.join(format!("{db_name}.json"))
}

/// Write every document of `db_name` to its dump file. Returns the path.
pub fn dump(client: &Client, db_name: &str, dir: &Path) -> Result<PathBuf> {
    let db = client.get_db(db_name).with_context(|| format!("open database {db_name}"))?;
    let mut docs = Vec::new();
    for id in &db {
        let id = id?;
        let mut doc = db.get(&id, &GetOptions::default())?;
        if let Some(fields) = doc.as_object_mut() {
            fields.shift_remove("_rev");
        }
        docs.push(doc);
    }

    let path = dump_path(dir, db_name);
    info!(db = %db_name, docs = docs.len(), path = %path.display(), "dumping database");
    let mut data = Map::new();
    data.insert(db_name.to_string(), Value::Array(docs));
    let text = serde_json::to_string_pretty(&Value::Object(data))?;
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

/// Recreate `db_name` from its dump file, dropping the existing database
/// first. Returns the number of documents inserted.
pub fn restore(client: &Client, db_name: &str, dir: &Path) -> Result<usize> {
    let path = dump_path(dir, db_name);
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let mut data: Value =
        serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    let docs = match data.get_mut(db_name).map(Value::take) {
        Some(Value::Array(docs)) => docs,
        _ => return Err(anyhow!("{} has no document list under {db_name:?}", path.display())),
    };

    if client.contains(db_name) {
        client.delete(db_name)?;
    }
    client.create(db_name)?;
    let db = client.get_db(db_name)?;
    info!(db = %db_name, docs = docs.len(), "restoring database");
    for doc in &docs {
        db.add(doc)?;
    }
    Ok(docs.len())
}
