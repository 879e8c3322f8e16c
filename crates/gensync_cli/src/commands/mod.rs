//! CLI command implementations.

pub mod inspect;
pub mod sync;
pub mod verify;

use ciborium::Value;
use gensync_engine::RELATIONS_FILE_NAME;
use gensync_storage::FileStore;
use std::path::Path;

/// Returns the relations store of `profile` inside `state`.
pub fn relations_store(state: &Path, profile: &str) -> FileStore {
    FileStore::in_dir(state, Some(profile), RELATIONS_FILE_NAME)
}

/// Relation record with ids and versions left undecoded.
pub type RawRecord = gensync_engine::RelationRecord<Value, Value, Value, Value>;

/// Renders an id or version for display.
pub fn render(value: &Value) -> String {
    match value {
        Value::Text(text) => text.clone(),
        Value::Integer(n) => i128::from(*n).to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bytes(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Value::Null => "null".into(),
        other => format!("{other:?}"),
    }
}
