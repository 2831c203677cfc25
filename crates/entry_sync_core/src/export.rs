//! JSON export of entry snapshots.
//!
//! # Responsibility
//! - Render a scope's entries as one pretty-printed, key-sorted JSON document.
//! - Write the document atomically so readers never see a partial export.
//!
//! # Invariants
//! - Entries are emitted oldest `created_at` first.
//! - Payloads that parse as JSON are embedded as JSON values; anything else is
//!   carried as standard base64 under `payload_base64`.

use crate::clock::{Clock, SystemClock};
use crate::model::entry::Entry;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::info;
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to write export: {err}"),
            Self::Serialize(err) => write!(f, "failed to serialize export: {err}"),
        }
    }
}

impl Error for ExportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialize(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialize(value)
    }
}

/// Builds the export document for `entries`.
pub fn export_document(entries: &[Entry], generated_at: i64) -> Value {
    let mut ordered: Vec<&Entry> = entries.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    json!({
        "generated_at": generated_at,
        "entry_count": ordered.len(),
        "entries": ordered.into_iter().map(entry_value).collect::<Vec<_>>(),
    })
}

/// Writes `entries` to `path` as pretty JSON. Returns the number exported.
pub fn export_entries_json(entries: &[Entry], path: impl AsRef<Path>) -> Result<usize, ExportError> {
    let path = path.as_ref();
    let document = export_document(entries, SystemClock.now_ms());
    let mut body = serde_json::to_vec_pretty(&document)?;
    body.push(b'\n');

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("export");
    let staging = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
    std::fs::write(&staging, &body)?;
    if let Err(err) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(err.into());
    }

    info!(
        "event=entry_export module=export status=ok entries={} bytes={}",
        entries.len(),
        body.len()
    );
    Ok(entries.len())
}

fn entry_value(entry: &Entry) -> Value {
    let mut object = Map::new();
    object.insert("id".to_string(), json!(entry.id.to_string()));
    object.insert(
        "owner_scope".to_string(),
        json!(entry.owner_scope.as_ref().map(|scope| scope.as_str())),
    );
    object.insert("created_at".to_string(), json!(entry.created_at));
    object.insert("updated_at".to_string(), json!(entry.updated_at));
    match serde_json::from_slice::<Value>(&entry.payload) {
        Ok(payload) => {
            object.insert("payload".to_string(), payload);
        }
        Err(_) => {
            object.insert(
                "payload_base64".to_string(),
                json!(BASE64.encode(&entry.payload)),
            );
        }
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::{export_document, export_entries_json};
    use crate::model::entry::{Entry, ScopeId};

    #[test]
    fn json_payloads_are_embedded_and_others_base64() {
        let scope = ScopeId::new("user-a");
        let json_entry = Entry::new(br#"{"severity":3}"#.to_vec(), 20).in_scope(&scope);
        let binary_entry = Entry::new(vec![0xff, 0x00], 10).in_scope(&scope);

        let document = export_document(&[json_entry, binary_entry], 99);
        assert_eq!(document["generated_at"], 99);
        assert_eq!(document["entry_count"], 2);

        let entries = document["entries"].as_array().expect("entries array");
        assert_eq!(entries[0]["payload_base64"], "/wA=");
        assert!(entries[0].get("payload").is_none());
        assert_eq!(entries[1]["payload"]["severity"], 3);
        assert_eq!(entries[1]["owner_scope"], "user-a");
    }

    #[test]
    fn export_writes_pretty_sorted_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("entries.json");
        let entries = vec![Entry::new(br#"{"b":1,"a":2}"#.to_vec(), 5)];

        let written = export_entries_json(&entries, &path).expect("export should succeed");
        assert_eq!(written, 1);

        let raw = std::fs::read_to_string(&path).expect("export file should exist");
        assert!(raw.contains('\n'));
        let first_key = raw.find("\"entries\"").expect("entries key");
        let count_key = raw.find("\"entry_count\"").expect("count key");
        let generated_key = raw.find("\"generated_at\"").expect("generated key");
        assert!(first_key < count_key && count_key < generated_key);
        assert!(raw.find("\"a\"").expect("a") < raw.find("\"b\"").expect("b"));

        let leftovers = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|item| item.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
