//! The schema registry: tracks `type -> ordered field set` and
//! materializes it in one of two interchangeable SQL layouts.

mod per_type;
mod unified;

pub use per_type::PerTypeBackend;
pub use unified::UnifiedBackend;

use crate::error::{Error, Result};
use crate::value::{sanitize_field_name, Metadata};
use rusqlite::Connection;
use std::collections::HashMap;

/// Storage backend for the typed projection of node metadata. Implemented
/// once per storage layout (per-type tables, or a single unified table).
pub trait SchemaBackend {
    fn layout(&self) -> crate::error::Layout;

    /// Ordered field set currently registered for `ty`.
    fn fields(&self, conn: &Connection, ty: &str) -> Result<Vec<String>>;

    /// Widen `ty`'s field set to include `keys` (already-sanitized or
    /// raw; sanitization happens inside). Returns the sanitized names
    /// that were newly added.
    fn widen(&self, conn: &Connection, ty: &str, keys: &[String]) -> Result<Vec<String>>;

    /// Install exactly `fields` as `ty`'s field set, dropping anything
    /// else. Used by `freeze_schema`.
    fn set_fields(&self, conn: &Connection, ty: &str, fields: &[String]) -> Result<()>;

    /// Insert or replace the typed row for `name` under `ty`. Any field
    /// belonging to `ty` but absent from `metadata` is stored as NULL;
    /// a write always reflects the complete, current metadata.
    fn upsert(&self, conn: &Connection, name: &str, ty: &str, content: &str, metadata: &Metadata) -> Result<()>;

    /// Update an existing row's type in place, nulling fields that
    /// belonged only to the old type.
    fn change_type(
        &self,
        conn: &Connection,
        name: &str,
        old_ty: &str,
        new_ty: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Read back a node's raw content and metadata.
    fn read(&self, conn: &Connection, name: &str, ty: &str) -> Result<Option<(String, Metadata)>>;

    /// Remove the typed row for `name` under `ty`.
    fn delete(&self, conn: &Connection, name: &str, ty: &str) -> Result<()>;

    /// Drop all storage for `ty` (used by `remove_type`, after its nodes
    /// have been migrated elsewhere).
    fn drop_type(&self, conn: &Connection, ty: &str) -> Result<()>;

    /// Rename a registered type label in the typed storage layer.
    fn rename_type(&self, conn: &Connection, old: &str, new: &str) -> Result<()>;
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table],
            |row| row.get(0),
        )
        .ok();
    Ok(exists.is_some())
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Build a `sanitized field name -> encoded value` map from `metadata`,
/// skipping the reserved `type` key. Two distinct raw keys sanitizing to
/// the same column name is a schema conflict.
pub(crate) const RESERVED_COLUMNS: &[&str] = &["name", "_content", "type", "_rowid_"];

pub(crate) fn sanitized_map(ty: &str, metadata: &Metadata) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    let mut raw_of: HashMap<String, String> = HashMap::new();
    for (key, value) in metadata.iter() {
        if key == "type" {
            continue;
        }
        let col = sanitize_field_name(key);
        if RESERVED_COLUMNS.contains(&col.as_str()) {
            return Err(Error::SchemaConflict {
                ty: ty.to_string(),
                detail: format!("key '{}' sanitizes to reserved column '{}'", key, col),
            });
        }
        if let Some(prior_raw) = raw_of.get(&col) {
            if prior_raw != key {
                return Err(Error::SchemaConflict {
                    ty: ty.to_string(),
                    detail: format!(
                        "keys '{}' and '{}' both sanitize to column '{}'",
                        prior_raw, key, col
                    ),
                });
            }
        }
        raw_of.insert(col.clone(), key.to_string());
        out.insert(col, value.encode());
    }
    Ok(out)
}

/// Raw keys (excluding `type`) from `metadata`, in first-appearance order.
pub(crate) fn metadata_keys(metadata: &Metadata) -> Vec<String> {
    metadata
        .keys()
        .filter(|k| *k != "type")
        .map(|s| s.to_string())
        .collect()
}
