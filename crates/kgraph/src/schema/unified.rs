//! Unified-table storage layout: every node lives in a single `_data`
//! table regardless of type, with a side table `_type_fields` recording
//! which columns belong to which type, in first-appearance order.

use super::{metadata_keys, quote_ident, sanitized_map, table_exists, SchemaBackend};
use crate::error::{Error, Layout, Result};
use crate::value::{sanitize_field_name, FieldValue, Metadata};
use rusqlite::{Connection, OptionalExtension, ToSql};
use std::collections::HashMap;

const DATA_TABLE: &str = "_data";
const FIELDS_TABLE: &str = "_type_fields";

pub struct UnifiedBackend;

impl UnifiedBackend {
    pub fn new() -> Self {
        UnifiedBackend
    }

    fn ensure_tables(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, type TEXT NOT NULL, _content TEXT)",
                quote_ident(DATA_TABLE)
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (type TEXT NOT NULL, field TEXT NOT NULL, ord INTEGER NOT NULL, PRIMARY KEY (type, field))",
                quote_ident(FIELDS_TABLE)
            ),
            [],
        )?;
        Ok(())
    }

    fn data_columns(&self, conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(DATA_TABLE)))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            out.push(name);
        }
        Ok(out)
    }

    fn next_ord(&self, conn: &Connection, ty: &str) -> Result<i64> {
        let max: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT MAX(ord) FROM {} WHERE type = ?",
                    quote_ident(FIELDS_TABLE)
                ),
                [ty],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }
}

impl Default for UnifiedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBackend for UnifiedBackend {
    fn layout(&self) -> Layout {
        Layout::Unified
    }

    fn fields(&self, conn: &Connection, ty: &str) -> Result<Vec<String>> {
        if !table_exists(conn, FIELDS_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT field FROM {} WHERE type = ? ORDER BY ord",
            quote_ident(FIELDS_TABLE)
        ))?;
        let rows = stmt.query_map([ty], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn widen(&self, conn: &Connection, ty: &str, keys: &[String]) -> Result<Vec<String>> {
        self.ensure_tables(conn)?;
        let existing = self.fields(conn, ty)?;
        let mut added = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut ord = self.next_ord(conn, ty)?;
        for key in keys {
            if key == "type" {
                continue;
            }
            let col = sanitize_field_name(key);
            if let Some(prior) = seen.get(&col) {
                if prior != key {
                    return Err(Error::SchemaConflict {
                        ty: ty.to_string(),
                        detail: format!(
                            "keys '{}' and '{}' both sanitize to column '{}'",
                            prior, key, col
                        ),
                    });
                }
                continue;
            }
            seen.insert(col.clone(), key.clone());
            if existing.contains(&col) {
                continue;
            }
            let data_cols = self.data_columns(conn)?;
            if !data_cols.contains(&col) {
                conn.execute(
                    &format!(
                        "ALTER TABLE {} ADD COLUMN {} TEXT",
                        quote_ident(DATA_TABLE),
                        quote_ident(&col)
                    ),
                    [],
                )?;
            }
            conn.execute(
                &format!(
                    "INSERT INTO {} (type, field, ord) VALUES (?, ?, ?)",
                    quote_ident(FIELDS_TABLE)
                ),
                rusqlite::params![ty, col, ord],
            )?;
            ord += 1;
            added.push(col);
        }
        Ok(added)
    }

    fn set_fields(&self, conn: &Connection, ty: &str, fields: &[String]) -> Result<()> {
        self.ensure_tables(conn)?;
        let keep: Vec<String> = fields.iter().map(|f| sanitize_field_name(f)).collect();
        let existing = self.fields(conn, ty)?;
        for col in &existing {
            if !keep.contains(col) {
                conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE type = ? AND field = ?",
                        quote_ident(FIELDS_TABLE)
                    ),
                    rusqlite::params![ty, col],
                )?;
                conn.execute(
                    &format!(
                        "UPDATE {} SET {} = NULL WHERE type = ?",
                        quote_ident(DATA_TABLE),
                        quote_ident(col)
                    ),
                    [ty],
                )?;
            }
        }
        let to_add: Vec<String> = keep.iter().filter(|c| !existing.contains(c)).cloned().collect();
        self.widen(conn, ty, &to_add)?;
        Ok(())
    }

    fn upsert(
        &self,
        conn: &Connection,
        name: &str,
        ty: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        self.ensure_tables(conn)?;
        let keys = metadata_keys(metadata);
        self.widen(conn, ty, &keys)?;
        let colmap = sanitized_map(ty, metadata)?;
        let ty_fields = self.fields(conn, ty)?;

        let mut col_names = vec!["name".to_string(), "type".to_string(), "_content".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![
            Box::new(name.to_string()),
            Box::new(ty.to_string()),
            Box::new(content.to_string()),
        ];
        for f in &ty_fields {
            col_names.push(f.clone());
            params.push(Box::new(colmap.get(f).cloned()));
        }

        let quoted_cols: Vec<String> = col_names.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<&str> = col_names.iter().map(|_| "?").collect();
        let update_set: Vec<String> = col_names
            .iter()
            .filter(|c| c.as_str() != "name")
            .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
            .collect();

        let sql = format!(
            "INSERT INTO {tbl} ({cols}) VALUES ({ph}) ON CONFLICT(name) DO UPDATE SET {upd}",
            tbl = quote_ident(DATA_TABLE),
            cols = quoted_cols.join(", "),
            ph = placeholders.join(", "),
            upd = update_set.join(", "),
        );
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, param_refs.as_slice())?;
        Ok(())
    }

    fn change_type(
        &self,
        conn: &Connection,
        name: &str,
        _old_ty: &str,
        new_ty: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        // Fields belonging only to the old type are left stale in the row
        // until overwritten; they are never read back since `read` only
        // projects the new type's field list.
        self.upsert(conn, name, new_ty, content, metadata)
    }

    fn read(&self, conn: &Connection, name: &str, ty: &str) -> Result<Option<(String, Metadata)>> {
        if !table_exists(conn, DATA_TABLE)? {
            return Ok(None);
        }
        let fields = self.fields(conn, ty)?;
        let mut select_cols = vec!["_content".to_string()];
        select_cols.extend(fields.iter().cloned());
        let quoted: Vec<String> = select_cols.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE name = ? AND type = ?",
            quoted.join(", "),
            quote_ident(DATA_TABLE)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params![name, ty])?;
        if let Some(row) = rows.next()? {
            let content: String = row.get(0)?;
            let mut metadata = Metadata::new();
            for (i, f) in fields.iter().enumerate() {
                let v: Option<String> = row.get(i + 1)?;
                if let Some(v) = v {
                    metadata.insert(f.clone(), FieldValue::decode(&v));
                }
            }
            Ok(Some((content, metadata)))
        } else {
            Ok(None)
        }
    }

    fn delete(&self, conn: &Connection, name: &str, ty: &str) -> Result<()> {
        if table_exists(conn, DATA_TABLE)? {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE name = ? AND type = ?",
                    quote_ident(DATA_TABLE)
                ),
                rusqlite::params![name, ty],
            )?;
        }
        Ok(())
    }

    fn drop_type(&self, conn: &Connection, ty: &str) -> Result<()> {
        if table_exists(conn, DATA_TABLE)? {
            conn.execute(
                &format!("DELETE FROM {} WHERE type = ?", quote_ident(DATA_TABLE)),
                [ty],
            )?;
        }
        if table_exists(conn, FIELDS_TABLE)? {
            conn.execute(
                &format!("DELETE FROM {} WHERE type = ?", quote_ident(FIELDS_TABLE)),
                [ty],
            )?;
        }
        Ok(())
    }

    fn rename_type(&self, conn: &Connection, old: &str, new: &str) -> Result<()> {
        if table_exists(conn, DATA_TABLE)? {
            conn.execute(
                &format!(
                    "UPDATE {} SET type = ? WHERE type = ?",
                    quote_ident(DATA_TABLE)
                ),
                rusqlite::params![new, old],
            )?;
        }
        if table_exists(conn, FIELDS_TABLE)? {
            conn.execute(
                &format!(
                    "UPDATE {} SET type = ? WHERE type = ?",
                    quote_ident(FIELDS_TABLE)
                ),
                rusqlite::params![new, old],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn separate_types_share_table_but_not_field_lists() {
        let c = conn();
        let backend = UnifiedBackend::new();
        let mut m1 = Metadata::new();
        m1.insert("description", FieldValue::Scalar("concept a".into()));
        backend.upsert(&c, "n1", "concept", "c1", &m1).unwrap();

        let mut m2 = Metadata::new();
        m2.insert("due", FieldValue::Scalar("2026-01-01".into()));
        backend.upsert(&c, "n2", "task", "c2", &m2).unwrap();

        assert_eq!(backend.fields(&c, "concept").unwrap(), vec!["description"]);
        assert_eq!(backend.fields(&c, "task").unwrap(), vec!["due"]);

        let (_, meta) = backend.read(&c, "n1", "concept").unwrap().unwrap();
        assert!(meta.get("due").is_none());
    }

    #[test]
    fn rename_type_moves_rows_and_field_registrations() {
        let c = conn();
        let backend = UnifiedBackend::new();
        let mut meta = Metadata::new();
        meta.insert("a", FieldValue::Scalar("1".into()));
        backend.upsert(&c, "n", "old", "c", &meta).unwrap();
        backend.rename_type(&c, "old", "new").unwrap();
        assert!(backend.read(&c, "n", "old").unwrap().is_none());
        assert!(backend.read(&c, "n", "new").unwrap().is_some());
        assert_eq!(backend.fields(&c, "new").unwrap(), vec!["a"]);
    }

    #[test]
    fn drop_type_removes_rows_and_field_registrations() {
        let c = conn();
        let backend = UnifiedBackend::new();
        let mut meta = Metadata::new();
        meta.insert("a", FieldValue::Scalar("1".into()));
        backend.upsert(&c, "n", "t", "c", &meta).unwrap();
        backend.drop_type(&c, "t").unwrap();
        assert!(backend.read(&c, "n", "t").unwrap().is_none());
        assert!(backend.fields(&c, "t").unwrap().is_empty());
    }
}
