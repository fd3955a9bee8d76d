//! Per-type-table storage layout: one physical table per registered
//! type, named after the type, with `(name, _content, ...fields)`.

use super::{metadata_keys, quote_ident, sanitized_map, table_exists, SchemaBackend};
use crate::error::{Error, Layout, Result};
use crate::value::{sanitize_field_name, FieldValue, Metadata};
use rusqlite::{Connection, ToSql};
use std::collections::HashMap;

pub struct PerTypeBackend;

impl PerTypeBackend {
    pub fn new() -> Self {
        PerTypeBackend
    }

    fn ensure_table(&self, conn: &Connection, ty: &str) -> Result<()> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, _content TEXT)",
                quote_ident(ty)
            ),
            [],
        )?;
        Ok(())
    }
}

impl Default for PerTypeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaBackend for PerTypeBackend {
    fn layout(&self) -> Layout {
        Layout::PerType
    }

    fn fields(&self, conn: &Connection, ty: &str) -> Result<Vec<String>> {
        if !table_exists(conn, ty)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(ty)))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name != "name" && name != "_content" {
                out.push(name);
            }
        }
        Ok(out)
    }

    fn widen(&self, conn: &Connection, ty: &str, keys: &[String]) -> Result<Vec<String>> {
        self.ensure_table(conn, ty)?;
        let existing = self.fields(conn, ty)?;
        let mut added = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
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
            if existing.contains(&col) || added.contains(&col) {
                continue;
            }
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN {} TEXT",
                    quote_ident(ty),
                    quote_ident(&col)
                ),
                [],
            )?;
            added.push(col);
        }
        Ok(added)
    }

    fn set_fields(&self, conn: &Connection, ty: &str, fields: &[String]) -> Result<()> {
        self.ensure_table(conn, ty)?;
        let keep: Vec<String> = fields.iter().map(|f| sanitize_field_name(f)).collect();
        for col in self.fields(conn, ty)? {
            if !keep.contains(&col) {
                conn.execute(
                    &format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        quote_ident(ty),
                        quote_ident(&col)
                    ),
                    [],
                )?;
            }
        }
        let existing = self.fields(conn, ty)?;
        for col in &keep {
            if !existing.contains(col) {
                conn.execute(
                    &format!(
                        "ALTER TABLE {} ADD COLUMN {} TEXT",
                        quote_ident(ty),
                        quote_ident(col)
                    ),
                    [],
                )?;
            }
        }
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
        let keys = metadata_keys(metadata);
        self.widen(conn, ty, &keys)?;
        let colmap = sanitized_map(ty, metadata)?;
        let all_fields = self.fields(conn, ty)?;

        let mut col_names = vec!["name".to_string(), "_content".to_string()];
        let mut params: Vec<Box<dyn ToSql>> =
            vec![Box::new(name.to_string()), Box::new(content.to_string())];
        for f in &all_fields {
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
            tbl = quote_ident(ty),
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
        old_ty: &str,
        new_ty: &str,
        content: &str,
        metadata: &Metadata,
    ) -> Result<()> {
        self.delete(conn, name, old_ty)?;
        self.upsert(conn, name, new_ty, content, metadata)
    }

    fn read(&self, conn: &Connection, name: &str, ty: &str) -> Result<Option<(String, Metadata)>> {
        if !table_exists(conn, ty)? {
            return Ok(None);
        }
        let fields = self.fields(conn, ty)?;
        let mut select_cols = vec!["_content".to_string()];
        select_cols.extend(fields.iter().cloned());
        let quoted: Vec<String> = select_cols.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE name = ?",
            quoted.join(", "),
            quote_ident(ty)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([name])?;
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
        if table_exists(conn, ty)? {
            conn.execute(
                &format!("DELETE FROM {} WHERE name = ?", quote_ident(ty)),
                [name],
            )?;
        }
        Ok(())
    }

    fn drop_type(&self, conn: &Connection, ty: &str) -> Result<()> {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(ty)), [])?;
        Ok(())
    }

    fn rename_type(&self, conn: &Connection, old: &str, new: &str) -> Result<()> {
        if table_exists(conn, old)? {
            conn.execute(
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(old),
                    quote_ident(new)
                ),
                [],
            )?;
        }
        Ok(())
    }
}
