//! Read-only query façade: listing, search, graph views, and raw SQL
//! passthrough. Nothing here mutates state.

use crate::error::Result;
use crate::schema::SchemaBackend;
use crate::store;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use std::collections::HashMap;

/// All node names, optionally filtered to one type, sorted.
pub fn ls(conn: &Connection, ty: Option<&str>) -> Result<Vec<String>> {
    let mut names = match ty {
        Some(ty) => {
            let mut stmt = conn.prepare("SELECT name FROM nodes WHERE type = ?")?;
            let rows = stmt.query_map([ty], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT name FROM nodes")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        }
    };
    names.sort();
    Ok(names)
}

/// Names matching `name_regex`, optionally restricted to `type_filter`.
pub fn find(conn: &Connection, name_regex: &str, type_filter: Option<&str>) -> Result<Vec<String>> {
    let re = Regex::new(name_regex).map_err(|e| {
        crate::error::Error::Invalid(vec![format!("invalid regex '{}': {}", name_regex, e)])
    })?;
    Ok(ls(conn, type_filter)?
        .into_iter()
        .filter(|n| re.is_match(n))
        .collect())
}

/// Names whose content matches `pattern`. `content_bool` selects whether
/// the raw stored content (frontmatter included) is searched, or only
/// the body text.
pub fn grep(
    conn: &Connection,
    backend: &dyn SchemaBackend,
    pattern: &str,
    content_bool: bool,
) -> Result<Vec<String>> {
    let re = Regex::new(pattern).map_err(|e| {
        crate::error::Error::Invalid(vec![format!("invalid regex '{}': {}", pattern, e)])
    })?;
    let mut out = Vec::new();
    for name in ls(conn, None)? {
        let haystack = if content_bool {
            store::cat(conn, backend, &name)?
        } else {
            store::body(conn, backend, &name)?
        };
        if re.is_match(&haystack) {
            out.push(name);
        }
    }
    Ok(out)
}

/// `tag -> node names` across the whole graph.
pub fn tags(conn: &Connection, backend: &dyn SchemaBackend) -> Result<HashMap<String, Vec<String>>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for name in ls(conn, None)? {
        for tag in node_tags(conn, backend, &name)? {
            out.entry(tag).or_default().push(name.clone());
        }
    }
    Ok(out)
}

/// A single node's tags.
pub fn node_tags(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<Vec<String>> {
    let metadata = store::frontmatter_of(conn, backend, name)?;
    Ok(metadata
        .get("tags")
        .map(|v| v.as_list().into_iter().map(|s| s.to_string()).collect())
        .unwrap_or_default())
}

/// `type -> ordered field list`.
pub fn schema(conn: &Connection, backend: &dyn SchemaBackend) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT name FROM types")?;
    let types: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;
    let mut out = HashMap::new();
    for ty in types {
        let fields = backend.fields(conn, &ty)?;
        out.insert(ty, fields);
    }
    Ok(out)
}

/// `type -> node names`, each list sorted.
pub fn tree(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare("SELECT name, type FROM nodes")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for r in rows {
        let (name, ty) = r?;
        out.entry(ty).or_default().push(name);
    }
    for names in out.values_mut() {
        names.sort();
    }
    Ok(out)
}

/// Raw SQL passthrough. Rows come back as dynamically typed values; the
/// caller owns interpreting columns.
pub fn query(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Vec<Value>>> {
    let mut stmt = conn.prepare(sql)?;
    let col_count = stmt.column_count();
    let rows = stmt.query_map(params, |row| {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(row.get::<_, Value>(i)?);
        }
        Ok(values)
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PerTypeBackend;

    fn setup() -> (Connection, PerTypeBackend) {
        let conn = Connection::open_in_memory().unwrap();
        store::ensure_tables(&conn).unwrap();
        crate::links::ensure_table(&conn).unwrap();
        (conn, PerTypeBackend::new())
    }

    #[test]
    fn ls_filters_by_type_and_sorts() {
        let (conn, backend) = setup();
        store::write(&conn, &backend, "b", "---\ntype: concept\n---\n").unwrap();
        store::write(&conn, &backend, "a", "---\ntype: concept\n---\n").unwrap();
        store::write(&conn, &backend, "x", "---\ntype: other\n---\n").unwrap();
        assert_eq!(ls(&conn, Some("concept")).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn tags_index_groups_by_tag() {
        let (conn, backend) = setup();
        store::write(
            &conn,
            &backend,
            "n1",
            "---\ntype: t\ntags: [x, y]\n---\n",
        )
        .unwrap();
        store::write(&conn, &backend, "n2", "---\ntype: t\ntags: [x]\n---\n").unwrap();
        let idx = tags(&conn, &backend).unwrap();
        let mut xs = idx.get("x").unwrap().clone();
        xs.sort();
        assert_eq!(xs, vec!["n1", "n2"]);
    }

    #[test]
    fn schema_reports_fields_per_type() {
        let (conn, backend) = setup();
        store::write(
            &conn,
            &backend,
            "sa",
            "---\ntype: concept\ndescription: d\n---\nBody.",
        )
        .unwrap();
        let s = schema(&conn, &backend).unwrap();
        assert!(s.get("concept").unwrap().contains(&"description".to_string()));
    }
}
