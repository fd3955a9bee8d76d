//! Forward/reverse edges between node names, derived from wikilinks.
//!
//! Edges are stored unresolved (the raw token). Resolution against the
//! current node set happens at query time so a node created after its
//! first incoming link still resolves correctly.

use crate::error::Result;
use crate::resolver;
use rusqlite::{params, Connection};
use std::collections::HashMap;

pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS edges (source TEXT NOT NULL, target TEXT NOT NULL)",
        [],
    )?;
    Ok(())
}

fn all_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM nodes")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Full replacement of `source`'s outgoing edges with `targets`, in order.
pub fn replace_outgoing(conn: &Connection, source: &str, targets: &[String]) -> Result<()> {
    conn.execute("DELETE FROM edges WHERE source = ?", [source])?;
    for target in targets {
        conn.execute(
            "INSERT INTO edges (source, target) VALUES (?, ?)",
            params![source, target],
        )?;
    }
    Ok(())
}

pub fn rename_source(conn: &Connection, old: &str, new: &str) -> Result<()> {
    conn.execute("UPDATE edges SET source = ? WHERE source = ?", [new, old])?;
    Ok(())
}

/// Raw outgoing tokens for `source`, in insertion order, including
/// unresolved ones.
pub fn raw_outgoing(conn: &Connection, source: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT target FROM edges WHERE source = ? ORDER BY rowid")?;
    let rows = stmt.query_map([source], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Resolved outgoing targets for `source`, in source order, unresolved
/// tokens filtered out.
pub fn wikilinks(conn: &Connection, source: &str) -> Result<Vec<String>> {
    let raw = raw_outgoing(conn, source)?;
    let names = all_names(conn)?;
    let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    Ok(raw
        .iter()
        .filter_map(|t| resolver::resolve(t, refs.iter().copied()))
        .collect())
}

/// Sources whose resolved outgoing edges include `target`.
pub fn backlinks(conn: &Connection, target: &str) -> Result<Vec<String>> {
    let names = all_names(conn)?;
    let mut out = Vec::new();
    for name in &names {
        if wikilinks(conn, name)?.iter().any(|t| t == target) {
            out.push(name.clone());
        }
    }
    Ok(out)
}

/// Full resolved adjacency, `source -> resolved targets`, unresolved
/// tokens skipped.
pub fn graph(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let names = all_names(conn)?;
    let mut out = HashMap::new();
    for name in &names {
        out.insert(name.clone(), wikilinks(conn, name)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute("CREATE TABLE nodes (name TEXT PRIMARY KEY, type TEXT)", [])
            .unwrap();
        ensure_table(&c).unwrap();
        c
    }

    fn add_node(conn: &Connection, name: &str) {
        conn.execute(
            "INSERT INTO nodes (name, type) VALUES (?, 'untyped')",
            [name],
        )
        .unwrap();
    }

    #[test]
    fn unresolved_target_is_filtered_until_created() {
        let c = conn();
        add_node(&c, "sa");
        replace_outgoing(&c, "sa", &["at".to_string()]).unwrap();
        assert!(wikilinks(&c, "sa").unwrap().is_empty());

        add_node(&c, "at");
        assert_eq!(wikilinks(&c, "sa").unwrap(), vec!["at"]);
        assert_eq!(backlinks(&c, "at").unwrap(), vec!["sa"]);
    }

    #[test]
    fn full_replace_drops_stale_edges() {
        let c = conn();
        add_node(&c, "sa");
        add_node(&c, "at");
        add_node(&c, "bt");
        replace_outgoing(&c, "sa", &["at".to_string()]).unwrap();
        replace_outgoing(&c, "sa", &["bt".to_string()]).unwrap();
        assert_eq!(wikilinks(&c, "sa").unwrap(), vec!["bt"]);
        assert!(backlinks(&c, "at").unwrap().is_empty());
    }

    #[test]
    fn rename_rewrites_source_and_preserves_backlinks() {
        let c = conn();
        add_node(&c, "sa");
        add_node(&c, "at");
        replace_outgoing(&c, "sa", &["at".to_string()]).unwrap();
        rename_source(&c, "sa", "sa2").unwrap();
        assert_eq!(backlinks(&c, "at").unwrap(), vec!["sa2"]);
    }
}
