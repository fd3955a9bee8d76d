//! Node lifecycle: the `nodes(name, type)` index plus the typed row
//! delegated to the schema registry, and the derived read views.
//!
//! `_content` always holds the exact raw string passed to `write`;
//! frontmatter/body views are obtained by re-parsing it, never by
//! reconstructing from the typed (sanitized-key) metadata columns, so a
//! caller always gets back byte-identical content and original key
//! casing.

use crate::error::{Error, Result};
use crate::frontmatter::{self, ParsedDocument};
use crate::links;
use crate::schema::SchemaBackend;
use crate::value::Metadata;
use crate::wikilink;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{HashSet, VecDeque};

pub struct WriteOutcome {
    pub node_type: String,
    pub prior_type: Option<String>,
}

pub struct NodeInfo {
    pub name: String,
    pub node_type: String,
    pub metadata: Metadata,
    pub body: String,
    pub content: String,
}

pub fn ensure_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS nodes (name TEXT PRIMARY KEY, type TEXT NOT NULL)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS types (name TEXT PRIMARY KEY)",
        [],
    )?;
    Ok(())
}

pub fn node_type(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT type FROM nodes WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?)
}

pub fn exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(node_type(conn, name)?.is_some())
}

pub fn register_type(conn: &Connection, ty: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO types (name) VALUES (?)",
        [ty],
    )?;
    Ok(())
}

fn upsert_index(conn: &Connection, name: &str, ty: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO nodes (name, type) VALUES (?, ?) \
         ON CONFLICT(name) DO UPDATE SET type = excluded.type",
        params![name, ty],
    )?;
    Ok(())
}

/// Parse, widen, upsert the typed row, sync outgoing edges, and update
/// the node index. Returns the resolved type and, if the node already
/// existed under a different type, that prior type.
pub fn write(
    conn: &Connection,
    backend: &dyn SchemaBackend,
    name: &str,
    content: &str,
) -> Result<WriteOutcome> {
    let ParsedDocument {
        metadata,
        body,
        node_type: new_ty,
    } = frontmatter::parse(content);

    let prior_type = node_type(conn, name)?;
    match &prior_type {
        Some(old_ty) if old_ty != &new_ty => {
            backend.change_type(conn, name, old_ty, &new_ty, content, &metadata)?;
        }
        _ => {
            backend.upsert(conn, name, &new_ty, content, &metadata)?;
        }
    }

    upsert_index(conn, name, &new_ty)?;
    register_type(conn, &new_ty)?;
    links::replace_outgoing(conn, name, &wikilink::extract(&body))?;

    Ok(WriteOutcome {
        node_type: new_ty,
        prior_type,
    })
}

/// `write` only if `name` is absent. Returns whether a write happened.
pub fn touch(
    conn: &Connection,
    backend: &dyn SchemaBackend,
    name: &str,
    content: &str,
) -> Result<bool> {
    if exists(conn, name)? {
        return Ok(false);
    }
    write(conn, backend, name, content)?;
    Ok(true)
}

/// Delete the typed row, node index entry, and outgoing edges. Backlinks
/// pointing at `name` remain, now unresolved. Returns the node's last
/// known type.
pub fn rm(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<String> {
    let ty = node_type(conn, name)?.ok_or_else(|| Error::NotFound(name.to_string()))?;
    backend.delete(conn, name, &ty)?;
    conn.execute("DELETE FROM nodes WHERE name = ?", [name])?;
    links::replace_outgoing(conn, name, &[])?;
    Ok(ty)
}

/// Atomic rename: `old` must exist, `new` must not. Returns the node's
/// type.
pub fn mv(conn: &Connection, backend: &dyn SchemaBackend, old: &str, new: &str) -> Result<String> {
    let ty = node_type(conn, old)?.ok_or_else(|| Error::NotFound(old.to_string()))?;
    if exists(conn, new)? {
        return Err(Error::Exists(new.to_string()));
    }
    let (content, metadata) = backend
        .read(conn, old, &ty)?
        .ok_or_else(|| Error::NotFound(old.to_string()))?;

    backend.delete(conn, old, &ty)?;
    backend.upsert(conn, new, &ty, &content, &metadata)?;
    conn.execute("DELETE FROM nodes WHERE name = ?", [old])?;
    upsert_index(conn, new, &ty)?;
    links::rename_source(conn, old, new)?;
    Ok(ty)
}

/// Deep copy of row, metadata, body, and outgoing edges. `dst` must not
/// already exist.
pub fn cp(conn: &Connection, backend: &dyn SchemaBackend, src: &str, dst: &str) -> Result<String> {
    let ty = node_type(conn, src)?.ok_or_else(|| Error::NotFound(src.to_string()))?;
    if exists(conn, dst)? {
        return Err(Error::Exists(dst.to_string()));
    }
    let (content, metadata) = backend
        .read(conn, src, &ty)?
        .ok_or_else(|| Error::NotFound(src.to_string()))?;

    backend.upsert(conn, dst, &ty, &content, &metadata)?;
    upsert_index(conn, dst, &ty)?;
    let outgoing = links::raw_outgoing(conn, src)?;
    links::replace_outgoing(conn, dst, &outgoing)?;
    Ok(ty)
}

/// The exact raw string most recently written for `name`.
pub fn cat(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<String> {
    let ty = node_type(conn, name)?.ok_or_else(|| Error::NotFound(name.to_string()))?;
    let (content, _) = backend
        .read(conn, name, &ty)?
        .ok_or_else(|| Error::NotFound(name.to_string()))?;
    Ok(content)
}

pub fn body(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<String> {
    let content = cat(conn, backend, name)?;
    Ok(frontmatter::parse(&content).body)
}

pub fn frontmatter_of(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<Metadata> {
    let content = cat(conn, backend, name)?;
    Ok(frontmatter::parse(&content).metadata)
}

pub fn info(conn: &Connection, backend: &dyn SchemaBackend, name: &str) -> Result<NodeInfo> {
    let content = cat(conn, backend, name)?;
    let parsed = frontmatter::parse(&content);
    Ok(NodeInfo {
        name: name.to_string(),
        node_type: parsed.node_type,
        metadata: parsed.metadata,
        body: parsed.body,
        content,
    })
}

/// Breadth-first expansion from `name` through resolved outgoing edges,
/// up to `depth` hops. Visited names are suppressed so cycles and
/// diamond joins each appear once, in discovery order.
pub fn read(
    conn: &Connection,
    backend: &dyn SchemaBackend,
    name: &str,
    depth: usize,
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    if !exists(conn, name)? {
        return Err(Error::NotFound(name.to_string()));
    }

    queue.push_back((name.to_string(), 0));
    visited.insert(name.to_string());

    while let Some((current, d)) = queue.pop_front() {
        let content = cat(conn, backend, &current)?;
        out.push((current.clone(), content));
        if d >= depth {
            continue;
        }
        for target in links::wikilinks(conn, &current)? {
            if visited.insert(target.clone()) {
                queue.push_back((target, d + 1));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PerTypeBackend;

    fn setup() -> (Connection, PerTypeBackend) {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tables(&conn).unwrap();
        links::ensure_table(&conn).unwrap();
        (conn, PerTypeBackend::new())
    }

    #[test]
    fn write_round_trips_content() {
        let (conn, backend) = setup();
        let content = "---\ntype: concept\ndescription: d\n---\nLinks [[at]].";
        write(&conn, &backend, "sa", content).unwrap();
        assert_eq!(cat(&conn, &backend, "sa").unwrap(), content);
    }

    #[test]
    fn touch_is_idempotent() {
        let (conn, backend) = setup();
        assert!(touch(&conn, &backend, "n", "first").unwrap());
        assert!(!touch(&conn, &backend, "n", "second").unwrap());
        assert_eq!(cat(&conn, &backend, "n").unwrap(), "first");
    }

    #[test]
    fn rm_clears_outgoing_but_leaves_backlinks_unresolved() {
        let (conn, backend) = setup();
        write(&conn, &backend, "sa", "---\ntype: concept\n---\n[[at]]").unwrap();
        write(&conn, &backend, "at", "---\ntype: concept\n---\nBody.").unwrap();
        rm(&conn, &backend, "at").unwrap();
        assert!(links::wikilinks(&conn, "sa").unwrap().is_empty());
        assert!(links::backlinks(&conn, "at").unwrap().is_empty());
    }

    #[test]
    fn mv_preserves_content_and_backlinks() {
        let (conn, backend) = setup();
        write(&conn, &backend, "sa", "---\ntype: concept\n---\n[[at]]").unwrap();
        write(&conn, &backend, "at", "---\ntype: concept\n---\nBody.").unwrap();
        mv(&conn, &backend, "sa", "sa2").unwrap();
        assert_eq!(links::backlinks(&conn, "at").unwrap(), vec!["sa2"]);
        assert!(exists(&conn, "sa").unwrap() == false);
    }

    #[test]
    fn mv_rejects_existing_destination() {
        let (conn, backend) = setup();
        write(&conn, &backend, "a", "content a").unwrap();
        write(&conn, &backend, "b", "content b").unwrap();
        assert!(matches!(mv(&conn, &backend, "a", "b"), Err(Error::Exists(_))));
    }

    #[test]
    fn read_bfs_respects_depth_and_dedups() {
        let (conn, backend) = setup();
        write(&conn, &backend, "a", "---\ntype: t\n---\n[[b]]").unwrap();
        write(&conn, &backend, "b", "---\ntype: t\n---\n[[c]] [[a]]").unwrap();
        write(&conn, &backend, "c", "---\ntype: t\n---\nleaf").unwrap();

        let depth1 = read(&conn, &backend, "a", 1).unwrap();
        let names: Vec<&str> = depth1.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let depth2 = read(&conn, &backend, "a", 2).unwrap();
        let names: Vec<&str> = depth2.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
