//! Push-by-delta and pull-by-scope replication against a second,
//! independently opened graph (typically backed by a different file).
//!
//! Scope is an opaque key/value map appended as extra columns on the
//! remote `nodes` table, a forward-compatible multi-tenant partitioning
//! hook per the design notes, not something the core otherwise interprets.

use crate::changelog::{self, Entry};
use crate::error::Result;
use crate::schema::SchemaBackend;
use crate::store;
use rusqlite::Connection;
use serde_json::Value as Json;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Local backend is needed to read content during the changelog-disabled
/// fallback; this takes the place of the skipped changelog replay.
fn full_scan_push(
    local: &Connection,
    local_backend: &dyn SchemaBackend,
    remote: &Connection,
    remote_backend: &dyn SchemaBackend,
    scope: &HashMap<String, String>,
) -> Result<()> {
    for name in crate::query::ls(local, None)? {
        let content = store::cat(local, local_backend, &name)?;
        store::write(remote, remote_backend, &name, &content)?;
        apply_scope(remote, &name, scope)?;
    }
    Ok(())
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn ensure_scope_columns(conn: &Connection, scope: &HashMap<String, String>) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(nodes)")?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<_>>()?;
    for key in scope.keys() {
        if !existing.contains(key) {
            conn.execute(
                &format!("ALTER TABLE nodes ADD COLUMN {} TEXT", quote_ident(key)),
                [],
            )?;
        }
    }
    Ok(())
}

fn apply_scope(conn: &Connection, name: &str, scope: &HashMap<String, String>) -> Result<()> {
    for (key, value) in scope {
        conn.execute(
            &format!(
                "UPDATE nodes SET {} = ? WHERE name = ?",
                quote_ident(key)
            ),
            rusqlite::params![value, name],
        )?;
    }
    Ok(())
}

fn apply_entry(
    remote: &Connection,
    remote_backend: &dyn SchemaBackend,
    entry: &Entry,
    scope: &HashMap<String, String>,
) -> Result<()> {
    let payload: Json = serde_json::from_str(&entry.payload).unwrap_or(Json::Null);
    match entry.op.as_str() {
        crate::changelog::OP_NODE_WRITE | crate::changelog::OP_NODE_TYPE_CHANGE => {
            let name = payload["name"].as_str().unwrap_or(&entry.subject);
            let content = payload["content"].as_str().unwrap_or("");
            store::write(remote, remote_backend, name, content)?;
            apply_scope(remote, name, scope)?;
        }
        crate::changelog::OP_NODE_RM => {
            let name = payload["name"].as_str().unwrap_or(&entry.subject);
            if store::exists(remote, name)? {
                store::rm(remote, remote_backend, name)?;
            }
        }
        crate::changelog::OP_NODE_MV => {
            let old = payload["old"].as_str().unwrap_or_default();
            let new = payload["new"].as_str().unwrap_or_default();
            if store::exists(remote, old)? && !store::exists(remote, new)? {
                store::mv(remote, remote_backend, old, new)?;
                apply_scope(remote, new, scope)?;
            }
        }
        crate::changelog::OP_NODE_CP => {
            let src = payload["src"].as_str().unwrap_or_default();
            let dst = payload["dst"].as_str().unwrap_or_default();
            if store::exists(remote, src)? && !store::exists(remote, dst)? {
                store::cp(remote, remote_backend, src, dst)?;
                apply_scope(remote, dst, scope)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replay every local changelog entry after `since_seq` onto `remote`,
/// tagged with `scope`. Returns the highest `seq` successfully applied.
/// Idempotent: re-running from the same `since_seq` reproduces the same
/// remote state.
pub fn push(
    local: &Connection,
    local_backend: &dyn SchemaBackend,
    remote: &Connection,
    remote_backend: &dyn SchemaBackend,
    scope: &HashMap<String, String>,
    since_seq: i64,
    changelog_enabled: bool,
) -> Result<i64> {
    ensure_scope_columns(remote, scope)?;

    if !changelog_enabled {
        warn!("push falling back to full-table scan: changelog disabled, deletions are lossy");
        full_scan_push(local, local_backend, remote, remote_backend, scope)?;
        return Ok(0);
    }

    let entries = changelog::list(local, since_seq, None)?;
    let mut applied = since_seq;
    for entry in &entries {
        apply_entry(remote, remote_backend, entry, scope)?;
        applied = entry.seq;
        debug!(seq = entry.seq, op = %entry.op, subject = %entry.subject, "replicated changelog entry");
    }
    Ok(applied)
}

/// Map every remote row matching `scope` back to a local `write`,
/// bypassing the local changelog so pulled data never triggers a
/// push-back loop. Returns the count of nodes written locally.
pub fn pull(
    remote: &Connection,
    remote_backend: &dyn SchemaBackend,
    local: &Connection,
    local_backend: &dyn SchemaBackend,
    scope: &HashMap<String, String>,
) -> Result<usize> {
    let where_clause = scope
        .keys()
        .map(|k| format!("{} = ?", quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = if where_clause.is_empty() {
        "SELECT name FROM nodes".to_string()
    } else {
        format!("SELECT name FROM nodes WHERE {}", where_clause)
    };
    let params: Vec<&str> = scope.values().map(|s| s.as_str()).collect();
    let mut stmt = remote.prepare(&sql)?;
    let names: Vec<String> = stmt
        .query_map(rusqlite::params_from_iter(params), |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut count = 0;
    for name in names {
        let content = store::cat(remote, remote_backend, &name)?;
        store::write(local, local_backend, &name, &content)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PerTypeBackend;

    fn new_conn() -> (Connection, PerTypeBackend) {
        let conn = Connection::open_in_memory().unwrap();
        store::ensure_tables(&conn).unwrap();
        crate::links::ensure_table(&conn).unwrap();
        changelog::ensure_table(&conn).unwrap();
        (conn, PerTypeBackend::new())
    }

    #[test]
    fn push_replays_writes_and_tags_scope() {
        let (local, local_backend) = new_conn();
        let (remote, remote_backend) = new_conn();

        let content = "---\ntype: concept\n---\nHello.";
        store::write(&local, &local_backend, "sa", content).unwrap();
        changelog::append(&local, changelog::OP_NODE_WRITE, "sa", &serde_json::json!({"name": "sa", "content": content}).to_string()).unwrap();

        let mut scope = HashMap::new();
        scope.insert("team".to_string(), "x".to_string());
        let applied = push(&local, &local_backend, &remote, &remote_backend, &scope, 0, true).unwrap();
        assert!(applied > 0);
        assert_eq!(store::cat(&remote, &remote_backend, "sa").unwrap(), content);

        let tagged: String = remote
            .query_row("SELECT team FROM nodes WHERE name = 'sa'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tagged, "x");
    }

    #[test]
    fn pull_bypasses_changelog() {
        let (local, local_backend) = new_conn();
        let (remote, remote_backend) = new_conn();

        store::write(&remote, &remote_backend, "sa", "---\ntype: concept\n---\nHi.").unwrap();
        let scope = HashMap::new();
        let count = pull(&remote, &remote_backend, &local, &local_backend, &scope).unwrap();
        assert_eq!(count, 1);
        assert!(changelog::list(&local, 0, None).unwrap().is_empty());
    }
}
