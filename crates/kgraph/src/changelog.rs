//! Append-only mutation log driving replication.

use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

pub const OP_NODE_WRITE: &str = "node.write";
pub const OP_NODE_RM: &str = "node.rm";
pub const OP_NODE_MV: &str = "node.mv";
pub const OP_NODE_CP: &str = "node.cp";
pub const OP_NODE_TYPE_CHANGE: &str = "node.type_change";
pub const OP_TYPE_ADD: &str = "type.add";
pub const OP_TYPE_RM: &str = "type.rm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub seq: i64,
    pub ts: String,
    pub op: String,
    pub subject: String,
    pub payload: String,
}

pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS changelog (\
            seq INTEGER PRIMARY KEY AUTOINCREMENT, \
            ts TEXT NOT NULL, \
            op TEXT NOT NULL, \
            subject TEXT NOT NULL, \
            payload TEXT NOT NULL\
        )",
        [],
    )?;
    Ok(())
}

/// Append a mutation record, called inside the same transaction as the
/// mutation it describes. Returns the assigned `seq`.
pub fn append(conn: &Connection, op: &str, subject: &str, payload: &str) -> Result<i64> {
    let ts = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO changelog (ts, op, subject, payload) VALUES (?, ?, ?, ?)",
        params![ts, op, subject, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list(conn: &Connection, since_seq: i64, limit: Option<i64>) -> Result<Vec<Entry>> {
    let sql = match limit {
        Some(_) => "SELECT seq, ts, op, subject, payload FROM changelog WHERE seq > ? ORDER BY seq LIMIT ?",
        None => "SELECT seq, ts, op, subject, payload FROM changelog WHERE seq > ? ORDER BY seq",
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = if let Some(limit) = limit {
        stmt.query_map(params![since_seq, limit], row_to_entry)?
    } else {
        stmt.query_map(params![since_seq], row_to_entry)?
    };
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn truncate(conn: &Connection, before_seq: i64) -> Result<()> {
    conn.execute("DELETE FROM changelog WHERE seq < ?", params![before_seq])?;
    Ok(())
}

pub fn max_seq(conn: &Connection) -> Result<i64> {
    let max: Option<i64> = conn
        .query_row("SELECT MAX(seq) FROM changelog", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(max.unwrap_or(0))
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    Ok(Entry {
        seq: row.get(0)?,
        ts: row.get(1)?,
        op: row.get(2)?,
        subject: row.get(3)?,
        payload: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        ensure_table(&c).unwrap();
        c
    }

    #[test]
    fn seq_is_strictly_increasing() {
        let c = conn();
        let s1 = append(&c, OP_NODE_WRITE, "a", "{}").unwrap();
        let s2 = append(&c, OP_NODE_WRITE, "b", "{}").unwrap();
        assert!(s2 > s1);
    }

    #[test]
    fn list_respects_since_and_limit() {
        let c = conn();
        append(&c, OP_NODE_WRITE, "a", "{}").unwrap();
        append(&c, OP_NODE_WRITE, "b", "{}").unwrap();
        append(&c, OP_NODE_WRITE, "c", "{}").unwrap();
        let all = list(&c, 0, None).unwrap();
        assert_eq!(all.len(), 3);
        let tail = list(&c, 1, None).unwrap();
        assert_eq!(tail.len(), 2);
        let limited = list(&c, 0, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn truncate_drops_old_entries() {
        let c = conn();
        append(&c, OP_NODE_WRITE, "a", "{}").unwrap();
        let s2 = append(&c, OP_NODE_WRITE, "b", "{}").unwrap();
        truncate(&c, s2).unwrap();
        let remaining = list(&c, 0, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].subject, "b");
    }
}
