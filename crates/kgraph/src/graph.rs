//! `Graph`: the single entry point owning the connection and dispatching
//! every operation inside one transaction per mutation.

use crate::changelog::{self, OP_NODE_CP, OP_NODE_MV, OP_NODE_RM, OP_NODE_TYPE_CHANGE, OP_NODE_WRITE, OP_TYPE_ADD, OP_TYPE_RM};
use crate::error::{Error, Layout, Result};
use crate::frontmatter::UNTYPED;
use crate::links;
use crate::query;
use crate::replication;
use crate::schema::{PerTypeBackend, SchemaBackend, UnifiedBackend};
use crate::sqlfn;
use crate::store::{self, NodeInfo};
use crate::validator::Validator;
use crate::value::Metadata;
use rusqlite::types::Value;
use rusqlite::{Connection, ToSql};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Options controlling how a database is opened or created.
pub struct OpenOptions {
    pub layout: Layout,
    pub changelog: bool,
    pub validator: Option<Validator>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            layout: Layout::PerType,
            changelog: true,
            validator: None,
        }
    }
}

pub struct Graph {
    conn: Connection,
    layout: Layout,
    backend: Box<dyn SchemaBackend>,
    changelog_enabled: bool,
    validator: Option<Validator>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("layout", &self.layout)
            .field("changelog_enabled", &self.changelog_enabled)
            .finish_non_exhaustive()
    }
}

impl Graph {
    pub fn open(path: impl AsRef<Path>, opts: OpenOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, opts)
    }

    pub fn open_in_memory(opts: OpenOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, opts)
    }

    fn from_connection(conn: Connection, opts: OpenOptions) -> Result<Self> {
        store::ensure_tables(&conn)?;
        links::ensure_table(&conn)?;
        changelog::ensure_table(&conn)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (k TEXT PRIMARY KEY, v TEXT)",
            [],
        )?;
        sqlfn::register_regexp(&conn)?;

        let stored_layout: Option<String> = conn
            .query_row("SELECT v FROM meta WHERE k = 'layout'", [], |row| {
                row.get(0)
            })
            .ok();

        let layout = match stored_layout {
            Some(s) => {
                let found = Layout::parse(&s).unwrap_or(opts.layout);
                if found != opts.layout {
                    return Err(Error::LayoutMismatch {
                        expected: found,
                        found: opts.layout,
                    });
                }
                found
            }
            None => {
                conn.execute(
                    "INSERT INTO meta (k, v) VALUES ('layout', ?)",
                    [opts.layout.as_str()],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO meta (k, v) VALUES ('schema_version', '1')",
                    [],
                )?;
                opts.layout
            }
        };

        let backend: Box<dyn SchemaBackend> = match layout {
            Layout::PerType => Box::new(PerTypeBackend::new()),
            Layout::Unified => Box::new(UnifiedBackend::new()),
        };

        if let Some(validator) = &opts.validator {
            validator.install(&conn, backend.as_ref())?;
        }

        Ok(Graph {
            conn,
            layout,
            backend,
            changelog_enabled: opts.changelog,
            validator: opts.validator,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn enforce_gate(
        validator: &Option<Validator>,
        backend: &dyn SchemaBackend,
        conn: &Connection,
    ) -> Result<()> {
        if let Some(validator) = validator {
            let violations = validator.check(conn, backend)?;
            if !violations.is_empty() {
                warn!(count = violations.len(), "validator rejected mutation");
                return Err(Error::Invalid(violations));
            }
        }
        Ok(())
    }

    // ---- Mutation surface ----

    pub fn write(&mut self, name: &str, content: &str) -> Result<()> {
        debug!(%name, "write");
        let tx = self.conn.transaction()?;
        let outcome = store::write(&tx, self.backend.as_ref(), name, content)?;

        if self.changelog_enabled {
            let op = if outcome
                .prior_type
                .as_deref()
                .map(|p| p != outcome.node_type.as_str())
                .unwrap_or(false)
            {
                OP_NODE_TYPE_CHANGE
            } else {
                OP_NODE_WRITE
            };
            let payload = serde_json::json!({
                "name": name,
                "type": outcome.node_type,
                "content": content,
            })
            .to_string();
            changelog::append(&tx, op, name, &payload)?;
        }

        Self::enforce_gate(&self.validator, self.backend.as_ref(), &tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn touch(&mut self, name: &str, content: &str) -> Result<bool> {
        if store::exists(&self.conn, name)? {
            return Ok(false);
        }
        self.write(name, content)?;
        Ok(true)
    }

    pub fn rm(&mut self, name: &str) -> Result<()> {
        debug!(%name, "rm");
        let tx = self.conn.transaction()?;
        let ty = store::rm(&tx, self.backend.as_ref(), name)?;
        if self.changelog_enabled {
            let payload = serde_json::json!({"name": name, "type": ty}).to_string();
            changelog::append(&tx, OP_NODE_RM, name, &payload)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mv(&mut self, old: &str, new: &str) -> Result<()> {
        debug!(%old, %new, "mv");
        let tx = self.conn.transaction()?;
        store::mv(&tx, self.backend.as_ref(), old, new)?;
        if self.changelog_enabled {
            let payload = serde_json::json!({"old": old, "new": new}).to_string();
            changelog::append(&tx, OP_NODE_MV, new, &payload)?;
        }
        Self::enforce_gate(&self.validator, self.backend.as_ref(), &tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
        debug!(%src, %dst, "cp");
        let tx = self.conn.transaction()?;
        store::cp(&tx, self.backend.as_ref(), src, dst)?;
        if self.changelog_enabled {
            let payload = serde_json::json!({"src": src, "dst": dst}).to_string();
            changelog::append(&tx, OP_NODE_CP, dst, &payload)?;
        }
        Self::enforce_gate(&self.validator, self.backend.as_ref(), &tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn add_type(&mut self, name: &str) -> Result<()> {
        debug!(%name, "add_type");
        let tx = self.conn.transaction()?;
        store::register_type(&tx, name)?;
        if self.changelog_enabled {
            let payload = serde_json::json!({"type": name}).to_string();
            changelog::append(&tx, OP_TYPE_ADD, name, &payload)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop `name` as a registered type, migrating every node currently
    /// of that type to `untyped`. Returns the number of nodes migrated.
    pub fn remove_type(&mut self, name: &str) -> Result<usize> {
        info!(%name, "remove_type");
        let tx = self.conn.transaction()?;
        let nodes = query::ls(&tx, Some(name))?;
        for node_name in &nodes {
            if let Some((content, metadata)) = self.backend.read(&tx, node_name, name)? {
                self.backend
                    .change_type(&tx, node_name, name, UNTYPED, &content, &metadata)?;
                tx.execute(
                    "UPDATE nodes SET type = ? WHERE name = ?",
                    [UNTYPED, node_name.as_str()],
                )?;
            }
        }
        self.backend.drop_type(&tx, name)?;
        tx.execute("DELETE FROM types WHERE name = ?", [name])?;
        if self.changelog_enabled {
            let payload = serde_json::json!({"type": name, "migrated": nodes.len()}).to_string();
            changelog::append(&tx, OP_TYPE_RM, name, &payload)?;
        }
        tx.commit()?;
        Ok(nodes.len())
    }

    // ---- Read views ----

    pub fn cat(&self, name: &str) -> Result<String> {
        store::cat(&self.conn, self.backend.as_ref(), name)
    }

    pub fn body(&self, name: &str) -> Result<String> {
        store::body(&self.conn, self.backend.as_ref(), name)
    }

    pub fn frontmatter(&self, name: &str) -> Result<Metadata> {
        store::frontmatter_of(&self.conn, self.backend.as_ref(), name)
    }

    pub fn info(&self, name: &str) -> Result<NodeInfo> {
        store::info(&self.conn, self.backend.as_ref(), name)
    }

    pub fn read(&self, name: &str, depth: usize) -> Result<Vec<(String, String)>> {
        store::read(&self.conn, self.backend.as_ref(), name, depth)
    }

    // ---- Search / graph surface ----

    pub fn ls(&self, ty: Option<&str>) -> Result<Vec<String>> {
        query::ls(&self.conn, ty)
    }

    pub fn find(&self, name_regex: &str, type_filter: Option<&str>) -> Result<Vec<String>> {
        query::find(&self.conn, name_regex, type_filter)
    }

    pub fn grep(&self, pattern: &str, content_bool: bool) -> Result<Vec<String>> {
        query::grep(&self.conn, self.backend.as_ref(), pattern, content_bool)
    }

    pub fn tags(&self) -> Result<HashMap<String, Vec<String>>> {
        query::tags(&self.conn, self.backend.as_ref())
    }

    pub fn node_tags(&self, name: &str) -> Result<Vec<String>> {
        query::node_tags(&self.conn, self.backend.as_ref(), name)
    }

    pub fn schema(&self) -> Result<HashMap<String, Vec<String>>> {
        query::schema(&self.conn, self.backend.as_ref())
    }

    pub fn tree(&self) -> Result<HashMap<String, Vec<String>>> {
        query::tree(&self.conn)
    }

    pub fn wikilinks(&self, name: &str) -> Result<Vec<String>> {
        links::wikilinks(&self.conn, name)
    }

    pub fn backlinks(&self, name: &str) -> Result<Vec<String>> {
        links::backlinks(&self.conn, name)
    }

    pub fn graph_edges(&self) -> Result<HashMap<String, Vec<String>>> {
        links::graph(&self.conn)
    }

    pub fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Vec<Value>>> {
        query::query(&self.conn, sql, params)
    }

    // ---- Replication ----

    /// Push every local changelog entry after `since_seq` to `remote`,
    /// tagged with `scope`. With the local changelog disabled, `since_seq`
    /// must be `0` (a full-table-scan upsert, lossy for deletions);
    /// requesting a true delta without a changelog is `ChangelogDisabled`.
    pub fn push(
        &self,
        remote: &Graph,
        scope: &HashMap<String, String>,
        since_seq: i64,
    ) -> Result<i64> {
        if !self.changelog_enabled && since_seq != 0 {
            return Err(Error::ChangelogDisabled);
        }
        replication::push(
            &self.conn,
            self.backend.as_ref(),
            &remote.conn,
            remote.backend.as_ref(),
            scope,
            since_seq,
            self.changelog_enabled,
        )
    }

    /// Pull every remote row matching `scope` into the local graph,
    /// bypassing the local changelog.
    pub fn pull(&self, remote: &Graph, scope: &HashMap<String, String>) -> Result<usize> {
        replication::pull(
            &remote.conn,
            remote.backend.as_ref(),
            &self.conn,
            self.backend.as_ref(),
            scope,
        )
    }
}
