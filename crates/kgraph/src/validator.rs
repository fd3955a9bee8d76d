//! Composable validation rules, evaluated against the graph as a
//! gatekeeper or on demand.
//!
//! A rule is a boxed closure over the live connection and schema
//! backend so built-ins and `custom` predicates share one shape. Install
//! hooks run once, when a validator is attached to a `Graph`; `freeze_schema`
//! is the only built-in that needs one (it pins the field set up front).

use crate::error::{Error, Result};
use crate::schema::SchemaBackend;
use crate::value::{sanitize_field_name, Metadata};
use rusqlite::Connection;

/// A single node's view, handed to `custom` predicates.
pub struct NodeView {
    pub name: String,
    pub node_type: String,
    pub content: String,
    pub metadata: Metadata,
}

type CheckFn = dyn Fn(&Connection, &dyn SchemaBackend) -> Result<Vec<String>>;
type InstallFn = dyn Fn(&Connection, &dyn SchemaBackend) -> Result<()>;

pub struct Rule {
    check: Box<CheckFn>,
    install: Option<Box<InstallFn>>,
}

#[derive(Default)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    pub fn new() -> Self {
        Validator { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Run every rule's one-time install hook (currently only
    /// `freeze_schema` has one).
    pub fn install(&self, conn: &Connection, backend: &dyn SchemaBackend) -> Result<()> {
        for rule in &self.rules {
            if let Some(install) = &rule.install {
                install(conn, backend)?;
            }
        }
        Ok(())
    }

    /// Run all rules, collecting every violation. Never short-circuits.
    pub fn check(&self, conn: &Connection, backend: &dyn SchemaBackend) -> Result<Vec<String>> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            violations.extend((rule.check)(conn, backend)?);
        }
        Ok(violations)
    }

    /// Run `check` and turn a non-empty result into `Error::Invalid`.
    pub fn enforce(&self, conn: &Connection, backend: &dyn SchemaBackend) -> Result<()> {
        let violations = self.check(conn, backend)?;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::Invalid(violations))
        }
    }
}

fn nodes_of_type(conn: &Connection, ty: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM nodes WHERE type = ?")?;
    let rows = stmt.query_map([ty], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn node_type(conn: &Connection, name: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT type FROM nodes WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .ok())
}

fn load_view(
    conn: &Connection,
    backend: &dyn SchemaBackend,
    name: &str,
    ty: &str,
) -> Result<Option<NodeView>> {
    Ok(backend
        .read(conn, name, ty)?
        .map(|(content, metadata)| NodeView {
            name: name.to_string(),
            node_type: ty.to_string(),
            content,
            metadata,
        }))
}

/// Every node of `ty` has metadata keys that sanitize into `fields` (or
/// fewer); installing the rule also pins the schema registry's field set
/// for `ty` to exactly `fields`.
pub fn freeze_schema(ty: impl Into<String>, fields: Vec<String>) -> Rule {
    let ty = ty.into();
    let sanitized: Vec<String> = fields.iter().map(|f| sanitize_field_name(f)).collect();

    let install_ty = ty.clone();
    let install_fields = fields.clone();
    let check_ty = ty.clone();
    let check_fields = sanitized;

    Rule {
        install: Some(Box::new(move |conn, backend| {
            backend.set_fields(conn, &install_ty, &install_fields)
        })),
        check: Box::new(move |conn, backend| {
            let mut violations = Vec::new();
            for name in nodes_of_type(conn, &check_ty)? {
                if let Some(view) = load_view(conn, backend, &name, &check_ty)? {
                    for key in view.metadata.keys() {
                        if key == "type" {
                            continue;
                        }
                        if !check_fields.contains(&sanitize_field_name(key)) {
                            violations.push(format!(
                                "freeze_schema({}): node '{}' has field '{}' outside frozen set",
                                check_ty, name, key
                            ));
                        }
                    }
                }
            }
            Ok(violations)
        }),
    }
}

/// Every node of `ty` has `field` present and non-empty.
pub fn requires_field(ty: impl Into<String>, field: impl Into<String>) -> Rule {
    let ty = ty.into();
    let field = field.into();
    let column = sanitize_field_name(&field);
    Rule {
        install: None,
        check: Box::new(move |conn, backend| {
            let mut violations = Vec::new();
            for name in nodes_of_type(conn, &ty)? {
                if let Some(view) = load_view(conn, backend, &name, &ty)? {
                    let ok = view
                        .metadata
                        .get(&column)
                        .map(|v| !v.is_empty())
                        .unwrap_or(false);
                    if !ok {
                        violations.push(format!(
                            "requires_field({}, {}): node '{}' is missing it",
                            ty, field, name
                        ));
                    }
                }
            }
            Ok(violations)
        }),
    }
}

/// Every node of `ty` has `tag` in its `tags` metadata field.
pub fn requires_tag(ty: impl Into<String>, tag: impl Into<String>) -> Rule {
    let ty = ty.into();
    let tag = tag.into();
    Rule {
        install: None,
        check: Box::new(move |conn, backend| {
            let mut violations = Vec::new();
            for name in nodes_of_type(conn, &ty)? {
                if let Some(view) = load_view(conn, backend, &name, &ty)? {
                    let has = view
                        .metadata
                        .get("tags")
                        .map(|v| v.as_list().iter().any(|t| *t == tag))
                        .unwrap_or(false);
                    if !has {
                        violations.push(format!(
                            "requires_tag({}, {}): node '{}' is missing it",
                            ty, tag, name
                        ));
                    }
                }
            }
            Ok(violations)
        }),
    }
}

/// Every node of `ty` has at least one outgoing resolved edge to a node
/// of `target_type`. An unresolved wikilink never counts.
pub fn requires_link(ty: impl Into<String>, target_type: impl Into<String>) -> Rule {
    let ty = ty.into();
    let target_type = target_type.into();
    Rule {
        install: None,
        check: Box::new(move |conn, _backend| {
            let mut violations = Vec::new();
            for name in nodes_of_type(conn, &ty)? {
                let targets = crate::links::wikilinks(conn, &name)?;
                let mut ok = false;
                for t in &targets {
                    if node_type(conn, t)?.as_deref() == Some(target_type.as_str()) {
                        ok = true;
                        break;
                    }
                }
                if !ok {
                    violations.push(format!(
                        "requires_link({}, {}): node '{}' has no resolved link to that type",
                        ty, target_type, name
                    ));
                }
            }
            Ok(violations)
        }),
    }
}

/// Every node has in-degree + out-degree >= 1, counting resolved edges
/// only.
pub fn no_orphans() -> Rule {
    Rule {
        install: None,
        check: Box::new(|conn, _backend| {
            let mut stmt = conn.prepare("SELECT name FROM nodes")?;
            let names: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            let mut violations = Vec::new();
            for name in &names {
                let out_degree = crate::links::wikilinks(conn, name)?.len();
                let in_degree = if out_degree > 0 {
                    1 // already satisfied, skip the backlink scan
                } else {
                    crate::links::backlinks(conn, name)?.len()
                };
                if out_degree + in_degree == 0 {
                    violations.push(format!("no_orphans: node '{}' has no edges", name));
                }
            }
            Ok(violations)
        }),
    }
}

/// User-supplied predicate over a single node of `ty`; returning `Some`
/// records a violation tagged with `rule_name`.
pub fn custom<F>(ty: impl Into<String>, rule_name: impl Into<String>, predicate: F) -> Rule
where
    F: Fn(&NodeView) -> Option<String> + 'static,
{
    let ty = ty.into();
    let rule_name = rule_name.into();
    Rule {
        install: None,
        check: Box::new(move |conn, backend| {
            let mut violations = Vec::new();
            for name in nodes_of_type(conn, &ty)? {
                if let Some(view) = load_view(conn, backend, &name, &ty)? {
                    if let Some(msg) = predicate(&view) {
                        violations.push(format!("{}: {}", rule_name, msg));
                    }
                }
            }
            Ok(violations)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PerTypeBackend;
    use crate::value::FieldValue;

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute("CREATE TABLE nodes (name TEXT PRIMARY KEY, type TEXT)", [])
            .unwrap();
        crate::links::ensure_table(&c).unwrap();
        c
    }

    fn add(conn: &Connection, backend: &PerTypeBackend, name: &str, ty: &str, meta: Metadata) {
        conn.execute(
            "INSERT INTO nodes (name, type) VALUES (?, ?)",
            [name, ty],
        )
        .unwrap();
        backend.upsert(conn, name, ty, "content", &meta).unwrap();
    }

    #[test]
    fn requires_field_flags_missing() {
        let c = conn();
        let backend = PerTypeBackend::new();
        add(&c, &backend, "c1", "concept", Metadata::new());

        let validator = Validator::new().with_rule(requires_field("concept", "description"));
        let violations = validator.check(&c, &backend).unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn requires_field_passes_when_present() {
        let c = conn();
        let backend = PerTypeBackend::new();
        let mut meta = Metadata::new();
        meta.insert("description", FieldValue::Scalar("d".into()));
        add(&c, &backend, "c1", "concept", meta);

        let validator = Validator::new().with_rule(requires_field("concept", "description"));
        assert!(validator.check(&c, &backend).unwrap().is_empty());
    }

    #[test]
    fn no_orphans_flags_isolated_node() {
        let c = conn();
        let backend = PerTypeBackend::new();
        add(&c, &backend, "lonely", "untyped", Metadata::new());

        let validator = Validator::new().with_rule(no_orphans());
        assert_eq!(validator.check(&c, &backend).unwrap().len(), 1);
    }

    #[test]
    fn requires_link_rejects_unresolved_target() {
        let c = conn();
        let backend = PerTypeBackend::new();
        add(&c, &backend, "a", "note", Metadata::new());
        crate::links::replace_outgoing(&c, "a", &["missing".to_string()]).unwrap();

        let validator = Validator::new().with_rule(requires_link("note", "ref"));
        assert_eq!(validator.check(&c, &backend).unwrap().len(), 1);
    }
}
