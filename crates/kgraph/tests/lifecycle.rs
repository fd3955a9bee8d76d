use kgraph::{Error, Graph, Layout, OpenOptions};
use std::collections::HashMap;

#[test]
fn write_link_changelog_replicate_end_to_end() {
    let mut local = Graph::open_in_memory(OpenOptions::default()).unwrap();

    local
        .write(
            "sa",
            "---\ntype: concept\ndescription: d\n---\nLinks [[at]].",
        )
        .unwrap();
    local
        .write("at", "---\ntype: concept\n---\nBody.")
        .unwrap();

    assert_eq!(local.ls(Some("concept")).unwrap(), vec!["at", "sa"]);
    assert_eq!(local.wikilinks("sa").unwrap(), vec!["at"]);
    assert_eq!(local.backlinks("at").unwrap(), vec!["sa"]);

    local.rm("at").unwrap();
    assert!(local.wikilinks("sa").unwrap().is_empty());
    assert!(local.backlinks("at").unwrap().is_empty());

    local
        .write("at", "---\ntype: concept\n---\nBody again.")
        .unwrap();
    assert_eq!(local.wikilinks("sa").unwrap(), vec!["at"]);

    local.mv("sa", "sa2").unwrap();
    assert_eq!(local.backlinks("at").unwrap(), vec!["sa2"]);

    let remote = Graph::open_in_memory(OpenOptions::default()).unwrap();
    let mut scope = HashMap::new();
    scope.insert("team".to_string(), "research".to_string());
    let seq1 = local.push(&remote, &scope, 0).unwrap();
    assert!(seq1 > 0);
    let seq2 = local.push(&remote, &scope, seq1).unwrap();
    assert_eq!(seq1, seq2);

    assert_eq!(remote.cat("sa2").unwrap(), local.cat("sa2").unwrap());
}

#[test]
fn layout_is_locked_at_creation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kg.db");

    let mut opts = OpenOptions::default();
    opts.layout = Layout::Unified;
    {
        let _g = Graph::open(&path, opts).unwrap();
    }

    let mut opts = OpenOptions::default();
    opts.layout = Layout::PerType;
    let err = Graph::open(&path, opts).unwrap_err();
    assert!(matches!(err, Error::LayoutMismatch { .. }));
}

#[test]
fn validator_gatekeeper_blocks_partial_writes() {
    use kgraph::validator::{requires_field, Validator};

    let mut opts = OpenOptions::default();
    opts.validator = Some(Validator::new().with_rule(requires_field("concept", "description")));
    let mut g = Graph::open_in_memory(opts).unwrap();

    let err = g
        .write("c1", "---\ntype: concept\n---\nNo description here.")
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    assert!(g.ls(None).unwrap().is_empty());

    g.write(
        "c1",
        "---\ntype: concept\ndescription: filled in\n---\nBody.",
    )
    .unwrap();
    assert_eq!(g.ls(Some("concept")).unwrap(), vec!["c1"]);
}

#[test]
fn unified_layout_shares_columns_across_types() {
    let mut opts = OpenOptions::default();
    opts.layout = Layout::Unified;
    let mut g = Graph::open_in_memory(opts).unwrap();

    g.write("p1", "---\ntype: paper\nauthor: a\n---\n").unwrap();
    g.write("b1", "---\ntype: book\nauthor: b\n---\n").unwrap();

    let schema = g.schema().unwrap();
    assert!(schema["paper"].contains(&"author".to_string()));
    assert!(schema["book"].contains(&"author".to_string()));
}
