//! Splits a raw document into header + body and decodes the header as a
//! minimal YAML subset.
//!
//! The grammar recognized is deliberately small: `key: value` lines,
//! inline `[a, b, c]` lists, and block lists via `- item` on indented
//! lines beneath a bare `key:`. Anything outside that grammar makes the
//! header unparsable, in which case the whole document is treated as
//! body with no metadata; frontmatter syntax errors never fail a write.

use crate::value::{FieldValue, Metadata};

pub const UNTYPED: &str = "untyped";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub metadata: Metadata,
    pub body: String,
    pub node_type: String,
}

/// Split `content` into lines, recording the byte offset where each line
/// (including its trailing newline) ends, so the body can be sliced out
/// of the original string rather than rejoined from parts.
fn line_spans(content: &str) -> Vec<(usize, usize, &str)> {
    let mut spans = Vec::new();
    let mut pos = 0usize;
    for raw in content.split_inclusive('\n') {
        let start = pos;
        let end = pos + raw.len();
        let mut text = raw.strip_suffix('\n').unwrap_or(raw);
        text = text.strip_suffix('\r').unwrap_or(text);
        spans.push((start, end, text));
        pos = end;
    }
    // split_inclusive drops a final line with no trailing newline only if
    // content is empty; otherwise it's already included above.
    spans
}

pub fn parse(content: &str) -> ParsedDocument {
    let spans = line_spans(content);

    let mut idx = 0;
    while idx < spans.len() && spans[idx].2.trim().is_empty() {
        idx += 1;
    }

    let no_frontmatter = || ParsedDocument {
        metadata: Metadata::new(),
        body: content.to_string(),
        node_type: UNTYPED.to_string(),
    };

    if idx >= spans.len() || spans[idx].2.trim() != "---" {
        return no_frontmatter();
    }

    let header_start = idx + 1;
    let close = spans[header_start..]
        .iter()
        .position(|(_, _, text)| text.trim() == "---")
        .map(|p| header_start + p);

    let Some(close_idx) = close else {
        return no_frontmatter();
    };

    let header_lines: Vec<&str> = spans[header_start..close_idx]
        .iter()
        .map(|(_, _, t)| *t)
        .collect();

    let Some(metadata) = parse_header(&header_lines) else {
        return no_frontmatter();
    };

    let body_start = spans[close_idx].1;
    let body = content[body_start..].to_string();
    let node_type = metadata
        .get("type")
        .and_then(FieldValue::as_scalar)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| UNTYPED.to_string());

    ParsedDocument {
        metadata,
        body,
        node_type,
    }
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn parse_header(lines: &[&str]) -> Option<Metadata> {
    let mut map = Metadata::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.trim().is_empty() {
            i += 1;
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return None;
        }
        let colon = line.find(':')?;
        let key = line[..colon].trim();
        if key.is_empty() {
            return None;
        }
        let rest = line[colon + 1..].trim();

        if rest.is_empty() {
            let mut items = Vec::new();
            let mut j = i + 1;
            while j < lines.len() {
                let raw = lines[j];
                let trimmed = raw.trim_start();
                if (raw.starts_with(' ') || raw.starts_with('\t')) && trimmed.starts_with("- ") {
                    items.push(strip_quotes(trimmed[2..].trim()));
                    j += 1;
                } else if trimmed.is_empty() {
                    j += 1;
                } else {
                    break;
                }
            }
            if items.is_empty() {
                map.insert(key, FieldValue::Scalar(String::new()));
                i += 1;
            } else {
                map.insert(key, FieldValue::List(items));
                i = j;
            }
        } else if rest.starts_with('[') && rest.ends_with(']') {
            let inner = &rest[1..rest.len() - 1];
            let items = if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|s| strip_quotes(s.trim())).collect()
            };
            map.insert(key, FieldValue::List(items));
            i += 1;
        } else {
            map.insert(key, FieldValue::Scalar(strip_quotes(rest)));
            i += 1;
        }
    }
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delimiter_is_all_body() {
        let doc = parse("just a body\nwith lines\n");
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.node_type, UNTYPED);
        assert_eq!(doc.body, "just a body\nwith lines\n");
    }

    #[test]
    fn inline_list_and_scalar() {
        let content = "---\ntype: concept\ntags: [a, b, c]\n---\nBody text.";
        let doc = parse(content);
        assert_eq!(doc.node_type, "concept");
        assert_eq!(
            doc.metadata.get("tags").unwrap().as_list(),
            vec!["a", "b", "c"]
        );
        assert_eq!(doc.body, "Body text.");
    }

    #[test]
    fn block_list() {
        let content = "---\ntype: concept\ntags:\n  - a\n  - b\n---\nBody.";
        let doc = parse(content);
        assert_eq!(
            doc.metadata.get("tags").unwrap().as_list(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn unterminated_header_is_malformed() {
        let content = "---\ntype: concept\nno closing delimiter here";
        let doc = parse(content);
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, content);
    }

    #[test]
    fn booleans_and_integers_preserved_as_text() {
        let content = "---\nactive: true\ncount: 42\n---\nBody.";
        let doc = parse(content);
        assert_eq!(
            doc.metadata.get("active").unwrap().as_scalar(),
            Some("true")
        );
        assert_eq!(doc.metadata.get("count").unwrap().as_scalar(), Some("42"));
    }

    #[test]
    fn missing_type_is_untyped() {
        let doc = parse("---\ndescription: d\n---\nBody.");
        assert_eq!(doc.node_type, UNTYPED);
    }
}
