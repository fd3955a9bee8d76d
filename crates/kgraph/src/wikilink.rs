//! Extracts `[[target]]` / `[[target|display]]` tokens from body text.

/// Extract wikilink targets from `body`, left to right, innermost match
/// only (no nesting). A `|` splits display text from target; only the
/// target (left side) is kept. Targets are trimmed. Duplicates collapse,
/// preserving order of first appearance.
pub fn extract(body: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    let bytes = body.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            let start = i + 2;
            if let Some(rel_end) = body[start..].find("]]") {
                let inner = &body[start..start + rel_end];
                // Innermost match: if another "[[" appears before this
                // closing "]]", restart the scan just past it so the
                // inner-most bracket pair is the one that gets matched.
                if let Some(rel_nested) = inner.find("[[") {
                    i = start + rel_nested;
                    continue;
                }
                let target = inner.split('|').next().unwrap_or("").trim();
                if !target.is_empty() && seen.insert(target.to_string()) {
                    out.push(target.to_string());
                }
                i = start + rel_end + 2;
                continue;
            }
        }
        i += 1;
    }
    out
}
