//! Typed metadata values and the field-name sanitizer.
//!
//! Every metadata field is persisted as text. Lists are joined with a
//! reserved separator on write and split back out on read; the reserved
//! separator is `\x1f` (ASCII unit separator), which is never typed by a
//! human author.

const LIST_SEPARATOR: char = '\x1f';

/// A single metadata value: either a scalar string (original form
/// preserved) or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Encode for storage in a single text column.
    pub fn encode(&self) -> String {
        match self {
            FieldValue::Scalar(s) => s.clone(),
            FieldValue::List(items) => items.join(&LIST_SEPARATOR.to_string()),
        }
    }

    /// Decode a stored column value back into a scalar or list.
    pub fn decode(raw: &str) -> FieldValue {
        if raw.contains(LIST_SEPARATOR) {
            FieldValue::List(raw.split(LIST_SEPARATOR).map(|s| s.to_string()).collect())
        } else {
            FieldValue::Scalar(raw.to_string())
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Vec<&str> {
        match self {
            FieldValue::Scalar(s) => vec![s.as_str()],
            FieldValue::List(items) => items.iter().map(|s| s.as_str()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Scalar(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }
}

/// An ordered `field -> value` mapping, preserving the order fields were
/// first observed in the source document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(String, FieldValue)>);

impl Metadata {
    pub fn new() -> Self {
        Metadata(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        let key = key.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        if let Some(idx) = self.0.iter().position(|(k, _)| k == key) {
            Some(self.0.remove(idx).1)
        } else {
            None
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Sanitize a raw metadata key into a valid SQL column / identifier name:
/// lowercase, non-alphanumerics become `_`, a leading digit is prefixed
/// with `_`.
pub fn sanitize_field_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().map_or(false, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips() {
        let v = FieldValue::Scalar("hello world".to_string());
        assert_eq!(FieldValue::decode(&v.encode()), v);
    }

    #[test]
    fn list_round_trips() {
        let v = FieldValue::List(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(FieldValue::decode(&v.encode()), v);
    }

    #[test]
    fn sanitizer_lowercases_and_maps_non_alnum() {
        assert_eq!(sanitize_field_name("My Field-Name!"), "my_field_name_");
    }

    #[test]
    fn sanitizer_prefixes_leading_digit() {
        assert_eq!(sanitize_field_name("123abc"), "_123abc");
    }

    #[test]
    fn metadata_preserves_insertion_order() {
        let mut m = Metadata::new();
        m.insert("b", FieldValue::Scalar("2".into()));
        m.insert("a", FieldValue::Scalar("1".into()));
        let keys: Vec<&str> = m.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
