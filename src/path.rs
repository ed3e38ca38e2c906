//! Dotted field paths and the value extraction behind `distinct`.
//!
//! A path such as `"x.0.y"` is walked segment by segment:
//!
//! - on a document, a segment is always a literal key, even when it looks
//!   numeric;
//! - on an array, a canonical non-negative integer (`"0"`, `"17"`) indexes
//!   into it, while any other segment fans out over every element with the
//!   same remaining path;
//! - once the path is used up, an array is unrolled into its elements and
//!   any other value (null included) is produced as-is.
//!
//! These are the rules the Data API applies server-side, so client-side
//! `distinct` agrees with what a server-side projection would select.

use crate::error::{DataApiError, Result};
use bson::{Bson, Document};
use std::collections::HashSet;
use std::fmt::Write as _;

/// A validated dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse and validate a dotted path.
    ///
    /// Fails with [`DataApiError::InvalidPath`] when any segment is empty,
    /// which covers the empty path, leading or trailing dots and runs such as
    /// `"root..subf"`.
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if let Some(position) = segments.iter().position(|s| s.is_empty()) {
            return Err(DataApiError::invalid_path(
                path,
                format!("segment {position} is empty"),
            ));
        }
        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// The path as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The individual segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The leading segments up to (excluding) the first index-like one.
    ///
    /// This is the part of the path a server-side projection can select
    /// without ambiguity. `None` when the very first segment is index-like.
    pub fn safe_prefix(&self) -> Option<String> {
        let prefix: Vec<&str> = self
            .segments
            .iter()
            .take_while(|s| list_index(s).is_none())
            .map(String::as_str)
            .collect();
        if prefix.is_empty() {
            None
        } else {
            Some(prefix.join("."))
        }
    }

    /// Lazily walk `document` and produce every value the path selects.
    pub fn values<'a>(&'a self, document: &'a Document) -> PathValues<'a> {
        let mut stack = Vec::new();
        if let Some(child) = document.get(&self.segments[0]) {
            stack.push(Frame::Walk {
                value: child,
                depth: 1,
            });
        }
        PathValues {
            segments: &self.segments,
            stack,
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for FieldPath {
    type Err = DataApiError;

    fn from_str(s: &str) -> Result<Self> {
        FieldPath::parse(s)
    }
}

/// Interpret a segment as an array index.
///
/// Only the canonical spelling counts: `"0"` and `"12"` are indices,
/// `"01"`, `"-1"` and `"+1"` are plain keys.
pub(crate) fn list_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment.parse().ok()
}

enum Frame<'a> {
    /// `value` still has to be matched against `segments[depth..]`.
    Walk { value: &'a Bson, depth: usize },
    /// Array elements, each to be walked against `segments[depth..]`.
    FanOut {
        items: std::slice::Iter<'a, Bson>,
        depth: usize,
    },
    /// Elements of an array found at the end of the path.
    Unroll(std::slice::Iter<'a, Bson>),
}

/// Iterator over the values a [`FieldPath`] selects in one document.
pub struct PathValues<'a> {
    segments: &'a [String],
    stack: Vec<Frame<'a>>,
}

impl<'a> Iterator for PathValues<'a> {
    type Item = &'a Bson;

    fn next(&mut self) -> Option<&'a Bson> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Unroll(mut items) => {
                    if let Some(item) = items.next() {
                        self.stack.push(Frame::Unroll(items));
                        return Some(item);
                    }
                }
                Frame::FanOut { mut items, depth } => {
                    if let Some(item) = items.next() {
                        self.stack.push(Frame::FanOut { items, depth });
                        self.stack.push(Frame::Walk { value: item, depth });
                    }
                }
                Frame::Walk { value, depth } => {
                    let Some(segment) = self.segments.get(depth) else {
                        match value {
                            Bson::Array(items) => self.stack.push(Frame::Unroll(items.iter())),
                            leaf => return Some(leaf),
                        }
                        continue;
                    };
                    match value {
                        Bson::Document(doc) => {
                            if let Some(child) = doc.get(segment) {
                                self.stack.push(Frame::Walk {
                                    value: child,
                                    depth: depth + 1,
                                });
                            }
                        }
                        Bson::Array(items) => match list_index(segment) {
                            Some(index) => {
                                if let Some(child) = items.get(index) {
                                    self.stack.push(Frame::Walk {
                                        value: child,
                                        depth: depth + 1,
                                    });
                                }
                            }
                            None => self.stack.push(Frame::FanOut {
                                items: items.iter(),
                                depth,
                            }),
                        },
                        // path goes deeper than the document
                        _ => {}
                    }
                }
            }
        }
        None
    }
}

/// Values deduplicated by deep structural equality, in first-seen order.
///
/// Documents are equal when they hold the same key/value pairs in any order;
/// arrays compare element by element; integers compare by value whatever
/// their width; date-times compare by instant.
#[derive(Debug, Default, Clone)]
pub struct DistinctValues {
    seen: HashSet<String>,
    values: Vec<Bson>,
}

impl DistinctValues {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; returns `false` when an equal value was already present.
    pub fn insert(&mut self, value: &Bson) -> bool {
        if self.seen.insert(canonical_key(value)) {
            self.values.push(value.clone());
            true
        } else {
            false
        }
    }

    /// Insert every value `path` selects in `document`.
    pub fn extend_from(&mut self, path: &FieldPath, document: &Document) {
        for value in path.values(document) {
            self.insert(value);
        }
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value has been inserted.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The distinct values, in first-seen order.
    pub fn into_vec(self) -> Vec<Bson> {
        self.values
    }
}

/// Order-independent textual key for a value.
pub(crate) fn canonical_key(value: &Bson) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Bson, out: &mut String) {
    // writing to a String cannot fail
    let _ = match value {
        Bson::Null => write!(out, "n"),
        Bson::Boolean(b) => write!(out, "b:{b}"),
        Bson::Int32(i) => write!(out, "i:{i}"),
        Bson::Int64(i) => write!(out, "i:{i}"),
        Bson::Double(f) => write!(out, "f:{f:?}"),
        Bson::String(s) => write!(out, "s:{s:?}"),
        Bson::DateTime(dt) => write!(out, "t:{}", dt.timestamp_millis()),
        Bson::ObjectId(oid) => write!(out, "o:{}", oid.to_hex()),
        Bson::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
            Ok(())
        }
        Bson::Document(doc) => {
            let mut entries: Vec<(&String, &Bson)> = doc.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key:?}:");
                write_canonical(item, out);
            }
            out.push('}');
            Ok(())
        }
        other => write!(out, "x:{other:?}"),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    fn collect(path: &str, document: &Document) -> Vec<Bson> {
        FieldPath::parse(path)
            .unwrap()
            .values(document)
            .cloned()
            .collect()
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        for path in [
            "",
            ".a",
            "a.",
            "root.1..subf",
            "root..1.subf",
            "root..subf.subsubf",
            "root.subf..subsubf",
        ] {
            let err = FieldPath::parse(path).unwrap_err();
            assert!(
                matches!(err, DataApiError::InvalidPath { .. }),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_segments() {
        let path = FieldPath::parse("a.0.b").unwrap();
        assert_eq!(path.segments(), ["a", "0", "b"]);
        assert_eq!(path.as_str(), "a.0.b");
        assert_eq!(path.to_string(), "a.0.b");
    }

    #[test]
    fn test_list_index_canonical_only() {
        assert_eq!(list_index("0"), Some(0));
        assert_eq!(list_index("12"), Some(12));
        assert_eq!(list_index("01"), None);
        assert_eq!(list_index("-1"), None);
        assert_eq!(list_index("+1"), None);
        assert_eq!(list_index("a1"), None);
    }

    #[test]
    fn test_safe_prefix() {
        let path = FieldPath::parse("x.0.y").unwrap();
        assert_eq!(path.safe_prefix(), Some("x".to_string()));
        let path = FieldPath::parse("a.b.c").unwrap();
        assert_eq!(path.safe_prefix(), Some("a.b.c".to_string()));
        let path = FieldPath::parse("3.b").unwrap();
        assert_eq!(path.safe_prefix(), None);
    }

    #[test]
    fn test_simple_key() {
        let document = doc! { "a": { "b": 5 } };
        assert_eq!(collect("a.b", &document), vec![Bson::Int32(5)]);
        assert!(collect("a.c", &document).is_empty());
        assert!(collect("a.b.c", &document).is_empty());
    }

    #[test]
    fn test_leaf_array_is_unrolled() {
        let document = doc! { "f": [10, 11] };
        assert_eq!(collect("f", &document), vec![Bson::Int32(10), Bson::Int32(11)]);
    }

    #[test]
    fn test_fan_out_keeps_segment() {
        let document = doc! { "x": [ { "y": 1 }, { "z": 2 }, { "y": [3, 4] } ] };
        assert_eq!(
            collect("x.y", &document),
            vec![Bson::Int32(1), Bson::Int32(3), Bson::Int32(4)]
        );
    }

    #[test]
    fn test_nested_arrays_flatten_on_fan_out() {
        let document = doc! { "x": [ [ { "y": "a" } ], { "y": "b" } ] };
        assert_eq!(
            collect("x.y", &document),
            vec![Bson::String("a".into()), Bson::String("b".into())]
        );
    }

    #[test]
    fn test_index_into_array() {
        let document = doc! { "x": [ "first", "second" ] };
        assert_eq!(collect("x.1", &document), vec![Bson::String("second".into())]);
        assert!(collect("x.2", &document).is_empty());
    }

    #[test]
    fn test_numeric_key_on_document_is_literal() {
        let document = doc! { "x": [ { "y": "Y", "0": "ZERO" } ] };
        assert_eq!(
            collect("x.0", &document),
            vec![bson!({ "y": "Y", "0": "ZERO" })]
        );
        assert_eq!(collect("x.0.0", &document), vec![Bson::String("ZERO".into())]);
        assert_eq!(collect("x.0.y", &document), vec![Bson::String("Y".into())]);
        assert_eq!(collect("x.y", &document), vec![Bson::String("Y".into())]);
    }

    #[test]
    fn test_null_leaf_is_produced() {
        let document = doc! { "f": null };
        assert_eq!(collect("f", &document), vec![Bson::Null]);
    }

    #[test]
    fn test_distinct_values_ignore_key_order() {
        let mut values = DistinctValues::new();
        assert!(values.insert(&bson!({ "a": 1, "b": { "c": 2, "d": 3 } })));
        assert!(!values.insert(&bson!({ "b": { "d": 3, "c": 2 }, "a": 1 })));
        assert!(values.insert(&bson!({ "a": 1 })));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_distinct_values_arrays_are_ordered() {
        let mut values = DistinctValues::new();
        assert!(values.insert(&bson!([true, false])));
        assert!(values.insert(&bson!([false, true])));
        assert!(!values.insert(&bson!([true, false])));
    }

    #[test]
    fn test_distinct_values_integer_widths() {
        let mut values = DistinctValues::new();
        assert!(values.insert(&Bson::Int32(7)));
        assert!(!values.insert(&Bson::Int64(7)));
        assert!(values.insert(&Bson::Double(7.5)));
        assert!(values.insert(&Bson::String("7".into())));
    }

    #[test]
    fn test_distinct_values_first_seen_order() {
        let mut values = DistinctValues::new();
        for v in [3, 1, 3, 2, 1] {
            values.insert(&Bson::Int32(v));
        }
        assert_eq!(
            values.into_vec(),
            vec![Bson::Int32(3), Bson::Int32(1), Bson::Int32(2)]
        );
    }
}
