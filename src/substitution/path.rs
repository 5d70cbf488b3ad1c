//! Dotted path addressing into JSON documents
//!
//! Grammar:
//! - `a.b.c` object keys separated by `.`
//! - `a[2]` array index, `a[*]` every element of an array
//! - `$` the document root
//!
//! Keys may contain any character except `.`, `[` and `]`.

use std::fmt;

use serde_json::{Map, Value};

/// Path parsing and addressing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path expression is empty
    Empty,
    /// A key between separators is empty
    EmptyKey(String),
    /// `[` without matching `]`, or text after `]`
    Malformed(String),
    /// Bracket content is neither a number nor `*`
    InvalidIndex { path: String, index: String },
    /// Wildcards address many nodes and cannot be written to
    WildcardInTarget(String),
    /// Path does not exist in the document
    NotFound(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "path is empty"),
            PathError::EmptyKey(path) => write!(f, "path '{}' contains an empty key", path),
            PathError::Malformed(path) => write!(f, "path '{}' is malformed", path),
            PathError::InvalidIndex { path, index } => {
                write!(f, "path '{}' has invalid index '{}'", path, index)
            }
            PathError::WildcardInTarget(path) => {
                write!(f, "path '{}' cannot be written through a wildcard", path)
            }
            PathError::NotFound(path) => write!(f, "Path not found: {}", path),
        }
    }
}

impl std::error::Error for PathError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Result of evaluating a path against a document
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Missing,
    One(Value),
    /// Produced by a wildcard segment, possibly empty
    Many(Vec<Value>),
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    pub fn parse(expression: &str) -> Result<Self, PathError> {
        let raw = expression.trim();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if raw == "$" {
            return Ok(Self::root());
        }

        let body = raw.strip_prefix("$.").unwrap_or(raw);
        let mut segments = Vec::new();

        for (i, part) in body.split('.').enumerate() {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if key.contains(']') {
                return Err(PathError::Malformed(raw.to_string()));
            }
            if key.is_empty() && (i > 0 || rest.is_empty()) {
                return Err(PathError::EmptyKey(raw.to_string()));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }

            while !rest.is_empty() {
                let inner = rest
                    .strip_prefix('[')
                    .ok_or_else(|| PathError::Malformed(raw.to_string()))?;
                let close = inner
                    .find(']')
                    .ok_or_else(|| PathError::Malformed(raw.to_string()))?;
                let index = &inner[..close];
                if index == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    let n = index.parse::<usize>().map_err(|_| PathError::InvalidIndex {
                        path: raw.to_string(),
                        index: index.to_string(),
                    })?;
                    segments.push(Segment::Index(n));
                }
                rest = &inner[close + 1..];
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The document root, `$`
    pub fn root() -> Self {
        Self {
            raw: "$".to_string(),
            segments: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluate the path; a wildcard anywhere yields `Many`
    pub fn select(&self, document: &Value) -> Selection {
        let mut current: Vec<&Value> = vec![document];
        let mut many = false;

        for segment in &self.segments {
            let mut next = Vec::with_capacity(current.len());
            for node in current {
                match segment {
                    Segment::Key(key) => next.extend(node.get(key.as_str())),
                    Segment::Index(i) => next.extend(node.get(*i)),
                    Segment::Wildcard => {
                        many = true;
                        if let Value::Array(items) = node {
                            next.extend(items.iter());
                        }
                    }
                }
            }
            current = next;
        }

        if many {
            Selection::Many(current.into_iter().cloned().collect())
        } else {
            match current.first() {
                Some(value) => Selection::One((*value).clone()),
                None => Selection::Missing,
            }
        }
    }

    pub fn exists(&self, document: &Value) -> bool {
        !matches!(self.select(document), Selection::Missing)
    }

    /// Write a value at this path.
    ///
    /// Without `create`, the parent containers and the final key must
    /// already exist. With `create`, missing objects and arrays are created
    /// and arrays are padded with `null`.
    pub fn set(&self, document: &mut Value, value: Value, create: bool) -> Result<(), PathError> {
        if self.has_wildcard() {
            return Err(PathError::WildcardInTarget(self.raw.clone()));
        }
        let Some((last, parents)) = self.segments.split_last() else {
            *document = value;
            return Ok(());
        };

        let mut node = document;
        for (i, segment) in parents.iter().enumerate() {
            let next_is_index = matches!(self.segments[i + 1], Segment::Index(_));
            node = child_mut(node, segment, create, next_is_index)
                .ok_or_else(|| PathError::NotFound(self.raw.clone()))?;
        }

        let not_found = || PathError::NotFound(self.raw.clone());
        match last {
            Segment::Key(key) => {
                if create && node.is_null() {
                    *node = Value::Object(Map::new());
                }
                let map = node.as_object_mut().ok_or_else(not_found)?;
                if !create && !map.contains_key(key) {
                    return Err(not_found());
                }
                map.insert(key.clone(), value);
                Ok(())
            }
            Segment::Index(i) => {
                if create && node.is_null() {
                    *node = Value::Array(Vec::new());
                }
                let items = node.as_array_mut().ok_or_else(not_found)?;
                if *i < items.len() {
                    items[*i] = value;
                    Ok(())
                } else if create {
                    items.resize(*i, Value::Null);
                    items.push(value);
                    Ok(())
                } else {
                    Err(not_found())
                }
            }
            Segment::Wildcard => Err(PathError::WildcardInTarget(self.raw.clone())),
        }
    }

    /// Remove the node at this path, returning whether anything was removed
    pub fn remove(&self, document: &mut Value) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            return false;
        };

        let mut node = document;
        for segment in parents {
            node = match child_mut(node, segment, false, false) {
                Some(child) => child,
                None => return false,
            };
        }

        match last {
            Segment::Key(key) => node
                .as_object_mut()
                .map_or(false, |map| map.remove(key).is_some()),
            Segment::Index(i) => match node.as_array_mut() {
                Some(items) if *i < items.len() => {
                    items.remove(*i);
                    true
                }
                _ => false,
            },
            Segment::Wildcard => false,
        }
    }
}

fn empty_container(array: bool) -> Value {
    if array {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

fn child_mut<'a>(
    node: &'a mut Value,
    segment: &Segment,
    create: bool,
    next_is_index: bool,
) -> Option<&'a mut Value> {
    match segment {
        Segment::Key(key) => {
            if create && node.is_null() {
                *node = Value::Object(Map::new());
            }
            let map = node.as_object_mut()?;
            if create && !map.contains_key(key) {
                map.insert(key.clone(), empty_container(next_is_index));
            }
            map.get_mut(key)
        }
        Segment::Index(i) => {
            if create && node.is_null() {
                *node = Value::Array(Vec::new());
            }
            let items = node.as_array_mut()?;
            if create && *i >= items.len() {
                items.resize(*i + 1, Value::Null);
            }
            items.get_mut(*i)
        }
        Segment::Wildcard => None,
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse() {
        assert!(JsonPath::parse("a.b.c").is_ok());
        assert!(JsonPath::parse("values[3].v").is_ok());
        assert!(JsonPath::parse("values[*]").is_ok());
        assert!(JsonPath::parse("$.a").is_ok());
        assert!(JsonPath::parse("[0]").is_ok());
        assert!(JsonPath::parse("$").unwrap().is_root());

        assert_eq!(JsonPath::parse(""), Err(PathError::Empty));
        assert!(matches!(JsonPath::parse("a..b"), Err(PathError::EmptyKey(_))));
        assert!(matches!(JsonPath::parse("a."), Err(PathError::EmptyKey(_))));
        assert!(matches!(JsonPath::parse("values["), Err(PathError::Malformed(_))));
        assert!(matches!(JsonPath::parse("a[1]x"), Err(PathError::Malformed(_))));
        assert!(matches!(
            JsonPath::parse("a[x]"),
            Err(PathError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_select() {
        let doc = json!({
            "device": {"id": "d1"},
            "values": [{"v": 1}, {"v": 2}, {"w": 3}],
            "_TOPIC_LEVEL_": ["plant", "hall1"]
        });

        let p = |s: &str| JsonPath::parse(s).unwrap();
        assert_eq!(p("device.id").select(&doc), Selection::One(json!("d1")));
        assert_eq!(p("values[1].v").select(&doc), Selection::One(json!(2)));
        assert_eq!(p("_TOPIC_LEVEL_[1]").select(&doc), Selection::One(json!("hall1")));
        assert_eq!(
            p("values[*].v").select(&doc),
            Selection::Many(vec![json!(1), json!(2)])
        );
        assert_eq!(p("device.missing").select(&doc), Selection::Missing);
        assert_eq!(p("values[9]").select(&doc), Selection::Missing);
        assert_eq!(p("device[*]").select(&doc), Selection::Many(vec![]));
        assert_eq!(p("$").select(&doc), Selection::One(doc.clone()));
    }

    #[test]
    fn test_set_existing_only() {
        let mut doc = json!({"source": {"id": ""}, "list": [0]});
        let p = |s: &str| JsonPath::parse(s).unwrap();

        p("source.id").set(&mut doc, json!("42"), false).unwrap();
        p("list[0]").set(&mut doc, json!(7), false).unwrap();
        assert_eq!(doc, json!({"source": {"id": "42"}, "list": [7]}));

        assert_eq!(
            p("source.name").set(&mut doc, json!("x"), false),
            Err(PathError::NotFound("source.name".to_string()))
        );
        assert!(p("missing.id").set(&mut doc, json!("x"), false).is_err());
        assert!(p("list[3]").set(&mut doc, json!(1), false).is_err());
    }

    #[test]
    fn test_set_create() {
        let mut doc = json!({});
        let p = |s: &str| JsonPath::parse(s).unwrap();

        p("a.b[2].c").set(&mut doc, json!(true), true).unwrap();
        assert_eq!(doc, json!({"a": {"b": [null, null, {"c": true}]}}));

        assert!(matches!(
            p("a[*]").set(&mut doc, json!(1), true),
            Err(PathError::WildcardInTarget(_))
        ));
    }

    #[test]
    fn test_remove() {
        let mut doc = json!({"a": {"b": 1, "c": [1, 2]}});
        let p = |s: &str| JsonPath::parse(s).unwrap();

        assert!(p("a.b").remove(&mut doc));
        assert!(p("a.c[0]").remove(&mut doc));
        assert!(!p("a.x").remove(&mut doc));
        assert!(!p("z.y").remove(&mut doc));
        assert_eq!(doc, json!({"a": {"c": [2]}}));
    }
}
