//! the subset of JSONPath used by layering actions and substitutions
//!
//! | path                       | segments                              |
//! |----------------------------|---------------------------------------|
//! | `.` / `$` / `$.`           | (root)                                |
//! | `.a.b`                     | `a`, `b`                              |
//! | `$.a[2].c`                 | `a`, `[2]`, `c`                       |
//! | `.a.'filter:authtoken'.b`  | `a`, `filter:authtoken`, `b`          |
//! | `.a["x.y"]`                | `a`, `x.y`                            |
//! | `a.b`                      | `a`, `b` (leading `.` is implied)     |
//!
//! Writes create missing intermediate objects, and arrays are extended with empty objects up to the required index
//! (at most [MAX_ARRAY_EXTENSION] past their end).
use serde_json::{Map, Value};

/// How far past the end of an array a write may reach
pub const MAX_ARRAY_EXTENSION: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("invalid path `{path}`: {reason}")]
    Invalid { path: String, reason: &'static str },
    #[error("cannot descend into {found} at segment {position} of `{path}`")]
    NotAContainer {
        path: String,
        position: usize,
        found: &'static str,
    },
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPath::parse(s)
    }
}

impl JsonPath {
    pub fn root() -> Self {
        Self {
            raw: ".".to_string(),
            segments: vec![],
        }
    }

    pub fn parse(path: &str) -> Result<Self, PathError> {
        let invalid = |reason| PathError::Invalid {
            path: path.to_string(),
            reason,
        };

        let trimmed = path.trim();
        let rest = trimmed.strip_prefix('$').unwrap_or(trimmed);
        let chars: Vec<char> = rest.chars().collect();
        let mut segments = vec![];
        let mut pos = 0;

        if chars == ['.'] {
            return Ok(Self {
                raw: path.to_string(),
                segments,
            });
        }

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    match chars.get(pos) {
                        None => return Err(invalid("trailing `.`")),
                        Some(quote @ ('\'' | '"')) => {
                            let (key, next) =
                                read_quoted(&chars, pos + 1, *quote).ok_or(invalid("unterminated quote"))?;
                            segments.push(Segment::Key(key));
                            pos = next;
                        }
                        Some(_) => {
                            let (key, next) = read_bare(&chars, pos);
                            if key.is_empty() {
                                return Err(invalid("empty key"));
                            }
                            segments.push(Segment::Key(key));
                            pos = next;
                        }
                    }
                }
                '[' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some(quote @ ('\'' | '"')) => {
                            let (key, next) =
                                read_quoted(&chars, pos + 1, *quote).ok_or(invalid("unterminated quote"))?;
                            if chars.get(next) != Some(&']') {
                                return Err(invalid("expected `]`"));
                            }
                            segments.push(Segment::Key(key));
                            pos = next + 1;
                        }
                        _ => {
                            let end = chars[pos..]
                                .iter()
                                .position(|c| *c == ']')
                                .map(|offset| pos + offset)
                                .ok_or(invalid("expected `]`"))?;
                            let digits: String = chars[pos..end].iter().collect();
                            let index = digits
                                .parse::<usize>()
                                .map_err(|_| invalid("array index must be a non-negative integer"))?;
                            segments.push(Segment::Index(index));
                            pos = end + 1;
                        }
                    }
                }
                _ if pos == 0 => {
                    let (key, next) = read_bare(&chars, pos);
                    if key.is_empty() {
                        return Err(invalid("expected `.` or `[`"));
                    }
                    segments.push(Segment::Key(key));
                    pos = next;
                }
                _ => return Err(invalid("expected `.` or `[`")),
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Value at this path, `None` if any segment is missing
    pub fn get<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(data, |current, segment| match segment {
                Segment::Key(key) => current.as_object()?.get(key),
                Segment::Index(index) => current.as_array()?.get(*index),
            })
    }

    pub fn get_mut<'a>(&self, data: &'a mut Value) -> Option<&'a mut Value> {
        self.segments
            .iter()
            .try_fold(data, |current, segment| match segment {
                Segment::Key(key) => current.as_object_mut()?.get_mut(key),
                Segment::Index(index) => current.as_array_mut()?.get_mut(*index),
            })
    }

    /// Write `value` at this path, creating whatever is missing on the way
    ///
    /// `null` along the way is replaced by the container the next segment needs. Any other scalar is an error.
    pub fn set(&self, data: &mut Value, value: Value) -> Result<(), PathError> {
        let mut current = data;
        for (position, segment) in self.segments.iter().enumerate() {
            let rest = &self.segments[position + 1..];
            current = match segment {
                Segment::Key(key) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    let found = type_name(current);
                    let Value::Object(object) = current else {
                        return Err(self.not_a_container(position, found));
                    };
                    object
                        .entry(key.clone())
                        .or_insert_with(|| container_for(rest))
                }
                Segment::Index(index) => {
                    if current.is_null() {
                        *current = Value::Array(vec![]);
                    }
                    let found = type_name(current);
                    let Value::Array(array) = current else {
                        return Err(self.not_a_container(position, found));
                    };
                    if *index > array.len() + MAX_ARRAY_EXTENSION {
                        return Err(PathError::Invalid {
                            path: self.raw.clone(),
                            reason: "array index too far past the end",
                        });
                    }
                    while array.len() < *index {
                        array.push(Value::Object(Map::new()));
                    }
                    if array.len() == *index {
                        array.push(container_for(rest));
                    }
                    &mut array[*index]
                }
            };
        }

        *current = value;
        Ok(())
    }

    /// Remove and return the value at this path
    ///
    /// Removing the root leaves `null` behind.
    pub fn remove(&self, data: &mut Value) -> Option<Value> {
        let Some((last, parents)) = self.segments.split_last() else {
            return Some(std::mem::take(data));
        };

        let parent = parents
            .iter()
            .try_fold(data, |current, segment| match segment {
                Segment::Key(key) => current.as_object_mut()?.get_mut(key),
                Segment::Index(index) => current.as_array_mut()?.get_mut(*index),
            })?;

        match last {
            Segment::Key(key) => parent.as_object_mut()?.shift_remove(key),
            Segment::Index(index) => {
                let array = parent.as_array_mut()?;
                (*index < array.len()).then(|| array.remove(*index))
            }
        }
    }

    fn not_a_container(&self, position: usize, found: &'static str) -> PathError {
        PathError::NotAContainer {
            path: self.raw.clone(),
            position,
            found,
        }
    }
}

fn read_quoted(chars: &[char], start: usize, quote: char) -> Option<(String, usize)> {
    let end = chars[start..].iter().position(|c| *c == quote)? + start;
    Some((chars[start..end].iter().collect(), end + 1))
}

fn read_bare(chars: &[char], start: usize) -> (String, usize) {
    let end = chars[start..]
        .iter()
        .position(|c| matches!(c, '.' | '[' | ']'))
        .map_or(chars.len(), |offset| start + offset);
    (chars[start..end].iter().collect(), end)
}

fn container_for(rest: &[Segment]) -> Value {
    match rest.first() {
        Some(Segment::Index(_)) => Value::Array(vec![]),
        Some(Segment::Key(_)) => Value::Object(Map::new()),
        None => Value::Null,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn key(k: &str) -> Segment {
        Segment::Key(k.to_string())
    }

    fn path(p: &str) -> JsonPath {
        JsonPath::parse(p).expect("path must parse")
    }

    #[test]
    fn parse_root() {
        for root in [".", "$", "$.", "", " . "] {
            assert!(path(root).is_root(), "{root:?} must be the root");
        }
    }

    #[test]
    fn parse_segments() {
        assert_eq!(path(".a.b").segments(), &[key("a"), key("b")]);
        assert_eq!(
            path("$.a[2].c").segments(),
            &[key("a"), Segment::Index(2), key("c")]
        );
        assert_eq!(
            path(".a.'filter:authtoken'.b").segments(),
            &[key("a"), key("filter:authtoken"), key("b")]
        );
        assert_eq!(path(r#".a["x.y"]"#).segments(), &[key("a"), key("x.y")]);
        assert_eq!(path("a.b").segments(), &[key("a"), key("b")]);
        assert_eq!(path(".a[0][1]").segments(), &[key("a"), Segment::Index(0), Segment::Index(1)]);
    }

    #[test]
    fn parse_errors() {
        for invalid in [".a.", ".a..b", ".a[x]", ".a[-1]", ".a[1", ".'open", ".a]b"] {
            assert!(JsonPath::parse(invalid).is_err(), "{invalid:?} must not parse");
        }
    }

    #[test]
    fn get() {
        let data = json!({"a": {"b": [1, {"c": "d"}]}, "filter:authtoken": {"x": true}});

        assert_eq!(path(".").get(&data), Some(&data));
        assert_eq!(path(".a.b[1].c").get(&data), Some(&json!("d")));
        assert_eq!(path(".'filter:authtoken'.x").get(&data), Some(&json!(true)));
        assert_eq!(path(".a.b[5]").get(&data), None);
        assert_eq!(path(".a.missing").get(&data), None);
        assert_eq!(path(".a.b.c").get(&data), None);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut data = json!({});
        path(".a.b[2].c").set(&mut data, json!(42)).unwrap();

        assert_eq!(data, json!({"a": {"b": [{}, {}, {"c": 42}]}}));
    }

    #[test]
    fn set_nested_arrays() {
        let mut data = Value::Null;
        path(".a[1][0]").set(&mut data, json!("x")).unwrap();

        assert_eq!(data, json!({"a": [{}, ["x"]]}));
    }

    #[test]
    fn set_overwrites_and_keeps_siblings() {
        let mut data = json!({"a": {"b": 1, "c": 2}});
        path(".a.b").set(&mut data, json!({"new": true})).unwrap();

        assert_eq!(data, json!({"a": {"b": {"new": true}, "c": 2}}));
    }

    #[test]
    fn set_root() {
        let mut data = json!({"a": 1});
        path(".").set(&mut data, json!("scalar")).unwrap();

        assert_eq!(data, json!("scalar"));
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut data = json!({"a": "string"});

        assert_eq!(
            path(".a.b").set(&mut data, json!(1)),
            Err(PathError::NotAContainer {
                path: ".a.b".into(),
                position: 1,
                found: "a string"
            })
        );
    }

    #[test]
    fn set_far_past_the_end_fails() {
        let mut data = json!({"a": [1]});

        assert!(matches!(
            path(".a[4000000000]").set(&mut data, json!(1)),
            Err(PathError::Invalid { .. })
        ));
        assert_eq!(data, json!({"a": [1]}));

        path(&format!(".a[{}]", 1 + MAX_ARRAY_EXTENSION)).set(&mut data, json!(2)).unwrap();
        assert_eq!(data["a"].as_array().unwrap().len(), 2 + MAX_ARRAY_EXTENSION);
    }

    #[test]
    fn remove() {
        let mut data = json!({"a": {"x": 1, "y": 2}, "b": [1, 2, 3]});

        assert_eq!(path(".a.x").remove(&mut data), Some(json!(1)));
        assert_eq!(path(".b[1]").remove(&mut data), Some(json!(2)));
        assert_eq!(path(".b[7]").remove(&mut data), None);
        assert_eq!(path(".missing.x").remove(&mut data), None);
        assert_eq!(data, json!({"a": {"y": 2}, "b": [1, 3]}));
    }
}
