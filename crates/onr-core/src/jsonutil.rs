//! Restricted JSONPath helpers over `serde_json::Value`.
//!
//! Supported syntax:
//! - `$.a.b.c`
//! - `$.items[0].x`
//! - `$.items[*].x` (wildcard fans out over array elements)
//!
//! Readers sum or first-match over wildcard results; writers create
//! intermediate objects as needed.

use serde_json::{Map, Value};

/// One parsed path segment: an object key plus an optional array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub index: Option<ArrayIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayIndex {
    At(usize),
    Star,
}

/// Parse a restricted JSONPath. Must start with `$.` and contain at least
/// one segment.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let p = path.trim();
    let Some(rest) = p.strip_prefix("$.") else {
        return Err(format!("path must start with '$.': {p:?}"));
    };
    if rest.is_empty() {
        return Err("path has no segments".to_string());
    }
    let mut out = Vec::new();
    for part in rest.split('.') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format!("empty segment in path {p:?}"));
        }
        out.push(parse_segment(part, p)?);
    }
    Ok(out)
}

fn parse_segment(part: &str, full: &str) -> Result<Segment, String> {
    let Some(open) = part.find('[') else {
        return Ok(Segment { name: part.to_string(), index: None });
    };
    let Some(close) = part.rfind(']') else {
        return Err(format!("unclosed '[' in segment {part:?} of {full:?}"));
    };
    if close < open {
        return Err(format!("malformed index in segment {part:?} of {full:?}"));
    }
    let name = part[..open].to_string();
    let inner = part[open + 1..close].trim();
    let index = if inner == "*" {
        ArrayIndex::Star
    } else {
        let n: usize = inner
            .parse()
            .map_err(|_| format!("invalid array index {inner:?} in {full:?}"))?;
        ArrayIndex::At(n)
    };
    Ok(Segment { name, index: Some(index) })
}

/// Collect all terminal values matched by a restricted JSONPath.
pub fn get_values<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let Ok(segs) = parse_path(path) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    collect(root, &segs, &mut out);
    out
}

fn collect<'a>(cur: &'a Value, segs: &[Segment], out: &mut Vec<&'a Value>) {
    let Some(seg) = segs.first() else {
        out.push(cur);
        return;
    };
    let rest = &segs[1..];
    let mut node = cur;
    if !seg.name.is_empty() {
        let Some(next) = node.get(&seg.name) else {
            return;
        };
        node = next;
    }
    match seg.index {
        None => collect(node, rest, out),
        Some(ArrayIndex::At(i)) => {
            if let Some(item) = node.get(i) {
                collect(item, rest, out);
            }
        }
        Some(ArrayIndex::Star) => {
            if let Some(arr) = node.as_array() {
                for item in arr {
                    collect(item, rest, out);
                }
            }
        }
    }
}

/// Read an integer from a restricted JSONPath, summing wildcard matches.
/// Numeric strings coerce; missing paths read as 0.
pub fn get_int(root: &Value, path: &str) -> i64 {
    get_values(root, path).iter().map(|v| coerce_int(v)).sum()
}

/// Read a float from a restricted JSONPath, summing wildcard matches.
pub fn get_float(root: &Value, path: &str) -> f64 {
    get_values(root, path).iter().map(|v| coerce_float(v)).sum()
}

/// Read a string from a restricted JSONPath. With wildcards, the first
/// non-empty string wins.
pub fn get_string(root: &Value, path: &str) -> String {
    for v in get_values(root, path) {
        if let Some(s) = v.as_str() {
            if !s.trim().is_empty() {
                return s.to_string();
            }
        }
    }
    String::new()
}

/// Coerce common numeric-like values to i64. Arrays sum their elements.
pub fn coerce_int(v: &Value) -> i64 {
    match v {
        Value::Number(n) => n.as_i64().unwrap_or_else(|| n.as_f64().unwrap_or(0.0) as i64),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        Value::Array(items) => items.iter().map(coerce_int).sum(),
        _ => 0,
    }
}

/// Coerce common numeric-like values to f64.
pub fn coerce_float(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Set the value at a restricted JSONPath, creating intermediate objects.
/// Wildcards fan out over existing array elements; indexed segments only
/// write when the element exists.
pub fn set_value(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segs = parse_path(path)?;
    set_at(root, &segs, &value);
    Ok(())
}

fn set_at(cur: &mut Value, segs: &[Segment], value: &Value) {
    let Some(seg) = segs.first() else {
        return;
    };
    let rest = &segs[1..];

    if seg.index.is_none() && rest.is_empty() {
        if let Some(map) = ensure_object(cur) {
            map.insert(seg.name.clone(), value.clone());
        }
        return;
    }

    let Some(node) = descend_mut(cur, &seg.name, rest.is_empty()) else {
        return;
    };
    match seg.index {
        None => set_at(node, rest, value),
        Some(ArrayIndex::At(i)) => {
            if let Some(item) = node.get_mut(i) {
                if rest.is_empty() {
                    *item = value.clone();
                } else {
                    set_at(item, rest, value);
                }
            }
        }
        Some(ArrayIndex::Star) => {
            if let Some(arr) = node.as_array_mut() {
                for item in arr {
                    if rest.is_empty() {
                        *item = value.clone();
                    } else {
                        set_at(item, rest, value);
                    }
                }
            }
        }
    }
}

fn descend_mut<'a>(cur: &'a mut Value, name: &str, _terminal: bool) -> Option<&'a mut Value> {
    if name.is_empty() {
        return Some(cur);
    }
    let map = ensure_object(cur)?;
    Some(map.entry(name.to_string()).or_insert(Value::Object(Map::new())))
}

fn ensure_object(v: &mut Value) -> Option<&mut Map<String, Value>> {
    if !v.is_object() {
        if v.is_null() {
            *v = Value::Object(Map::new());
        } else {
            return None;
        }
    }
    v.as_object_mut()
}

/// True when the final path segment resolves to an existing value.
pub fn path_exists(root: &Value, path: &str) -> bool {
    !get_values(root, path).is_empty()
}

/// Delete the value at a restricted JSONPath. Absent paths succeed silently.
pub fn delete_value(root: &mut Value, path: &str) -> Result<(), String> {
    let segs = parse_path(path)?;
    delete_at(root, &segs);
    Ok(())
}

fn delete_at(cur: &mut Value, segs: &[Segment]) {
    let Some(seg) = segs.first() else {
        return;
    };
    let rest = &segs[1..];

    if rest.is_empty() && seg.index.is_none() {
        if let Some(map) = cur.as_object_mut() {
            map.remove(&seg.name);
        }
        return;
    }

    let mut node = cur;
    if !seg.name.is_empty() {
        let Some(next) = node.get_mut(&seg.name) else {
            return;
        };
        node = next;
    }
    match seg.index {
        None => delete_at(node, rest),
        Some(ArrayIndex::At(i)) => {
            if rest.is_empty() {
                if let Some(arr) = node.as_array_mut() {
                    if i < arr.len() {
                        arr.remove(i);
                    }
                }
            } else if let Some(item) = node.get_mut(i) {
                delete_at(item, rest);
            }
        }
        Some(ArrayIndex::Star) => {
            if let Some(arr) = node.as_array_mut() {
                if rest.is_empty() {
                    arr.clear();
                } else {
                    for item in arr {
                        delete_at(item, rest);
                    }
                }
            }
        }
    }
}

/// Copy the first value matched by `from` to `to`, then delete `from`.
/// A missing source is a silent no-op.
pub fn rename_value(root: &mut Value, from: &str, to: &str) -> Result<(), String> {
    parse_path(from)?;
    parse_path(to)?;
    let found = get_values(root, from).first().map(|v| (*v).clone());
    let Some(v) = found else {
        return Ok(());
    };
    set_value(root, to, v)?;
    delete_value(root, from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_int_simple_and_nested() {
        let v = json!({"usage": {"prompt_tokens": 3, "completion_tokens": 5}});
        assert_eq!(get_int(&v, "$.usage.prompt_tokens"), 3);
        assert_eq!(get_int(&v, "$.usage.missing"), 0);
    }

    #[test]
    fn test_get_int_wildcard_sums() {
        let v = json!({"items": [{"n": 1}, {"n": 2}, {"n": 3}]});
        assert_eq!(get_int(&v, "$.items[*].n"), 6);
        assert_eq!(get_int(&v, "$.items[1].n"), 2);
    }

    #[test]
    fn test_get_string_wildcard_first_non_empty() {
        let v = json!({"c": [{"t": ""}, {"t": "hello"}]});
        assert_eq!(get_string(&v, "$.c[*].t"), "hello");
        assert_eq!(get_string(&v, "$.c[0].t"), "");
    }

    #[test]
    fn test_coerce_int_string_and_array() {
        assert_eq!(coerce_int(&json!(" 42 ")), 42);
        assert_eq!(coerce_int(&json!([1, 2, "3"])), 6);
        assert_eq!(coerce_int(&json!(null)), 0);
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut v = json!({});
        set_value(&mut v, "$.a.b.c", json!(1)).unwrap();
        assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_wildcard_over_array() {
        let mut v = json!({"msgs": [{"role": "u"}, {"role": "a"}]});
        set_value(&mut v, "$.msgs[*].seen", json!(true)).unwrap();
        assert_eq!(
            v,
            json!({"msgs": [{"role": "u", "seen": true}, {"role": "a", "seen": true}]})
        );
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut v = json!({"a": 1});
        delete_value(&mut v, "$.b.c").unwrap();
        assert_eq!(v, json!({"a": 1}));
        delete_value(&mut v, "$.a").unwrap();
        assert_eq!(v, json!({}));
    }

    #[test]
    fn test_rename_copies_then_deletes() {
        let mut v = json!({"max_tokens": 100});
        rename_value(&mut v, "$.max_tokens", "$.max_output_tokens").unwrap();
        assert_eq!(v, json!({"max_output_tokens": 100}));

        // missing source is a no-op
        rename_value(&mut v, "$.nope", "$.other").unwrap();
        assert_eq!(v, json!({"max_output_tokens": 100}));
    }

    #[test]
    fn test_parse_path_rejects_bad_input() {
        assert!(parse_path("usage.total").is_err());
        assert!(parse_path("$.").is_err());
        assert!(parse_path("$.a[b]").is_err());
        assert!(parse_path("$.a[1").is_err());
    }
}
