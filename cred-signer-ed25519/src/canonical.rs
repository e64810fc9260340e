//! Minimal JCS-style canonicalization: object keys sorted lexicographically,
//! no whitespace. Ported from the credential-canonicalization approach used
//! elsewhere in this codebase, trimmed to what signing needs (no hashing).

use serde::Serialize;
use serde_json::Value;

pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    Ok(canonicalize_value(&v))
}

fn canonicalize_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());

            let mut out = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string key always serializes"));
                out.push(':');
                out.push_str(&canonicalize_value(v));
            }
            out.push('}');
            out
        }
        Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize_value(v));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys() {
        let v = json!({"b": 1, "a": 2});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn sorts_nested_object_keys() {
        let v = json!({"z": {"y": 1, "x": 2}});
        assert_eq!(canonicalize(&v).unwrap(), r#"{"z":{"x":2,"y":1}}"#);
    }
}
