//! Minimal JSON-schema check for tool arguments: required keys present,
//! declared property types respected. Anything deeper is the executor's
//! business; this is the line between "Invalid parameters" (no retry) and a
//! runtime failure.

use serde_json::Value;

pub fn validate(args: &Value, schema: &Value) -> Result<(), String> {
    let obj = match args {
        Value::Object(map) => map,
        Value::Null => {
            // Treat null as an empty object; only fails if something is required.
            return match schema.get("required").and_then(|r| r.as_array()) {
                Some(req) if !req.is_empty() => {
                    Err(format!("missing required field: {}", field_name(&req[0])))
                }
                _ => Ok(()),
            };
        }
        other => return Err(format!("arguments must be an object, got {}", kind(other))),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let name = field_name(field);
            if !obj.contains_key(name) {
                return Err(format!("missing required field: {}", name));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in props {
            let value = match obj.get(name) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                if !type_matches(value, expected) {
                    return Err(format!(
                        "field '{}' should be {}, got {}",
                        name,
                        expected,
                        kind(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn field_name(v: &Value) -> &str {
    v.as_str().unwrap_or("?")
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn accepts_valid_args() {
        assert!(validate(&json!({"query": "ton price", "limit": 5}), &schema()).is_ok());
        assert!(validate(&json!({"query": "x"}), &schema()).is_ok());
    }

    #[test]
    fn rejects_missing_required() {
        let err = validate(&json!({"limit": 5}), &schema()).unwrap_err();
        assert!(err.contains("query"));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = validate(&json!({"query": 5}), &schema()).unwrap_err();
        assert!(err.contains("string"));
    }

    #[test]
    fn rejects_non_object_args() {
        assert!(validate(&json!([1, 2]), &schema()).is_err());
    }

    #[test]
    fn null_args_ok_without_required() {
        let s = json!({"type": "object", "properties": {}});
        assert!(validate(&Value::Null, &s).is_ok());
        assert!(validate(&Value::Null, &schema()).is_err());
    }
}
