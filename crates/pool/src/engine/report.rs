//! Normalization of `jsonschema` errors into [`ErrorRecord`]s

use jsonschema::error::ValidationErrorKind;
use jsonschema::ValidationError;
use serde_json::{json, Value};

use super::resolve_local_ref;
use crate::protocol::ErrorRecord;

/// Maximum number of `$ref` hops followed while resolving one schema path
const MAX_REF_HOPS: usize = 32;

pub(crate) fn error_record(error: &ValidationError<'_>, schema: &Value) -> ErrorRecord {
    let schema_path = error.schema_path.to_string();
    let keyword = schema_path
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("schema")
        .to_string();
    let keyword_value = resolve_schema_path(schema, &schema_path);

    ErrorRecord {
        instance_path: error.instance_path.to_string(),
        schema_path: format!("#{}", schema_path),
        params: params(&error.kind, &keyword, keyword_value),
        keyword,
        message: error.to_string(),
    }
}

/// Follow a validator schema path through the schema document.
///
/// Paths may step through `$ref` keywords, which are resolved against the root.
fn resolve_schema_path<'s>(root: &'s Value, path: &str) -> Option<&'s Value> {
    let mut current = root;
    let mut hops = 0;
    for segment in path.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) if segment == "$ref" => {
                hops += 1;
                if hops > MAX_REF_HOPS {
                    return None;
                }
                let reference = map.get("$ref")?.as_str()?;
                resolve_local_ref(root, reference)?
            }
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn params(kind: &ValidationErrorKind, keyword: &str, keyword_value: Option<&Value>) -> Value {
    match kind {
        ValidationErrorKind::Required { property } => json!({ "missingProperty": property }),
        ValidationErrorKind::AdditionalProperties { unexpected } => {
            json!({ "additionalProperties": unexpected })
        }
        _ => {
            let Some(value) = keyword_value else {
                return json!({});
            };
            match keyword {
                "minimum" => json!({ "comparison": ">=", "limit": value }),
                "maximum" => json!({ "comparison": "<=", "limit": value }),
                "exclusiveMinimum" => json!({ "comparison": ">", "limit": value }),
                "exclusiveMaximum" => json!({ "comparison": "<", "limit": value }),
                "minLength" | "maxLength" | "minItems" | "maxItems" | "minProperties"
                | "maxProperties" | "multipleOf" => json!({ "limit": value }),
                "type" => json!({ "type": value }),
                "enum" => json!({ "allowedValues": value }),
                "const" => json!({ "allowedValue": value }),
                "pattern" => json!({ "pattern": value }),
                "format" => json!({ "format": value }),
                _ => json!({}),
            }
        }
    }
}
