//! Instance mutation applied before structural validation
//!
//! Walks the schema alongside the instance and, depending on [`EngineOptions`],
//! coerces scalar types, inserts declared defaults, and strips properties that an
//! `additionalProperties: false` schema does not declare.

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::{resolve_local_ref, EngineOptions};

/// Maximum number of `$ref` hops followed from any one location
const MAX_REF_DEPTH: usize = 32;

pub(crate) struct Mutator<'s> {
    root: &'s Value,
    options: EngineOptions,
}

impl<'s> Mutator<'s> {
    pub(crate) fn new(root: &'s Value, options: EngineOptions) -> Self {
        Self { root, options }
    }

    /// Mutate `instance` in place according to the root schema
    pub(crate) fn apply(&self, instance: &mut Value) {
        if self.options.mutates() {
            self.walk(self.root, instance, 0);
        }
    }

    fn walk(&self, schema: &'s Value, instance: &mut Value, ref_depth: usize) {
        // Boolean schemas carry nothing to apply
        let Some(schema) = schema.as_object() else {
            return;
        };

        if self.options.coerce_types {
            if let Some(declared) = schema.get("type") {
                coerce_to_declared(declared, instance);
            }
        }

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            if ref_depth < MAX_REF_DEPTH {
                if let Some(target) = self.resolve(reference) {
                    self.walk(target, instance, ref_depth + 1);
                }
            }
        }

        if let Some(all_of) = schema.get("allOf").and_then(Value::as_array) {
            for sub in all_of {
                self.walk(sub, instance, ref_depth);
            }
        }

        for keyword in ["anyOf", "oneOf"] {
            if let Some(branches) = schema.get(keyword).and_then(Value::as_array) {
                self.walk_branches(branches, instance, ref_depth);
            }
        }

        if let Some(condition) = schema.get("if") {
            let next = if self.accepts(condition, instance) {
                schema.get("then")
            } else {
                schema.get("else")
            };
            if let Some(sub) = next {
                self.walk(sub, instance, ref_depth);
            }
        }

        match instance {
            Value::Object(map) => self.walk_object(schema, map, ref_depth),
            Value::Array(items) => self.walk_array(schema, items, ref_depth),
            _ => {}
        }
    }

    fn walk_object(&self, schema: &'s Map<String, Value>, map: &mut Map<String, Value>, depth: usize) {
        let properties = schema.get("properties").and_then(Value::as_object);
        let patterns: Vec<(Regex, &'s Value)> = schema
            .get("patternProperties")
            .and_then(Value::as_object)
            .map(|patterns| {
                patterns
                    .iter()
                    .filter_map(|(pattern, sub)| Regex::new(pattern).ok().map(|re| (re, sub)))
                    .collect()
            })
            .unwrap_or_default();
        let additional = schema.get("additionalProperties");

        if self.options.use_defaults {
            if let Some(properties) = properties {
                for (name, sub) in properties {
                    if map.contains_key(name) {
                        continue;
                    }
                    if let Some(default) = sub.get("default") {
                        map.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        if self.options.remove_additional && additional == Some(&Value::Bool(false)) {
            map.retain(|key, _| {
                properties.is_some_and(|p| p.contains_key(key))
                    || patterns.iter().any(|(re, _)| re.is_match(key))
            });
        }

        let additional_schema = additional.filter(|value| value.is_object());
        for (key, value) in map.iter_mut() {
            let mut declared = false;
            if let Some(sub) = properties.and_then(|p| p.get(key)) {
                self.walk(sub, value, depth);
                declared = true;
            }
            for (re, sub) in &patterns {
                if re.is_match(key) {
                    self.walk(sub, value, depth);
                    declared = true;
                }
            }
            if !declared {
                if let Some(sub) = additional_schema {
                    self.walk(sub, value, depth);
                }
            }
        }
    }

    fn walk_array(&self, schema: &'s Map<String, Value>, items: &mut Vec<Value>, depth: usize) {
        // Draft 2020-12 `prefixItems`, or the older array form of `items`
        let (tuple, rest) = match schema.get("prefixItems").and_then(Value::as_array) {
            Some(prefix) => (Some(prefix), schema.get("items")),
            None => match schema.get("items") {
                Some(Value::Array(tuple)) => (Some(tuple), schema.get("additionalItems")),
                other => (None, other),
            },
        };

        let Some(tuple) = tuple else {
            if let Some(sub) = rest {
                for item in items.iter_mut() {
                    self.walk(sub, item, depth);
                }
            }
            return;
        };

        if self.options.use_defaults {
            // Only contiguous trailing positions are filled; a gap would change indices
            for sub in tuple.iter().skip(items.len()) {
                match sub.get("default") {
                    Some(default) => items.push(default.clone()),
                    None => break,
                }
            }
        }

        for (index, item) in items.iter_mut().enumerate() {
            match tuple.get(index) {
                Some(sub) => self.walk(sub, item, depth),
                None => {
                    if let Some(sub) = rest {
                        self.walk(sub, item, depth);
                    }
                }
            }
        }
    }

    /// Mutate a copy per branch and keep the first copy its branch accepts.
    ///
    /// The instance is left untouched when no branch accepts its copy.
    fn walk_branches(&self, branches: &'s [Value], instance: &mut Value, depth: usize) {
        for branch in branches {
            let mut candidate = instance.clone();
            self.walk(branch, &mut candidate, depth);
            if self.accepts(branch, &candidate) {
                *instance = candidate;
                return;
            }
        }
    }

    /// Whether `instance` is valid against a subschema of the root
    fn accepts(&self, subschema: &Value, instance: &Value) -> bool {
        let mut document = match subschema {
            Value::Bool(accepted) => return *accepted,
            Value::Object(map) => map.clone(),
            _ => return false,
        };
        // Carry the root's dialect and definitions so local refs still resolve
        if let Some(root) = self.root.as_object() {
            for key in ["$schema", "$defs", "definitions"] {
                if let Some(value) = root.get(key) {
                    document.entry(key).or_insert_with(|| value.clone());
                }
            }
        }
        jsonschema::validator_for(&Value::Object(document))
            .map(|validator| validator.is_valid(instance))
            .unwrap_or(false)
    }

    fn resolve(&self, reference: &str) -> Option<&'s Value> {
        resolve_local_ref(self.root, reference)
    }
}

/// Coerce `value` to the first declared type that accepts it, unless it already
/// matches one of the declared types.
fn coerce_to_declared(declared: &Value, value: &mut Value) {
    let types: Vec<&str> = match declared {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => return,
    };

    if types.iter().any(|name| matches_type(name, value)) {
        return;
    }

    for name in types {
        if let Some(coerced) = coerce(name, value) {
            *value = coerced;
            return;
        }
    }
}

fn matches_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => is_integral(value),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => false,
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn coerce(target: &str, value: &Value) -> Option<Value> {
    match target {
        "string" => match value {
            Value::Number(n) => Some(Value::String(number_string(n))),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            Value::Null => Some(Value::String(String::new())),
            _ => None,
        },
        "number" => match value {
            Value::String(s) => parse_numeric(s).map(number_value),
            Value::Bool(b) => Some(Value::from(u8::from(*b))),
            Value::Null => Some(Value::from(0)),
            _ => None,
        },
        "integer" => match value {
            Value::String(s) => parse_numeric(s)
                .filter(|f| f.fract() == 0.0)
                .map(number_value),
            Value::Bool(b) => Some(Value::from(u8::from(*b))),
            Value::Null => Some(Value::from(0)),
            _ => None,
        },
        "boolean" => match value {
            Value::String(s) if s == "true" => Some(Value::Bool(true)),
            Value::String(s) if s == "false" => Some(Value::Bool(false)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f == 1.0 => Some(Value::Bool(true)),
                Some(f) if f == 0.0 => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Null => Some(Value::Bool(false)),
            _ => None,
        },
        "null" => match value {
            Value::String(s) if s.is_empty() => Some(Value::Null),
            Value::Number(n) if n.as_f64() == Some(0.0) => Some(Value::Null),
            Value::Bool(false) => Some(Value::Null),
            _ => None,
        },
        _ => None,
    }
}

/// Render a number the way JavaScript does: integral floats lose their `.0`
fn number_string(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

fn parse_numeric(s: &str) -> Option<f64> {
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}
