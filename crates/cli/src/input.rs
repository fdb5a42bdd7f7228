// Document loading
//
// Schemas and documents may be JSON or YAML; the format follows the file extension.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

/// Read and parse one JSON or YAML file
pub fn load_document(path: &str) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))?;
    parse_document(path, &content)
}

fn parse_document(path: &str, content: &str) -> Result<Value> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(content).with_context(|| format!("Failed to parse YAML: {}", path))
        }
        Some("json") => {
            serde_json::from_str(content).with_context(|| format!("Failed to parse JSON: {}", path))
        }
        // JSON is a subset of YAML, so try the stricter parser first
        _ => serde_json::from_str(content)
            .or_else(|_| serde_yaml::from_str(content))
            .with_context(|| format!("Failed to parse file (tried JSON, YAML): {}", path)),
    }
}
