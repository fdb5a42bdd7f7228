// Schema compilation check

use anyhow::Result;
use schemaworks_pool::{PoolError, SchemaSummary, ValidatorPool};
use serde::Serialize;

use crate::input::load_document;
use crate::output::{print_field, OutputFormat};

#[derive(Debug, Serialize)]
struct CompileReport {
    schema: String,
    compiled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    summary: SchemaSummary,
}

/// Returns `Ok(false)` when the schema does not compile
pub async fn run(
    pool: &ValidatorPool,
    output: OutputFormat,
    quiet: bool,
    schema_path: &str,
) -> Result<bool> {
    let schema = load_document(schema_path)?;
    let summary = SchemaSummary::of(&schema);

    let error = match pool.compile(schema).await {
        Ok(()) => None,
        Err(PoolError::SchemaCompile(message)) => Some(message),
        Err(e) => return Err(e.into()),
    };

    let report = CompileReport {
        schema: schema_path.to_string(),
        compiled: error.is_none(),
        error,
        summary,
    };

    if !output.is_text() {
        output.print_value(&report)?;
    } else if let Some(error) = &report.error {
        eprintln!("Schema {} does not compile: {}", schema_path, error);
    } else if !quiet {
        print_field("Schema", &report.schema);
        print_field(
            "Type",
            report.summary.schema_type.as_deref().unwrap_or("(any)"),
        );
        print_field("Properties", &report.summary.property_count.to_string());
        print_field("Required", &report.summary.required_count.to_string());
        println!("Schema compiles.");
    }

    Ok(report.compiled)
}
