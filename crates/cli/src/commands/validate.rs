// Document validation

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use schemaworks_pool::{BatchItemOutcome, ErrorRecord, ValidatorPool};
use serde::Serialize;
use serde_json::Value;

use crate::input::load_document;
use crate::output::{error_line, print_table_header, print_table_row, OutputFormat};

/// Validation result of one input file
#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
    /// Per-item results when the file was validated as a batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<BatchItemOutcome>>,
    /// The document after defaults, coercion and property stripping
    pub data: Value,
}

/// Returns `Ok(false)` when any document is invalid
pub async fn run(
    pool: &ValidatorPool,
    output: OutputFormat,
    quiet: bool,
    schema_path: &str,
    files: &[String],
    batch: bool,
) -> Result<bool> {
    let schema = load_document(schema_path)?;
    let documents = files
        .iter()
        .map(|file| load_document(file).map(|doc| (file.clone(), doc)))
        .collect::<Result<Vec<_>>>()?;

    let checks = documents
        .into_iter()
        .map(|(file, document)| validate_file(pool, schema.clone(), file, document, batch));
    let reports = join_all(checks).await.into_iter().collect::<Result<Vec<_>>>()?;

    let all_valid = reports.iter().all(|report| report.valid);
    if output.is_text() {
        print_reports(&reports, quiet);
    } else {
        output.print_value(&reports)?;
    }
    Ok(all_valid)
}

async fn validate_file(
    pool: &ValidatorPool,
    schema: Value,
    file: String,
    document: Value,
    batch: bool,
) -> Result<FileReport> {
    if !batch {
        let outcome = pool
            .validate(schema, document)
            .await
            .with_context(|| format!("Failed to validate {}", file))?;
        return Ok(FileReport {
            file,
            valid: outcome.valid,
            errors: outcome.errors,
            items: None,
            data: outcome.data,
        });
    }

    let Value::Array(items) = document else {
        bail!("Batch input must be an array of items: {}", file);
    };
    let results = pool
        .validate_batch(schema, items)
        .await
        .with_context(|| format!("Failed to validate {}", file))?;

    Ok(FileReport {
        file,
        valid: results.iter().all(|item| item.valid),
        errors: Vec::new(),
        data: Value::Array(results.iter().map(|item| item.data.clone()).collect()),
        items: Some(results),
    })
}

fn print_reports(reports: &[FileReport], quiet: bool) {
    if reports.is_empty() {
        return;
    }

    if !quiet {
        print_table_header(&[("FILE", 40), ("VALID", 5), ("ERRORS", 6)]);
    }
    for report in reports {
        let error_count: usize = match &report.items {
            Some(items) => items.iter().map(|item| item.errors.len()).sum(),
            None => report.errors.len(),
        };
        if quiet && report.valid {
            continue;
        }
        let error_count = error_count.to_string();
        print_table_row(&[
            (report.file.as_str(), 40),
            (if report.valid { "yes" } else { "no" }, 5),
            (error_count.as_str(), 6),
        ]);

        for error in &report.errors {
            println!("{}", error_line(error));
        }
        for item in report.items.iter().flatten().filter(|item| !item.valid) {
            println!("  item {}:", item.index);
            for error in &item.errors {
                println!("  {}", error_line(error));
            }
        }
    }
}
