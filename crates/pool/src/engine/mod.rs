//! Validator engine
//!
//! Compiles JSON-schema documents with the `jsonschema` crate and validates
//! instances against them. Before structural validation the instance is mutated
//! in place according to [`EngineOptions`]:
//!
//! - `remove_additional` strips properties an `additionalProperties: false` schema
//!   does not declare
//! - `use_defaults` inserts declared `default` values for missing properties
//! - `coerce_types` converts scalars to the declared `type`
//!
//! Compiled schemas are never cached; every call compiles from scratch.

mod mutation;
mod report;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{BatchItemOutcome, ErrorRecord, ValidationOutcome};
use mutation::Mutator;

/// Engine behavior switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Report every error instead of stopping at the first
    pub all_errors: bool,
    /// Strip properties not declared by an `additionalProperties: false` schema
    pub remove_additional: bool,
    /// Insert schema-declared defaults into the instance
    pub use_defaults: bool,
    /// Coerce scalars to the schema-declared type
    pub coerce_types: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            all_errors: true,
            remove_additional: true,
            use_defaults: true,
            coerce_types: true,
        }
    }
}

impl EngineOptions {
    /// Whether any option changes the instance
    pub fn mutates(&self) -> bool {
        self.remove_additional || self.use_defaults || self.coerce_types
    }
}

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task arrived before `init`
    #[error("validator engine not initialized")]
    Uninitialized,

    /// The schema is malformed
    #[error("schema compilation failed: {0}")]
    SchemaCompile(String),
}

/// JSON-schema compiler and validator
#[derive(Debug, Clone)]
pub struct ValidatorEngine {
    options: EngineOptions,
}

impl ValidatorEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Compile a schema into an executable validator
    pub fn compile<'s>(&self, schema: &'s Value) -> Result<CompiledSchema<'s>, EngineError> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| EngineError::SchemaCompile(e.to_string()))?;

        Ok(CompiledSchema {
            schema,
            validator,
            options: self.options,
        })
    }
}

/// Resolve a local `$ref` (`#` or `#/json/pointer`) against `root`
pub(crate) fn resolve_local_ref<'s>(root: &'s Value, reference: &str) -> Option<&'s Value> {
    match reference {
        "#" => Some(root),
        _ => reference
            .strip_prefix('#')
            .filter(|pointer| pointer.starts_with('/'))
            .and_then(|pointer| root.pointer(pointer)),
    }
}

/// A compiled schema bound to the document it was built from
pub struct CompiledSchema<'s> {
    schema: &'s Value,
    validator: jsonschema::Validator,
    options: EngineOptions,
}

impl CompiledSchema<'_> {
    /// Mutate `instance` per the engine options, then validate it
    pub fn validate(&self, mut instance: Value) -> ValidationOutcome {
        Mutator::new(self.schema, self.options).apply(&mut instance);

        let errors: Vec<ErrorRecord> = {
            let records = self
                .validator
                .iter_errors(&instance)
                .map(|error| report::error_record(&error, self.schema));
            if self.options.all_errors {
                records.collect()
            } else {
                records.take(1).collect()
            }
        };

        ValidationOutcome {
            valid: errors.is_empty(),
            errors,
            data: instance,
        }
    }

    /// Validate each item in order; results carry the item's original index
    pub fn validate_batch(&self, items: Vec<Value>) -> Vec<BatchItemOutcome> {
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let outcome = self.validate(item);
                BatchItemOutcome {
                    index,
                    valid: outcome.valid,
                    errors: outcome.errors,
                    data: outcome.data,
                }
            })
            .collect()
    }
}
