//! Parameter validation (C4, §4.5): checks rendered node parameters
//! against the action's registered JSON Schema before dispatch. Schema
//! generation tooling is out of scope (Non-goals) — this only consumes
//! schemas `ActionDescriptor.parameter_schema` already carries.

use crate::error::ParameterError;
use async_trait::async_trait;
use common::JsonValue;

#[async_trait]
pub trait ParameterValidator: Send + Sync {
    async fn validate(
        &self,
        schema: Option<&JsonValue>,
        parameters: &JsonValue,
    ) -> Result<(), ParameterError>;
}

/// No schema supplied means no validation — matches connectors that
/// haven't published a `parameterSchema` yet (§4.5 default case).
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveValidator;

#[async_trait]
impl ParameterValidator for PermissiveValidator {
    async fn validate(
        &self,
        _schema: Option<&JsonValue>,
        _parameters: &JsonValue,
    ) -> Result<(), ParameterError> {
        Ok(())
    }
}

/// Compiles and evaluates `parameterSchema` with `jsonschema` per call.
/// Schemas are small and change rarely enough that per-call compilation
/// is simpler than maintaining a compiled-schema cache (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

#[async_trait]
impl ParameterValidator for JsonSchemaValidator {
    async fn validate(
        &self,
        schema: Option<&JsonValue>,
        parameters: &JsonValue,
    ) -> Result<(), ParameterError> {
        let Some(schema) = schema else {
            return Ok(());
        };

        let validator = jsonschema::validator_for(schema).map_err(|e| ParameterError::Invalid {
            field_path: "$schema".to_string(),
            reason: e.to_string(),
        })?;

        let mut errors = validator.iter_errors(parameters);
        if let Some(first) = errors.next() {
            return Err(ParameterError::Invalid {
                field_path: first.instance_path().to_string(),
                reason: first.to_string(),
            });
        }

        Ok(())
    }
}
