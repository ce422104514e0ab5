//! Template engine (C2, §4.3): renders the string leaves of a parameters
//! JSON tree against the `{ trigger, vars, steps }` context view.
//!
//! Built on `tera` — the same templating crate the platform already uses
//! for prompt rendering (see the teacher's `ai-service::prompt` module) —
//! driven one-off per leaf so the engine stays a stateless, pure wrapper
//! with no persistent template registry.

use crate::error::TemplateError;
use common::JsonValue;
use tera::Tera;

pub struct TemplateEngine {
    /// Whether a reference to a missing `trigger`/`vars`/`steps` path is a
    /// hard error (`true`) or renders to an empty string (`false`, the
    /// default per §4.3). The spec names a "strict marker" without fixing
    /// its syntax; this implementation exposes strictness as a renderer
    /// option instead of in-template syntax (recorded in DESIGN.md).
    strict: bool,
}

impl TemplateEngine {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Render every string leaf of `template` against `context`, preserving
    /// the JSON tree shape. `context` must be a JSON object.
    pub fn render(&self, template: &JsonValue, context: &JsonValue) -> Result<JsonValue, TemplateError> {
        let tera_context = tera::Context::from_value(context.clone()).map_err(|e| {
            TemplateError::Syntax {
                position: "context".to_string(),
                message: e.to_string(),
            }
        })?;
        self.render_value(template, &tera_context)
    }

    fn render_value(
        &self,
        value: &JsonValue,
        context: &tera::Context,
    ) -> Result<JsonValue, TemplateError> {
        match value {
            JsonValue::String(s) => self.render_string(s, context),
            JsonValue::Array(items) => {
                let rendered: Result<Vec<_>, _> =
                    items.iter().map(|v| self.render_value(v, context)).collect();
                Ok(JsonValue::Array(rendered?))
            }
            JsonValue::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    rendered.insert(key.clone(), self.render_value(v, context)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, template: &str, context: &tera::Context) -> Result<JsonValue, TemplateError> {
        let trimmed = template.trim();
        let is_whole_expression = trimmed.starts_with("{{")
            && trimmed.ends_with("}}")
            && trimmed.matches("{{").count() == 1;

        match Tera::one_off(template, context, false) {
            Ok(rendered) => {
                if is_whole_expression {
                    if let Ok(number) = serde_json::from_str::<JsonValue>(&rendered) {
                        if number.is_number() || number.is_boolean() || number.is_null() {
                            return Ok(number);
                        }
                    }
                }
                Ok(JsonValue::String(rendered))
            }
            Err(e) => {
                let message = e.to_string();
                if is_missing_reference(&message) {
                    if self.strict {
                        Err(TemplateError::Reference(message))
                    } else {
                        Ok(JsonValue::String(String::new()))
                    }
                } else {
                    Err(TemplateError::Syntax {
                        position: "template".to_string(),
                        message,
                    })
                }
            }
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TemplateEngine {
    /// Evaluates an edge `condition` expression (§4.7 step 2) against the
    /// execution context, reusing Tera's own expression grammar rather than
    /// hand-rolling a second parser for boolean comparisons.
    pub fn evaluate_condition(
        &self,
        condition: &str,
        context: &JsonValue,
    ) -> Result<bool, TemplateError> {
        let tera_context = tera::Context::from_value(context.clone()).map_err(|e| {
            TemplateError::Syntax {
                position: "context".to_string(),
                message: e.to_string(),
            }
        })?;
        let wrapped = format!("{{{{ {} }}}}", condition);
        let rendered = Tera::one_off(&wrapped, &tera_context, false).map_err(|e| {
            TemplateError::Syntax {
                position: condition.to_string(),
                message: e.to_string(),
            }
        })?;
        match rendered.as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Ok(other != "0" && !other.is_empty()),
        }
    }
}

fn is_missing_reference(message: &str) -> bool {
    message.contains("not found in context") || message.contains("Variable")
}
