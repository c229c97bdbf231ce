use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::CoreError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder pattern"));

/// Substitutes `{{path}}` placeholders in strings
pub trait TemplateRenderer: Send + Sync {
    /// Render one template string. Strings without placeholders come back unchanged.
    fn render(&self, template: &str, context: &Value) -> Result<String, CoreError>;

    /// Render every string inside `value`, recursively
    fn render_value(&self, value: &Value, context: &Value) -> Result<Value, CoreError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(s, context)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item, context))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_value(item, context)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

/// Resolves each placeholder as a JMESPath path against the context.
/// Missing values render as an empty string, strings render bare and
/// other values render as JSON.
#[derive(Debug, Default, Clone)]
pub struct PathTemplateRenderer;

impl PathTemplateRenderer {
    /// Create a renderer
    pub fn new() -> Self {
        Self
    }

    fn lookup(path: &str, context: &Value) -> Result<String, CoreError> {
        let compiled = jmespath::compile(path).map_err(|e| {
            CoreError::ExpressionError(format!("Failed to compile template path: {}: {}", path, e))
        })?;
        let found = compiled.search(context).map_err(|e| {
            CoreError::ExpressionError(format!("Failed to evaluate template path: {}: {}", path, e))
        })?;
        let value = serde_json::to_value(&*found)?;

        Ok(match value {
            Value::Null => String::new(),
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl TemplateRenderer for PathTemplateRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String, CoreError> {
        if !PLACEHOLDER.is_match(template) {
            return Ok(template.to_string());
        }

        let mut failure = None;
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            match Self::lookup(&caps[1], context) {
                Ok(text) => text,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(rendered.into_owned()),
        }
    }
}
