//! Transition conditions.
//!
//! A condition source is first parsed into a [`Condition`]. The three
//! common shapes (`true`, `lastNode=<name>` and an intent equality) are
//! decided without an evaluator. Everything else goes to an
//! [`ExpressionEvaluator`], which gets a bounded time budget.
//!
//! The default evaluator speaks JMESPath, e.g. `temp.age > \`17\`` or
//! `event.payload.text == 'yes'`, and decides with JMESPath truthiness.

use async_trait::async_trait;
use jmespath::{ErrorReason, RuntimeError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

static LAST_NODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lastNode\s*=\s*(\S+)$").expect("valid lastNode pattern"));

static INTENT_IS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^event\.nlu\.intent\.name\s*===?\s*(?:'([^']*)'|"([^"]*)")$"#)
        .expect("valid intent pattern")
});

/// Structural form of a transition condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `true`
    Always,
    /// `lastNode=<name>`
    LastNode(String),
    /// `event.nlu.intent.name === '<value>'`
    IntentIs(String),
    /// Anything else, evaluated by an [`ExpressionEvaluator`]
    Expression(String),
}

impl Condition {
    /// Parse a condition source
    pub fn parse(source: &str) -> Self {
        let source = source.trim();

        if source == "true" {
            return Condition::Always;
        }

        if let Some(caps) = LAST_NODE.captures(source) {
            return Condition::LastNode(caps[1].to_string());
        }

        if let Some(caps) = INTENT_IS.captures(source) {
            let value = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
            return Condition::IntentIs(value.unwrap_or_default().to_string());
        }

        Condition::Expression(source.to_string())
    }
}

/// Why an expression could not be decided
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Operands of the wrong type; callers treat this as `false`
    #[error("Type error: {0}")]
    TypeError(String),

    /// The expression does not parse
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The budget ran out
    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other runtime failure
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Evaluates condition expressions to a boolean
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` against `context`
    async fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, EvaluationError>;
}

/// JMESPath evaluator run on the blocking pool under a time budget
#[derive(Debug, Clone)]
pub struct JmesPathEvaluator {
    budget: Duration,
}

impl JmesPathEvaluator {
    /// Create an evaluator with a per-expression budget
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl Default for JmesPathEvaluator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl ExpressionEvaluator for JmesPathEvaluator {
    async fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, EvaluationError> {
        let source = expression.to_string();
        let data = context.clone();
        // Rcvar is not Send, so the whole search stays on the blocking thread.
        let task = tokio::task::spawn_blocking(move || search_truthy(&source, &data));

        match tokio::time::timeout(self.budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(EvaluationError::Runtime(join_error.to_string())),
            Err(_) => Err(EvaluationError::Timeout(self.budget)),
        }
    }
}

fn search_truthy(source: &str, data: &Value) -> Result<bool, EvaluationError> {
    let compiled = jmespath::compile(source).map_err(|e| match &e.reason {
        ErrorReason::Parse(_) => EvaluationError::Syntax(e.to_string()),
        _ => EvaluationError::Runtime(e.to_string()),
    })?;

    match compiled.search(data) {
        Ok(result) => Ok(result.is_truthy()),
        Err(e) => Err(match &e.reason {
            ErrorReason::Runtime(RuntimeError::InvalidType { .. })
            | ErrorReason::Runtime(RuntimeError::InvalidReturnType { .. })
            | ErrorReason::Runtime(RuntimeError::InvalidSlice { .. }) => {
                EvaluationError::TypeError(e.to_string())
            }
            ErrorReason::Parse(_) => EvaluationError::Syntax(e.to_string()),
            _ => EvaluationError::Runtime(e.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fast_paths() {
        assert_eq!(Condition::parse("true"), Condition::Always);
        assert_eq!(Condition::parse(" true "), Condition::Always);
        assert_eq!(
            Condition::parse("lastNode=ask-name"),
            Condition::LastNode("ask-name".to_string())
        );
        assert_eq!(
            Condition::parse("event.nlu.intent.name === 'greeting'"),
            Condition::IntentIs("greeting".to_string())
        );
        assert_eq!(
            Condition::parse("event.nlu.intent.name == \"bye\""),
            Condition::IntentIs("bye".to_string())
        );
        assert_eq!(
            Condition::parse("event.nlu.intent.name === 'a' && temp.x"),
            Condition::Expression("event.nlu.intent.name === 'a' && temp.x".to_string())
        );
        assert_eq!(
            Condition::parse("truely"),
            Condition::Expression("truely".to_string())
        );
    }

    #[tokio::test]
    async fn test_jmespath_truthiness() {
        let evaluator = JmesPathEvaluator::default();
        let context = json!({
            "temp": { "age": 21, "name": "", "tags": ["a"] },
            "event": { "payload": { "text": "yes" } }
        });

        assert!(evaluator.evaluate("temp.age > `17`", &context).await.unwrap());
        assert!(!evaluator.evaluate("temp.age < `17`", &context).await.unwrap());
        assert!(!evaluator.evaluate("temp.name", &context).await.unwrap());
        assert!(evaluator.evaluate("temp.tags", &context).await.unwrap());
        assert!(!evaluator.evaluate("temp.missing", &context).await.unwrap());
        assert!(evaluator
            .evaluate("event.payload.text == 'yes'", &context)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_jmespath_errors() {
        let evaluator = JmesPathEvaluator::default();
        let context = json!({ "temp": { "age": 21 } });

        let syntax = evaluator.evaluate("temp.[", &context).await.unwrap_err();
        assert!(matches!(syntax, EvaluationError::Syntax(_)));

        let type_error = evaluator
            .evaluate("length(temp.age)", &context)
            .await
            .unwrap_err();
        assert!(matches!(type_error, EvaluationError::TypeError(_)));
    }
}
