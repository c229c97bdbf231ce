//! Console collaborators: text rendering, stdout delivery and a few
//! builtin actions.

use async_trait::async_trait;
use colloquy_core::{
    ActionFailure, ActionOutcome, ActionRequest, ActionRuntime, ContentRenderer, CoreError,
    EventDestination, MessageDelivery, OutboundMessage, PathTemplateRenderer, TemplateRenderer,
};
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Renders text templates; other content types render as a placeholder line
#[derive(Debug, Default, Clone)]
pub struct ConsoleRenderer {
    templates: PathTemplateRenderer,
}

impl ConsoleRenderer {
    /// Create a renderer
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentRenderer for ConsoleRenderer {
    async fn render(
        &self,
        template_id: &str,
        args: &Value,
        _destination: &EventDestination,
    ) -> Result<Vec<OutboundMessage>, CoreError> {
        let kind = template_id.trim_start_matches('#');
        let text = match (kind, args.get("text").and_then(Value::as_str)) {
            ("text" | "builtin_text", Some(text)) => self.templates.render(text, args)?,
            _ => format!("[{}]", kind),
        };

        Ok(vec![OutboundMessage {
            message_type: "text".to_string(),
            payload: json!({ "text": text }),
        }])
    }
}

/// Writes text messages to a console stream
pub struct ConsoleDelivery {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl ConsoleDelivery {
    /// Delivery to stdout
    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Delivery to any writer
    pub fn new(out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl MessageDelivery for ConsoleDelivery {
    async fn deliver(
        &self,
        destination: &EventDestination,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), CoreError> {
        let mut out = self.out.lock().await;
        for message in messages {
            let text = message
                .payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| message.payload.to_string());
            out.write_all(format!("{}> {}\n", destination.bot_id, text).as_bytes())
                .await?;
        }
        out.flush().await?;
        Ok(())
    }
}

/// Actions available without an external runtime.
///
/// - `setVariable {"type": "temp", "name": "x", "value": 1}` writes a variable
///   in the `temp`, `user`, `session` or `bot` scope.
/// - `log {...}` writes its arguments to the log.
#[derive(Debug, Default, Clone)]
pub struct BuiltinActions;

#[async_trait]
impl ActionRuntime for BuiltinActions {
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, ActionFailure> {
        if let Some(server) = &request.server_id {
            return Err(ActionFailure::new(
                "ActionNotFound",
                format!("No action server {} for action {}", server, request.name),
            ));
        }

        match request.name.as_str() {
            "setVariable" => set_variable(request),
            "log" => {
                info!(bot_id = %request.event.bot_id, args = %request.args, "Flow log");
                Ok(ActionOutcome {
                    state: request.state,
                })
            }
            other => Err(ActionFailure::new(
                "ActionNotFound",
                format!("Unknown action: {}", other),
            )),
        }
    }
}

fn set_variable(request: ActionRequest) -> Result<ActionOutcome, ActionFailure> {
    let args = &request.args;
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ActionFailure::new("TypeError", "setVariable needs a name"))?
        .to_string();
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    let scope = args.get("type").and_then(Value::as_str).unwrap_or("temp");

    let mut state = request.state;
    let target = match scope {
        "temp" => &mut state.temp,
        "user" => &mut state.user,
        "session" => &mut state.session,
        "bot" => &mut state.bot,
        other => {
            return Err(ActionFailure::new(
                "TypeError",
                format!("Unknown variable type: {}", other),
            ))
        }
    };

    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(vars) = target {
        debug!(scope = %scope, name = %name, "Setting variable");
        vars.insert(name, value);
    }
    Ok(ActionOutcome { state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::{BotId, DialogEvent, DialogState};

    fn request(name: &str, args: Value) -> ActionRequest {
        ActionRequest {
            name: name.to_string(),
            server_id: None,
            event: DialogEvent::text(BotId("bot".to_string()), "console", "me", "hi"),
            state: DialogState::default(),
            args,
        }
    }

    #[tokio::test]
    async fn test_set_variable() {
        let outcome = BuiltinActions
            .run(request(
                "setVariable",
                json!({ "type": "user", "name": "lang", "value": "fr" }),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.state.user, json!({ "lang": "fr" }));

        let outcome = BuiltinActions
            .run(request("setVariable", json!({ "name": "n", "value": 2 })))
            .await
            .unwrap();
        assert_eq!(outcome.state.temp, json!({ "n": 2 }));
    }

    #[tokio::test]
    async fn test_unknown_action_fails() {
        let failure = BuiltinActions
            .run(request("launchRocket", json!({})))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "ActionNotFound");

        let failure = BuiltinActions
            .run(request("setVariable", json!({ "type": "galaxy", "name": "x" })))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "TypeError");
    }

    #[tokio::test]
    async fn test_render_text() {
        let renderer = ConsoleRenderer::new();
        let destination = EventDestination {
            bot_id: BotId("bot".to_string()),
            channel: "console".to_string(),
            target: "me".to_string(),
            thread_id: None,
        };

        let messages = renderer
            .render(
                "#builtin_text",
                &json!({ "text": "Hello {{user.name}}", "user": { "name": "Ada" } }),
                &destination,
            )
            .await
            .unwrap();
        assert_eq!(messages[0].payload, json!({ "text": "Hello Ada" }));

        let messages = renderer.render("#card", &json!({}), &destination).await.unwrap();
        assert_eq!(messages[0].payload, json!({ "text": "[card]" }));
    }
}
