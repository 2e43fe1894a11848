//! Event normalizer
//!
//! Dispatches each upstream event to zero or more output events and keeps
//! the running turn state (session id, response text, usage, cost).

use crate::agent::emitter::LineEmitter;
use crate::agent::tools::ToolCallRecord;
use crate::agent::types::*;
use crate::error::Result;
use serde_json::Value;
use std::io::Write;

/// Hard cap on `tool-result.output`, in characters
pub const MAX_TOOL_OUTPUT_CHARS: usize = 500;

/// Replacement text for any upstream error mentioning the budget
pub const BUDGET_EXCEEDED_MESSAGE: &str =
    "Budget limit reached for this session. Raise the session budget or start a new session to continue.";

/// State accumulated over one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnAccumulator {
    pub session_id: String,
    /// Text of the latest complete assistant message
    pub response_text: String,
    pub usage: Option<Usage>,
    pub cost_usd: Option<f64>,
}

impl TurnAccumulator {
    /// Terminal `done` event for this turn
    pub fn into_done(self) -> OutputEvent {
        OutputEvent::Done {
            session_id: self.session_id,
            full_text: self.response_text,
            usage: self.usage,
            cost_usd: self.cost_usd,
        }
    }
}

/// Translates upstream events into output events for one turn
#[derive(Debug, Default)]
pub struct EventNormalizer {
    acc: TurnAccumulator,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one upstream event.
    ///
    /// Only emitter failures are returned; malformed or unexpected shapes
    /// are defaulted or skipped.
    pub fn handle<W: Write>(
        &mut self,
        event: UpstreamEvent,
        tools: &mut ToolCallRecord,
        emitter: &mut LineEmitter<W>,
    ) -> Result<()> {
        if let Some(parent) = event.parent.announced() {
            tools.update_parent(parent.map(str::to_string));
        }

        match event.kind {
            UpstreamEventKind::SystemInit { session_id } => {
                tracing::debug!(session_id = %session_id, "Upstream session initialized");
                self.acc.session_id = session_id.clone();
                emitter.emit(&OutputEvent::SessionInit { session_id })?;
            }
            UpstreamEventKind::StreamDelta { text } => {
                if text.is_empty() {
                    return Ok(());
                }
                emitter.emit(&OutputEvent::TextDelta { text })?;
            }
            UpstreamEventKind::AssistantMessage { blocks } => {
                let mut text = String::new();
                for block in blocks {
                    match block {
                        AssistantBlock::Text(t) => text.push_str(&t),
                        AssistantBlock::ToolInvocation(tool) => {
                            self.start_tool(tool, tools, emitter)?;
                        }
                    }
                }
                self.acc.response_text = text;
            }
            UpstreamEventKind::ToolResult(result) => {
                let id = tools.resolve_for_result(&result.tool_use_id);
                let name = result
                    .name
                    .or_else(|| tools.tool_name(&id).map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                let output = render_tool_output(result.output.as_ref());
                emitter.emit(&OutputEvent::ToolResult { id, name, output })?;
            }
            UpstreamEventKind::TurnResult(result) => {
                if let Some(session_id) = result.session_id {
                    self.acc.session_id = session_id;
                }
                if let Some(usage) = result.usage {
                    self.acc.usage = Some(usage);
                }
                if let Some(cost) = result.total_cost_usd {
                    self.acc.cost_usd = Some(cost);
                }
                if result.is_error {
                    let message = result
                        .error
                        .unwrap_or_else(|| "Agent turn failed".to_string());
                    tracing::warn!(error = %message, "Upstream turn ended with error");
                    emitter.emit(&OutputEvent::Error {
                        error: classify_error(&message),
                    })?;
                }
            }
            UpstreamEventKind::Error { message } => {
                tracing::warn!(error = %message, "Upstream reported error");
                emitter.emit(&OutputEvent::Error {
                    error: classify_error(&message),
                })?;
            }
        }
        Ok(())
    }

    fn start_tool<W: Write>(
        &mut self,
        tool: ToolInvocation,
        tools: &mut ToolCallRecord,
        emitter: &mut LineEmitter<W>,
    ) -> Result<()> {
        let Some(original_id) = tool.id else {
            tracing::warn!(name = ?tool.name, "Tool invocation without id, skipping");
            return Ok(());
        };
        let name = tool.name.unwrap_or_else(|| "unknown".to_string());

        let resolution = tools.resolve_for_start(&original_id, &name);
        if resolution.is_duplicate {
            tracing::debug!(id = %resolution.composite_id, "Suppressed duplicate tool start");
            return Ok(());
        }

        let input = match tool.input {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(input) => input,
        };
        emitter.emit(&OutputEvent::ToolStart {
            id: resolution.composite_id,
            name,
            input,
        })
    }

    pub fn finish(self) -> TurnAccumulator {
        self.acc
    }
}

/// Rewrite budget errors into the fixed user-facing message
pub fn classify_error(message: &str) -> String {
    if message.to_lowercase().contains("budget") {
        BUDGET_EXCEEDED_MESSAGE.to_string()
    } else {
        message.to_string()
    }
}

/// Tool output as a string, capped at `MAX_TOOL_OUTPUT_CHARS`
pub fn render_tool_output(output: Option<&Value>) -> String {
    let rendered = match output {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    truncate_chars(rendered, MAX_TOOL_OUTPUT_CHARS)
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s,
    }
}
