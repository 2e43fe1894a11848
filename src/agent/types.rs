//! NDJSON protocol types for the bridge
//!
//! Defines the types on both sides of the bridge:
//! - CLI → Bridge (Claude Code `stream-json` lines, parsed leniently)
//! - Normalized upstream events consumed by the normalizer
//! - Bridge → Consumer (the closed output protocol)

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// CLI → Bridge messages (NDJSON)
// =============================================================================

/// Parent agent marker carried by an upstream line.
///
/// `parent_tool_use_id` has three meaningful states: missing (leave the
/// active parent alone), `null` (revert to the top-level agent), or an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentMarker {
    #[default]
    Absent,
    Cleared,
    Set(String),
}

impl ParentMarker {
    /// The announced parent, if the line announced one at all.
    pub fn announced(&self) -> Option<Option<&str>> {
        match self {
            ParentMarker::Absent => None,
            ParentMarker::Cleared => Some(None),
            ParentMarker::Set(id) => Some(Some(id.as_str())),
        }
    }
}

fn deserialize_parent_marker<'de, D>(deserializer: D) -> Result<ParentMarker, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<String>::deserialize(deserializer)? {
        Some(id) => ParentMarker::Set(id),
        None => ParentMarker::Cleared,
    })
}

/// Top-level CLI message (parsed from NDJSON lines)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CliMessage {
    System(CliSystemMessage),
    Assistant(CliAssistantMessage),
    User(CliUserMessage),
    StreamEvent(CliStreamEventMessage),
    ToolResult(CliToolResultMessage),
    Result(CliResultMessage),
    Error(CliErrorMessage),
    /// Anything else (keep_alive, control_request, tool_progress, ...)
    #[serde(other)]
    Unknown,
}

/// System message (subtype: "init", "status", "compact_boundary", ...)
#[derive(Debug, Clone, Deserialize)]
pub struct CliSystemMessage {
    pub subtype: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
}

/// Assistant message (complete model response)
#[derive(Debug, Clone, Deserialize)]
pub struct CliAssistantMessage {
    pub message: AssistantMessageBody,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
    pub session_id: Option<String>,
}

/// Body of an assistant message
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessageBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

/// Content block within an assistant or user message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: Option<String>,
        name: Option<String>,
        input: Option<Value>,
    },
    ToolResult {
        tool_use_id: Option<String>,
        content: Option<Value>,
        #[serde(default)]
        is_error: bool,
    },
    /// thinking, redacted_thinking, image, ...
    #[serde(other)]
    Other,
}

/// User message echoed by the CLI; carries tool results
#[derive(Debug, Clone, Deserialize)]
pub struct CliUserMessage {
    pub message: UserMessageBody,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
}

/// Body of a user message (`content` is a string or a block list)
#[derive(Debug, Clone, Deserialize)]
pub struct UserMessageBody {
    #[serde(default)]
    pub content: Value,
}

/// Stream event (raw Anthropic SSE payload)
#[derive(Debug, Clone, Deserialize)]
pub struct CliStreamEventMessage {
    pub event: Value,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
}

/// Dedicated tool result message
#[derive(Debug, Clone, Deserialize)]
pub struct CliToolResultMessage {
    #[serde(alias = "toolUseId")]
    pub tool_use_id: Option<String>,
    pub name: Option<String>,
    pub output: Option<Value>,
    pub content: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
}

/// Result message (turn completion)
#[derive(Debug, Clone, Deserialize)]
pub struct CliResultMessage {
    pub subtype: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    pub result: Option<String>,
    pub error: Option<Value>,
    pub errors: Option<Vec<Value>>,
    pub total_cost_usd: Option<Value>,
    pub usage: Option<WireUsage>,
    pub session_id: Option<String>,
}

/// Token usage as reported by the upstream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireUsage {
    #[serde(alias = "inputTokens")]
    pub input_tokens: Option<u64>,
    #[serde(alias = "outputTokens")]
    pub output_tokens: Option<u64>,
}

/// Error message
#[derive(Debug, Clone, Deserialize)]
pub struct CliErrorMessage {
    pub message: Option<String>,
    pub error: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_parent_marker")]
    pub parent_tool_use_id: ParentMarker,
}

// =============================================================================
// Normalized upstream events
// =============================================================================

/// One upstream event, as consumed by the normalizer
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamEvent {
    pub parent: ParentMarker,
    pub kind: UpstreamEventKind,
}

impl UpstreamEvent {
    /// Event with no parent marker
    pub fn new(kind: UpstreamEventKind) -> Self {
        Self {
            parent: ParentMarker::Absent,
            kind,
        }
    }

    /// Attach a parent marker
    pub fn with_parent(mut self, parent: ParentMarker) -> Self {
        self.parent = parent;
        self
    }
}

/// Closed set of upstream event shapes
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEventKind {
    SystemInit { session_id: String },
    StreamDelta { text: String },
    AssistantMessage { blocks: Vec<AssistantBlock> },
    ToolResult(ToolResult),
    TurnResult(TurnResult),
    Error { message: String },
}

/// A tool call as announced by the upstream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolInvocation {
    pub id: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

/// Assistant content the bridge cares about
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBlock {
    Text(String),
    ToolInvocation(ToolInvocation),
}

/// Output of a finished tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub name: Option<String>,
    pub output: Option<Value>,
}

/// Final upstream report for a turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnResult {
    pub session_id: Option<String>,
    pub usage: Option<Usage>,
    pub total_cost_usd: Option<f64>,
    pub is_error: bool,
    pub error: Option<String>,
}

impl CliMessage {
    /// Convert a wire message into normalized events.
    ///
    /// One line can yield several events (a user message with multiple
    /// tool results); every event carries the line's parent marker.
    pub fn into_events(self) -> Vec<UpstreamEvent> {
        match self {
            CliMessage::System(sys) => {
                if sys.subtype != "init" {
                    tracing::debug!(subtype = %sys.subtype, "Ignoring system message");
                    return Vec::new();
                }
                match sys.session_id {
                    Some(session_id) => vec![UpstreamEvent::new(UpstreamEventKind::SystemInit {
                        session_id,
                    })
                    .with_parent(sys.parent_tool_use_id)],
                    None => {
                        tracing::debug!("system init without session_id");
                        Vec::new()
                    }
                }
            }
            CliMessage::Assistant(ast) => {
                let blocks = ast
                    .message
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(AssistantBlock::Text(text)),
                        ContentBlock::ToolUse { id, name, input } => {
                            Some(AssistantBlock::ToolInvocation(ToolInvocation {
                                id,
                                name,
                                input,
                            }))
                        }
                        ContentBlock::ToolResult { .. } | ContentBlock::Other => None,
                    })
                    .collect();
                vec![
                    UpstreamEvent::new(UpstreamEventKind::AssistantMessage { blocks })
                        .with_parent(ast.parent_tool_use_id),
                ]
            }
            CliMessage::User(user) => {
                let parent = user.parent_tool_use_id;
                let Value::Array(items) = user.message.content else {
                    return Vec::new();
                };
                items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value::<ContentBlock>(item).ok())
                    .filter_map(|block| match block {
                        ContentBlock::ToolResult {
                            tool_use_id: Some(tool_use_id),
                            content,
                            ..
                        } => Some(UpstreamEvent {
                            parent: parent.clone(),
                            kind: UpstreamEventKind::ToolResult(ToolResult {
                                tool_use_id,
                                name: None,
                                output: content,
                            }),
                        }),
                        _ => None,
                    })
                    .collect()
            }
            CliMessage::StreamEvent(se) => stream_event_kind(&se.event)
                .map(|kind| vec![UpstreamEvent::new(kind).with_parent(se.parent_tool_use_id)])
                .unwrap_or_default(),
            CliMessage::ToolResult(tr) => {
                let Some(tool_use_id) = tr.tool_use_id else {
                    tracing::warn!("tool_result without tool_use_id, skipping");
                    return Vec::new();
                };
                vec![UpstreamEvent::new(UpstreamEventKind::ToolResult(ToolResult {
                    tool_use_id,
                    name: tr.name,
                    output: tr.output.or(tr.content),
                }))
                .with_parent(tr.parent_tool_use_id)]
            }
            CliMessage::Result(res) => vec![UpstreamEvent::new(UpstreamEventKind::TurnResult(
                turn_result_from_wire(res),
            ))],
            CliMessage::Error(err) => {
                let message = err
                    .message
                    .or_else(|| err.error.as_ref().and_then(value_to_message))
                    .unwrap_or_else(|| "Unknown upstream error".to_string());
                vec![UpstreamEvent::new(UpstreamEventKind::Error { message })
                    .with_parent(err.parent_tool_use_id)]
            }
            CliMessage::Unknown => Vec::new(),
        }
    }
}

/// Interpret the raw SSE payload inside a `stream_event`.
///
/// `content_block_start` tool blocks are skipped: their input is always
/// empty, and the full call follows in the assistant message.
fn stream_event_kind(event: &Value) -> Option<UpstreamEventKind> {
    match event.get("type").and_then(Value::as_str)? {
        "content_block_delta" => {
            let delta = event.get("delta")?;
            if delta.get("type").and_then(Value::as_str) != Some("text_delta") {
                return None;
            }
            let text = delta.get("text").and_then(Value::as_str)?;
            Some(UpstreamEventKind::StreamDelta {
                text: text.to_string(),
            })
        }
        "tool_result" => {
            let tool_use_id = event
                .get("tool_use_id")
                .or_else(|| event.get("toolUseId"))
                .and_then(Value::as_str)?;
            Some(UpstreamEventKind::ToolResult(ToolResult {
                tool_use_id: tool_use_id.to_string(),
                name: event.get("name").and_then(Value::as_str).map(str::to_string),
                output: event
                    .get("output")
                    .or_else(|| event.get("content"))
                    .cloned(),
            }))
        }
        _ => None,
    }
}

fn turn_result_from_wire(res: CliResultMessage) -> TurnResult {
    let error = if res.is_error {
        let message = res
            .error
            .as_ref()
            .and_then(value_to_message)
            .or_else(|| {
                res.errors
                    .as_ref()
                    .map(|errors| {
                        errors
                            .iter()
                            .filter_map(value_to_message)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .filter(|joined| !joined.is_empty())
            })
            .or_else(|| res.result.clone().filter(|r| !r.trim().is_empty()))
            .unwrap_or_else(|| {
                format!(
                    "Agent turn failed ({})",
                    res.subtype.as_deref().unwrap_or("error")
                )
            });
        Some(message)
    } else {
        None
    };

    TurnResult {
        session_id: res.session_id,
        usage: res.usage.map(|u| Usage {
            input_tokens: u.input_tokens.unwrap_or(0),
            output_tokens: u.output_tokens.unwrap_or(0),
        }),
        total_cost_usd: res.total_cost_usd.as_ref().and_then(Value::as_f64),
        is_error: res.is_error,
        error,
    }
}

/// Extract a human-readable message from a loosely-typed error value
fn value_to_message(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

// =============================================================================
// Bridge → Consumer messages (NDJSON)
// =============================================================================

/// Canonical token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Event written to the consumer, one per line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutputEvent {
    SessionInit {
        session_id: String,
    },
    TextDelta {
        text: String,
    },
    ToolStart {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        name: String,
        output: String,
    },
    SessionReset,
    Error {
        error: String,
    },
    Done {
        session_id: String,
        full_text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },
}

impl OutputEvent {
    /// Empty-but-valid terminal event for a turn that produced nothing
    pub fn empty_done() -> Self {
        OutputEvent::Done {
            session_id: String::new(),
            full_text: String::new(),
            usage: None,
            cost_usd: None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, OutputEvent::Done { .. })
    }
}

// =============================================================================
// Helper functions
// =============================================================================

/// Parse one NDJSON line; blank and malformed lines yield `None`
pub fn parse_line(line: &str) -> Option<CliMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str::<CliMessage>(trimmed)
        .map_err(|e| {
            let preview: String = trimmed.chars().take(200).collect();
            tracing::warn!("NDJSON parse error: {} (line: {})", e, preview);
        })
        .ok()
}
