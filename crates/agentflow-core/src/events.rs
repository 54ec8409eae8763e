//! Events streamed by the build agent.
//!
//! The server sends one flat JSON object per event with `type` as the
//! discriminator and every other field omitted when empty. [`WireEvent`]
//! mirrors that shape; [`AgentEvent`] is the typed view the rest of the
//! client works with.

use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, SessionId};

/// Category of persisted data a tool call mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectedResource {
    Workflow,
    Database,
    UiSchema,
}

impl AffectedResource {
    /// Anything outside the three known resources (the server also sends
    /// `persona` and the empty string) is treated as absent.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(Self::Workflow),
            "database" => Some(Self::Database),
            "ui_schema" => Some(Self::UiSchema),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Database => "database",
            Self::UiSchema => "ui_schema",
        }
    }
}

impl std::fmt::Display for AffectedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one tool execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    Thought {
        content: String,
    },
    ToolCall {
        tool_name: String,
    },
    ToolResult {
        tool_name: String,
        outcome: ToolOutcome,
        affected_resource: Option<AffectedResource>,
    },
    ConfirmationRequired {
        action_id: ActionId,
        tool_name: String,
        content: Option<String>,
    },
    Message {
        content: String,
    },
    Done,
    Error {
        error: String,
    },
    /// A `type` this client does not know. Dispatch ignores it.
    Unknown {
        event_type: String,
    },
}

/// One event from an agent stream. Any event may carry the session id the
/// backend wants the client to use from now on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireEvent", into = "WireEvent")]
pub struct AgentEvent {
    pub session_id: Option<SessionId>,
    pub payload: EventPayload,
}

impl AgentEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            session_id: None,
            payload,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(SessionId::from_raw(session_id));
        self
    }

    pub fn thought(content: impl Into<String>) -> Self {
        Self::new(EventPayload::Thought {
            content: content.into(),
        })
    }

    pub fn tool_call(tool_name: impl Into<String>) -> Self {
        Self::new(EventPayload::ToolCall {
            tool_name: tool_name.into(),
        })
    }

    pub fn tool_result(
        tool_name: impl Into<String>,
        outcome: ToolOutcome,
        affected_resource: Option<AffectedResource>,
    ) -> Self {
        Self::new(EventPayload::ToolResult {
            tool_name: tool_name.into(),
            outcome,
            affected_resource,
        })
    }

    pub fn confirmation_required(action_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::new(EventPayload::ConfirmationRequired {
            action_id: ActionId::from_raw(action_id),
            tool_name: tool_name.into(),
            content: None,
        })
    }

    pub fn message(content: impl Into<String>) -> Self {
        Self::new(EventPayload::Message {
            content: content.into(),
        })
    }

    pub fn done() -> Self {
        Self::new(EventPayload::Done)
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::new(EventPayload::Error {
            error: error.into(),
        })
    }

    /// Wire name of the event type.
    pub fn event_type(&self) -> &str {
        match &self.payload {
            EventPayload::Thought { .. } => "thought",
            EventPayload::ToolCall { .. } => "tool_call",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::ConfirmationRequired { .. } => "confirmation_required",
            EventPayload::Message { .. } => "message",
            EventPayload::Done => "done",
            EventPayload::Error { .. } => "error",
            EventPayload::Unknown { event_type } => event_type,
        }
    }

    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, EventPayload::Done | EventPayload::Error { .. })
    }
}

/// Flat wire shape of an event, every field optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl From<WireEvent> for AgentEvent {
    fn from(wire: WireEvent) -> Self {
        let session_id = wire
            .session_id
            .filter(|s| !s.is_empty())
            .map(SessionId::from_raw);

        let payload = match wire.event_type.as_str() {
            "thought" => EventPayload::Thought {
                content: wire.content.unwrap_or_default(),
            },
            "tool_call" => EventPayload::ToolCall {
                tool_name: wire.tool_name.unwrap_or_default(),
            },
            "tool_result" => EventPayload::ToolResult {
                tool_name: wire.tool_name.unwrap_or_default(),
                outcome: wire.tool_result.unwrap_or_default(),
                affected_resource: wire
                    .affected_resource
                    .as_deref()
                    .and_then(AffectedResource::parse),
            },
            "confirmation_required" => EventPayload::ConfirmationRequired {
                action_id: ActionId::from_raw(wire.action_id.unwrap_or_default()),
                tool_name: wire.tool_name.unwrap_or_default(),
                content: wire.content.filter(|c| !c.is_empty()),
            },
            "message" => EventPayload::Message {
                content: wire.content.unwrap_or_default(),
            },
            "done" => EventPayload::Done,
            "error" => EventPayload::Error {
                error: wire.error.unwrap_or_default(),
            },
            _ => EventPayload::Unknown {
                event_type: wire.event_type,
            },
        };

        Self { session_id, payload }
    }
}

impl From<AgentEvent> for WireEvent {
    fn from(event: AgentEvent) -> Self {
        let mut wire = WireEvent {
            event_type: event.event_type().to_string(),
            session_id: event.session_id.map(|s| s.as_str().to_string()),
            ..Default::default()
        };
        match event.payload {
            EventPayload::Thought { content } | EventPayload::Message { content } => {
                wire.content = Some(content);
            }
            EventPayload::ToolCall { tool_name } => wire.tool_name = Some(tool_name),
            EventPayload::ToolResult {
                tool_name,
                outcome,
                affected_resource,
            } => {
                wire.tool_name = Some(tool_name);
                wire.tool_result = Some(outcome);
                wire.affected_resource = affected_resource.map(|r| r.as_str().to_string());
            }
            EventPayload::ConfirmationRequired {
                action_id,
                tool_name,
                content,
            } => {
                wire.action_id = Some(action_id.as_str().to_string());
                wire.tool_name = Some(tool_name);
                wire.content = content;
            }
            EventPayload::Error { error } => wire.error = Some(error),
            EventPayload::Done | EventPayload::Unknown { .. } => {}
        }
        wire
    }
}
