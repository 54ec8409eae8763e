use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{AffectedResource, ToolOutcome};
use crate::ids::{ActionId, EntryId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    AgentThinking,
    ToolCall,
    ToolResult,
    Confirmation,
}

/// Role plus the fields only some roles carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum EntryKind {
    User,
    Assistant,
    AgentThinking,
    ToolCall {
        tool_name: String,
    },
    ToolResult {
        tool_name: String,
        outcome: ToolOutcome,
        affected_resource: Option<AffectedResource>,
    },
    Confirmation {
        tool_name: String,
        action_id: ActionId,
    },
}

impl EntryKind {
    pub fn role(&self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Assistant => Role::Assistant,
            Self::AgentThinking => Role::AgentThinking,
            Self::ToolCall { .. } => Role::ToolCall,
            Self::ToolResult { .. } => Role::ToolResult,
            Self::Confirmation { .. } => Role::Confirmation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: EntryId,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn role(&self) -> Role {
        self.kind.role()
    }
}

/// Conversation shown to the user. Append-only, except that consecutive
/// thinking updates replace the trailing `agent_thinking` entry.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntryKind, content: impl Into<String>) -> &TranscriptEntry {
        self.entries.push(TranscriptEntry {
            id: EntryId::new(),
            kind,
            content: content.into(),
            created_at: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(EntryKind::User, content);
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(EntryKind::Assistant, content);
    }

    /// Replace the content of a trailing `agent_thinking` entry, or append one.
    pub fn upsert_thinking(&mut self, content: impl Into<String>) {
        match self.entries.last_mut() {
            Some(last) if last.role() == Role::AgentThinking => {
                last.content = content.into();
                last.created_at = Utc::now();
            }
            _ => {
                self.push(EntryKind::AgentThinking, content);
            }
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, role: Role) -> usize {
        self.entries.iter().filter(|e| e.role() == role).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
