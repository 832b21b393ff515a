//! Core data models used throughout tootloom.
//!
//! These types represent the stored conversation turns, the thread
//! membership rows that order them, and the chat payload that is both
//! persisted in `messages.body` and sent verbatim to the LLM.

use serde::{Deserialize, Serialize};

/// What a stored message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A turn that arrived as a post on the network.
    UserStatus,
    /// A turn the bot produced.
    AssistantReply,
    /// Bookkeeping for a network post that carries no new turn
    /// (continuation chunks of a split reply).
    Pseudo,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::UserStatus => "user_status",
            MessageKind::AssistantReply => "assistant_reply",
            MessageKind::Pseudo => "pseudo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_status" => Some(MessageKind::UserStatus),
            "assistant_reply" => Some(MessageKind::AssistantReply),
            "pseudo" => Some(MessageKind::Pseudo),
            _ => None,
        }
    }
}

/// Visibility class derived from the originating post.
///
/// Threads containing any `Private` message are excluded from cross-user
/// history surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privacy {
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Privacy::Public),
            "private" => Some(Privacy::Private),
            _ => None,
        }
    }

    /// Maps a network visibility string (`public`, `unlisted`, `private`,
    /// `direct`) onto a privacy class.
    pub fn from_visibility(visibility: &str) -> Self {
        match visibility {
            "private" | "direct" => Privacy::Private,
            _ => Privacy::Public,
        }
    }
}

/// One immutable conversation turn.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    /// Serialized [`ChatMessage`] JSON.
    pub body: String,
    pub author: String,
    /// Originating network post id. Assistant turns are written with `None`
    /// and receive the id once the post succeeds.
    pub status_id: Option<String>,
    pub created_at: i64,
    pub privacy: Privacy,
}

impl Message {
    /// Deserializes the stored chat payload.
    pub fn chat_message(&self) -> anyhow::Result<ChatMessage> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// A thread-membership edge: message `message_id` is turn number `seq`
/// (1-based, dense) of thread `thread_id`.
#[derive(Debug, Clone)]
pub struct ThreadEntry {
    pub thread_id: String,
    pub message_id: String,
    pub seq: i64,
}

/// Chat role in the OpenAI-compatible message format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the OpenAI-compatible chat format.
///
/// This exact JSON is what `messages.body` stores, so replaying a thread is
/// a straight deserialize of its rows in `seq` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::System,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>, name: Option<String>) -> Self {
        ChatMessage {
            role: Role::User,
            content: Some(content.into()),
            name,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Assistant,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A tool-result message answering the call with id `tool_call_id`.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        ChatMessage {
            role: Role::Tool,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// The function half of a tool call: a name and a JSON-encoded argument
/// object (the OpenAI wire format keeps arguments as a string).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn arguments_json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.arguments)?)
    }
}
