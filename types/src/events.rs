use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::log::LogEntry;
use crate::project::ProjectId;

/// One of the six per-project pub/sub topics (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Monitor,
    Log,
    Running,
    Goals,
    Actions,
    UiRequest,
}

impl Topic {
    /// `log` and `monitor` may have their oldest entries dropped under
    /// backpressure (spec §4.7); every other topic must never be dropped
    /// without disconnecting the subscriber.
    pub fn droppable(&self) -> bool {
        matches!(self, Topic::Log | Topic::Monitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStateKind {
    Idle,
    Running,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionState {
    pub slug: String,
    pub state: ActionStateKind,
    pub last_run_at: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiDialogType {
    Alert,
    Confirm,
    Prompt,
    Form,
    Toast,
    FormUpdate,
}

/// A correlated dialog ask initiated by user code (spec §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiRequest {
    pub request_id: String,
    pub project_id: ProjectId,
    pub dialog_type: UiDialogType,
    pub options: Value,
}

/// One event published to a project's topic, fanned out by the WS hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Server → client WS frame (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Session { #[serde(rename = "type")] kind: SessionTag, #[serde(rename = "sessionId")] session_id: String },
    Event { #[serde(rename = "projectId")] project_id: ProjectId, event: TopicEvent },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionTag {
    #[serde(rename = "session")]
    Session,
}

impl ServerMessage {
    pub fn session(session_id: impl Into<String>) -> Self {
        ServerMessage::Session { kind: SessionTag::Session, session_id: session_id.into() }
    }

    pub fn event(project_id: ProjectId, topic: Topic, data: Value) -> Self {
        let kind = match topic {
            Topic::Monitor => "monitor",
            Topic::Log => "log",
            Topic::Running => "running",
            Topic::Goals => "goals",
            Topic::Actions => "actions",
            Topic::UiRequest => "ui_request",
        };
        ServerMessage::Event { project_id, event: TopicEvent { kind: kind.into(), data } }
    }

    pub fn log(project_id: ProjectId, entry: &LogEntry) -> Self {
        Self::event(project_id, Topic::Log, serde_json::to_value(entry).unwrap_or(Value::Null))
    }
}

/// Client → server WS frame (spec §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { #[serde(rename = "projectId")] project_id: ProjectId },
    Unsubscribe { #[serde(rename = "projectId")] project_id: ProjectId },
    UiResponse {
        #[serde(rename = "projectId")]
        project_id: ProjectId,
        #[serde(rename = "requestId")]
        request_id: String,
        data: Value,
    },
}
