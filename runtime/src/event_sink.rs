//! The seam between THE CORE and the Event Bus (spec §4.7), kept as a
//! trait so `m3m-runtime` never depends on `m3m-control`: the instance
//! publishes through whatever sink the Service Manager injected at start
//! time.

use m3m_types::events::{ActionState, UiRequest};
use m3m_types::log::LogEntry;
use serde_json::Value;

pub trait EventSink: Send + Sync {
    fn publish_log(&self, project_id: &str, entry: &LogEntry);
    fn publish_monitor(&self, project_id: &str, data: Value);
    fn publish_running(&self, project_id: &str, running: bool);
    fn publish_goals(&self, project_id: &str, data: Value);
    fn publish_action(&self, project_id: &str, action: &ActionState);
    fn publish_ui_request(&self, request: &UiRequest);
}

/// Used by tests and by any embedding that hasn't wired a real bus yet.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish_log(&self, _project_id: &str, _entry: &LogEntry) {}
    fn publish_monitor(&self, _project_id: &str, _data: Value) {}
    fn publish_running(&self, _project_id: &str, _running: bool) {}
    fn publish_goals(&self, _project_id: &str, _data: Value) {}
    fn publish_action(&self, _project_id: &str, _action: &ActionState) {}
    fn publish_ui_request(&self, _request: &UiRequest) {}
}
