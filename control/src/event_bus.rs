//! Event Bus (spec §4.7): per-project topic pub/sub. Implements the
//! runtime's `EventSink` seam so `m3m-runtime` never depends on this crate,
//! and fans out to whatever WS sessions the hub has registered against a
//! project. `EventSink`'s methods are called synchronously from inside the
//! isolate thread (a plain OS thread, never a tokio worker), so the
//! subscription index is a plain `std::sync::RwLock`-guarded map rather
//! than an async one — spec §5 ("guarded by a RWMutex; emission path uses
//! read-lock only"), matching the teacher's plain `Mutex<HashMap<_>>`
//! subscriber tables rather than a lock-free map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use m3m_runtime::EventSink;
use m3m_types::events::{ActionState, ServerMessage, Topic, UiRequest};
use m3m_types::log::LogEntry;
use m3m_types::project::ProjectId;
use serde_json::Value;
use tokio::sync::mpsc;

pub type SessionId = u64;

/// One connected WS session's outbound channel, bounded per spec §5
/// ("WS per-session send buffer, default 1,024 messages").
#[derive(Clone)]
pub struct Subscriber {
    pub id: SessionId,
    pub sender: mpsc::Sender<ServerMessage>,
}

pub struct EventBus {
    subscriptions: RwLock<HashMap<ProjectId, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(EventBus { subscriptions: RwLock::new(HashMap::new()) })
    }

    pub fn subscribe(&self, project_id: ProjectId, subscriber: Subscriber) {
        let mut subs = self.subscriptions.write().unwrap();
        subs.entry(project_id).or_default().push(subscriber);
    }

    pub fn unsubscribe(&self, project_id: &ProjectId, session_id: SessionId) {
        let mut subs = self.subscriptions.write().unwrap();
        if let Some(list) = subs.get_mut(project_id) {
            list.retain(|s| s.id != session_id);
        }
    }

    /// Drops the session from every project it was subscribed to; returns
    /// the projects it held a subscription for (the WS hub uses this to
    /// check whether any outstanding UI request it owned should be
    /// cancelled because no other listener remains, spec §4.7).
    pub fn drop_session(&self, session_id: SessionId) -> Vec<ProjectId> {
        let mut subs = self.subscriptions.write().unwrap();
        let mut affected = Vec::new();
        for (project_id, list) in subs.iter_mut() {
            let before = list.len();
            list.retain(|s| s.id != session_id);
            if list.len() != before {
                affected.push(project_id.clone());
            }
        }
        affected
    }

    pub fn has_subscribers(&self, project_id: &ProjectId) -> bool {
        self.subscriptions.read().unwrap().get(project_id).map(|l| !l.is_empty()).unwrap_or(false)
    }

    fn publish(&self, project_id: &str, topic: Topic, data: Value) {
        let subs = self.subscriptions.read().unwrap();
        let Some(list) = subs.get(project_id) else { return };
        let message = ServerMessage::event(project_id.to_string(), topic, data);
        for sub in list {
            // Best-effort fan-out (spec §4.7): a full buffer on a droppable
            // topic just skips that subscriber rather than blocking the
            // publisher or disconnecting the session. Non-droppable topics
            // log so an operator notices a stuck session.
            if sub.sender.try_send(message.clone()).is_err() && !topic.droppable() {
                log::warn!("dropping non-droppable {topic:?} message for session {} on a full buffer", sub.id);
            }
        }
    }
}

impl EventSink for EventBus {
    fn publish_log(&self, project_id: &str, entry: &LogEntry) {
        self.publish(project_id, Topic::Log, serde_json::to_value(entry).unwrap_or(Value::Null));
    }

    fn publish_monitor(&self, project_id: &str, data: Value) {
        self.publish(project_id, Topic::Monitor, data);
    }

    fn publish_running(&self, project_id: &str, running: bool) {
        self.publish(project_id, Topic::Running, serde_json::json!({ "running": running }));
    }

    fn publish_goals(&self, project_id: &str, data: Value) {
        self.publish(project_id, Topic::Goals, data);
    }

    fn publish_action(&self, project_id: &str, action: &ActionState) {
        self.publish(project_id, Topic::Actions, serde_json::to_value(action).unwrap_or(Value::Null));
    }

    fn publish_ui_request(&self, request: &UiRequest) {
        self.publish(&request.project_id, Topic::UiRequest, serde_json::to_value(request).unwrap_or(Value::Null));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribed_session() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.subscribe("proj1".to_string(), Subscriber { id: 1, sender: tx });

        bus.publish_running("proj1", true);

        let message = rx.recv().await.unwrap();
        match message {
            ServerMessage::Event { project_id, event } => {
                assert_eq!(project_id, "proj1");
                assert_eq!(event.kind, "running");
            }
            _ => panic!("expected event message"),
        }
    }

    #[test]
    fn drop_session_reports_affected_projects() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(8);
        bus.subscribe("proj1".to_string(), Subscriber { id: 7, sender: tx });
        let affected = bus.drop_session(7);
        assert_eq!(affected, vec!["proj1".to_string()]);
        assert!(!bus.has_subscribers(&"proj1".to_string()));
    }
}
