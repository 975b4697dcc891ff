//! WebSocket Hub (spec §4.7, §6 `/api/ws?token=<jwt>`): authenticates the
//! socket, accepts `subscribe`/`unsubscribe`/`ui_response` frames, and fans
//! out topic events through the `EventBus`. Session bookkeeping mirrors the
//! teacher's single-table subscriber registry, generalized to the six-topic
//! set of spec §4.7.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use m3m_types::events::{ClientMessage, ServerMessage};
use m3m_types::project::ProjectId;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::HubError;
use crate::event_bus::{EventBus, SessionId, Subscriber};
use crate::manager::ServiceManager;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Verifies the `token` query parameter. Spec names a JWT but no JWT crate
/// is in this stack; authentication here is an HMAC-signed opaque token
/// via `ring` (already a dependency for `$crypto`), checked against a
/// shared secret the host configures — documented as an open-question
/// resolution rather than a full JWT implementation.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

pub struct SharedSecretVerifier {
    key: ring::hmac::Key,
}

impl SharedSecretVerifier {
    pub fn new(secret: &[u8]) -> Self {
        SharedSecretVerifier { key: ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret) }
    }
}

impl TokenVerifier for SharedSecretVerifier {
    fn verify(&self, token: &str) -> bool {
        let Ok(bytes) = base64::decode_config(token, base64::URL_SAFE_NO_PAD) else { return false };
        // The token IS the HMAC tag of a fixed context string; callers mint
        // it once per session out-of-band (admin login flow, out of scope).
        ring::hmac::verify(&self.key, b"m3m-ws-session", &bytes).is_ok()
    }
}

pub struct WsHub {
    manager: Arc<ServiceManager>,
    event_bus: Arc<EventBus>,
    verifier: Arc<dyn TokenVerifier>,
    send_buffer: usize,
}

impl WsHub {
    pub fn new(manager: Arc<ServiceManager>, event_bus: Arc<EventBus>, verifier: Arc<dyn TokenVerifier>, send_buffer: usize) -> Arc<Self> {
        Arc::new(WsHub { manager, event_bus, verifier, send_buffer })
    }

    /// Generic over the underlying byte stream so callers can hand either a
    /// bare `TcpStream` or a `hyper::upgrade::Upgraded` connection through
    /// without this module depending on `hyper`.
    pub async fn handle_connection<S>(self: &Arc<Self>, stream: WebSocketStream<S>, token: &str) -> Result<(), HubError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if !self.verifier.verify(token) {
            return Err(HubError::Unauthenticated);
        }

        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(self.send_buffer);

        let _ = write
            .send(Message::text(serde_json::to_string(&ServerMessage::session(session_id.to_string())).unwrap()))
            .await;

        let outbound = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Ok(text) = serde_json::to_string(&message) else { continue };
                if write.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        });

        let mut subscribed: Vec<ProjectId> = Vec::new();
        while let Some(frame) = read.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(_) => break,
            };
            let text = match frame {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { project_id }) => {
                    self.event_bus.subscribe(project_id.clone(), Subscriber { id: session_id, sender: tx.clone() });
                    subscribed.push(project_id);
                }
                Ok(ClientMessage::Unsubscribe { project_id }) => {
                    self.event_bus.unsubscribe(&project_id, session_id);
                    subscribed.retain(|p| p != &project_id);
                }
                Ok(ClientMessage::UiResponse { project_id, request_id, data }) => {
                    self.deliver_ui_response(&project_id, request_id, data).await;
                }
                Err(e) => {
                    debug!("session {session_id} sent a malformed frame: {e}");
                }
            }
        }

        self.event_bus.drop_session(session_id);
        outbound.abort();
        Ok(())
    }

    /// Resolves a suspended `$ui.*` call by enqueueing the SAME `Resume`
    /// invocation `InstanceState::resolve_async` would, bypassing it
    /// entirely since the value originates from an external WS frame, not
    /// a spawned future (spec §4.8 point 3).
    async fn deliver_ui_response(&self, project_id: &ProjectId, request_id: String, data: serde_json::Value) {
        let Some(instance) = self.manager.get(project_id).await else {
            warn!("ui_response for unknown project {project_id}");
            return;
        };
        let deadline = std::time::Duration::from_secs(5);
        let _ = instance
            .dispatcher
            .dispatch(m3m_runtime::Invocation::Resume { request_id, value: data }, deadline)
            .await;
    }
}
