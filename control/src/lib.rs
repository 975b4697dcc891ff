//! Control plane for the M3M service runtime (spec §4.1, §4.7, §4.8, §6):
//! the Service Manager, the Event Bus, the WebSocket Hub, and the admin
//! HTTP surface. `m3m-runtime` never depends on this crate; it only
//! depends on the `EventSink`/`Repository`/`VersionSourceLoader` traits
//! `m3m-types` defines, which this crate implements.

pub mod admin;
pub mod error;
pub mod event_bus;
pub mod manager;
pub mod memory_repository;
pub mod ws_hub;

pub use error::{HubError, ManagerError};
pub use event_bus::EventBus;
pub use manager::ServiceManager;
pub use memory_repository::MemoryRepository;
pub use ws_hub::{SharedSecretVerifier, TokenVerifier, WsHub};
