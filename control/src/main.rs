//! Control-plane entry point: parses process args with `structopt` (the
//! teacher's choice) layered over a `toml` config file for per-host
//! tunables, wires the Service Manager/Event Bus/WS Hub together over an
//! in-memory repository, autostarts projects, and serves both the public
//! `/r/{slug}/*` surface and the admin surface over one `hyper` listener.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use log::info;
use m3m_control::{EventBus, MemoryRepository, ServiceManager, SharedSecretVerifier, WsHub};
use m3m_runtime::InstanceConfig;
use serde::Deserialize;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "m3m-control", about = "M3M service runtime control plane")]
struct Opt {
    #[structopt(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// HMAC shared secret for WS session tokens (spec §6 `token=`).
    #[structopt(long, default_value = "dev-secret-change-me")]
    ws_secret: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct HostConfig {
    instance: InstanceConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let opt = Opt::from_args();

    let host_config: HostConfig = match &opt.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        }
        None => HostConfig::default(),
    };

    let repository = Arc::new(MemoryRepository::new());
    let event_bus = EventBus::new();
    let manager = ServiceManager::new(repository.clone(), repository.clone(), event_bus.clone(), host_config.instance);

    manager.autostart().await;

    let verifier = Arc::new(SharedSecretVerifier::new(opt.ws_secret.as_bytes()));
    let ws_hub = WsHub::new(manager.clone(), event_bus.clone(), verifier, 1_024);

    let make_svc = make_service_fn(move |_conn| {
        let manager = manager.clone();
        let ws_hub = ws_hub.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let manager = manager.clone();
                let ws_hub = ws_hub.clone();
                async move { Ok::<_, Infallible>(route(manager, ws_hub, req).await) }
            }))
        }
    });

    info!("control plane listening on {}", opt.bind);
    Server::bind(&opt.bind).serve(make_svc).await?;
    Ok(())
}

async fn route(manager: Arc<ServiceManager>, ws_hub: Arc<WsHub>, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path();
    if path.starts_with("/r/") {
        return m3m_control::admin::handle_external(&manager, req).await;
    }
    if path.starts_with("/admin/projects") {
        return m3m_control::admin::handle_admin(&manager, req).await;
    }
    if path.starts_with("/api/ws") {
        return upgrade_websocket(ws_hub, req).await;
    }
    Response::builder().status(404).body(Body::from("not found")).unwrap()
}

async fn upgrade_websocket(ws_hub: Arc<WsHub>, req: Request<Body>) -> Response<Body> {
    let token = req
        .uri()
        .query()
        .and_then(|q| q.split('&').find_map(|p| p.strip_prefix("token=")))
        .unwrap_or_default()
        .to_string();

    let Some(key) = req.headers().get("sec-websocket-key").cloned() else {
        return Response::builder().status(400).body(Body::from("not a websocket upgrade")).unwrap();
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let stream = tokio_tungstenite::WebSocketStream::from_raw_socket(
                    upgraded,
                    tokio_tungstenite::tungstenite::protocol::Role::Server,
                    None,
                )
                .await;
                let _ = ws_hub.handle_connection(stream, &token).await;
            }
            Err(e) => log::warn!("websocket upgrade failed: {e}"),
        }
    });

    let accept = tokio_tungstenite::tungstenite::handshake::derive_accept_key(key.as_bytes());
    Response::builder()
        .status(101)
        .header("upgrade", "websocket")
        .header("connection", "upgrade")
        .header("sec-websocket-accept", accept)
        .body(Body::empty())
        .unwrap()
}
