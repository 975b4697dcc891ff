//! HTTP surfaces (spec §6): the public `/r/{slug}/*` surface that proxies
//! into a project's Router Module, and the admin collaborator surface
//! (start/stop/restart/list/read-logs) the Service Manager exposes
//! operations for. Kept as plain async functions over `hyper` types, the
//! way the teacher's playground-api wires its own request handling,
//! rather than pulling in a web framework.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hyper::{Body, Method, Request, Response, StatusCode};
use m3m_types::route::HttpMethod;
use serde_json::json;

use crate::manager::ServiceManager;

const ROUTE_DEADLINE: Duration = Duration::from_secs(30);

/// `GET|POST|PUT|DELETE /r/{slug}/*` (spec §6). `slug` is resolved to a
/// running instance; everything after it is handed to the project's
/// Router Module unchanged.
pub async fn handle_external(manager: &Arc<ServiceManager>, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let Some(rest) = path.strip_prefix("/r/") else {
        return json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" }));
    };
    let mut parts = rest.splitn(2, '/');
    let slug = parts.next().unwrap_or_default().to_string();
    let sub_path = format!("/{}", parts.next().unwrap_or(""));

    let Some(method) = HttpMethod::parse(req.method().as_str()) else {
        return json_response(StatusCode::METHOD_NOT_ALLOWED, json!({ "error": "method not allowed" }));
    };

    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect::<HashMap<_, _>>();
    let query: HashMap<String, String> = req
        .uri()
        .query()
        .map(|q| url_query_pairs(q))
        .unwrap_or_default();

    let body_bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(_) => return json_response(StatusCode::BAD_REQUEST, json!({ "error": "failed to read body" })),
    };
    let body = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    let Some(instance) = manager.get(&slug).await else {
        return json_response(StatusCode::NOT_FOUND, json!({ "error": "no running instance for this project" }));
    };

    let response = instance.handle_request(method, sub_path, headers, query, body, ROUTE_DEADLINE).await;
    let mut builder = Response::builder().status(response.status);
    for (k, v) in &response.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    let body = response.body.unwrap_or(serde_json::Value::Null);
    builder.body(Body::from(body.to_string())).unwrap_or_else(|_| Response::new(Body::empty()))
}

fn url_query_pairs(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let mut kv = pair.splitn(2, '=');
            let key = kv.next()?;
            let value = kv.next().unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Admin collaborator surface (spec §6: "start/stop/restart, list
/// projects, read logs... not in core scope"). Source/branch/release CRUD
/// is left to whatever admin UI the host builds on top of `Repository`.
pub async fn handle_admin(manager: &Arc<ServiceManager>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_start_matches("/admin/projects").trim_matches('/').split('/').collect();

    match (&method, segments.as_slice()) {
        (&Method::GET, [""]) => {
            let running = manager.list_running().await;
            json_response(StatusCode::OK, json!({ "running": running }))
        }
        (&Method::POST, [project_id, "start"]) => respond_start(manager, project_id, None).await,
        (&Method::POST, [project_id, "stop"]) => {
            let _ = manager.stop(&project_id.to_string()).await;
            json_response(StatusCode::OK, json!({ "ok": true }))
        }
        (&Method::POST, [project_id, "restart"]) => match manager.restart(&project_id.to_string(), None).await {
            Ok(_) => json_response(StatusCode::OK, json!({ "ok": true })),
            Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
        },
        (&Method::GET, [project_id, "logs"]) => match manager.get(&project_id.to_string()).await {
            Some(instance) => json_response(StatusCode::OK, json!({ "entries": instance.log_snapshot() })),
            None => json_response(StatusCode::NOT_FOUND, json!({ "error": "not running" })),
        },
        (&Method::GET, [project_id, "degradation"]) => match manager.get(&project_id.to_string()).await {
            Some(instance) => json_response(StatusCode::OK, serde_json::to_value(instance.degradation_snapshot()).unwrap()),
            None => json_response(StatusCode::NOT_FOUND, json!({ "error": "not running" })),
        },
        (&Method::POST, [project_id, "actions", slug]) => match manager.run_action(&project_id.to_string(), slug).await {
            Ok(state) => json_response(StatusCode::OK, json!({ "state": state })),
            Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
        },
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    }
}

async fn respond_start(manager: &Arc<ServiceManager>, project_id: &str, hint: Option<&str>) -> Response<Body> {
    match manager.start(&project_id.to_string(), hint).await {
        Ok(_) => json_response(StatusCode::OK, json!({ "ok": true })),
        Err(e) => json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": e.to_string() })),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
