use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Value handed to a route handler: `{method, path, headers, query, params,
/// body, response}` (spec §3). The `response` closure lives on the runtime
/// side; this is the serializable shell passed across the dispatcher
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub method: HttpMethod,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseObject {
    pub status: u16,
    pub body: Option<Value>,
    pub headers: HashMap<String, String>,
}

impl ResponseObject {
    pub fn no_content() -> Self {
        ResponseObject { status: 204, body: None, headers: HashMap::new() }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        ResponseObject {
            status,
            body: Some(serde_json::json!({ "error": message.into() })),
            headers: HashMap::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        ResponseObject { status: 200, body: Some(body), headers: HashMap::new() }
    }
}
