//! Router Module (spec §4.3): a path-parameter trie per HTTP method with
//! literal-first DFS priority and first-registered-wins on duplicates.

use std::collections::{HashMap, HashSet};

use m3m_types::error::RuntimeError;
use m3m_types::route::HttpMethod;

use crate::dispatcher::HandlerId;

#[derive(Default)]
struct TrieNode {
    literal: HashMap<String, TrieNode>,
    param: Option<(String, Box<TrieNode>)>,
    handler: Option<HandlerId>,
}

impl TrieNode {
    fn insert(&mut self, segments: &[Segment], handler: HandlerId) -> bool {
        match segments.split_first() {
            None => {
                if self.handler.is_some() {
                    false // duplicate full pattern, first wins
                } else {
                    self.handler = Some(handler);
                    true
                }
            }
            Some((Segment::Literal(lit), rest)) => {
                self.literal.entry(lit.clone()).or_default().insert(rest, handler)
            }
            Some((Segment::Param(name), rest)) => {
                if self.param.is_none() {
                    self.param = Some((name.clone(), Box::new(TrieNode::default())));
                }
                // First-registered param name wins the slot; still descend so the
                // rest of this pattern's literal suffix gets registered.
                self.param.as_mut().unwrap().1.insert(rest, handler)
            }
        }
    }

    /// Literal-first DFS. Returns the handler and the bound params in
    /// registration order of traversal.
    fn find(&self, segments: &[&str], params: &mut Vec<(String, String)>) -> Option<HandlerId> {
        match segments.split_first() {
            None => self.handler,
            Some((seg, rest)) => {
                if let Some(child) = self.literal.get(*seg) {
                    if let Some(h) = child.find(rest, params) {
                        return Some(h);
                    }
                }
                if let Some((name, child)) = &self.param {
                    params.push((name.clone(), seg.to_string()));
                    if let Some(h) = child.find(rest, params) {
                        return Some(h);
                    }
                    params.pop();
                }
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Param(String),
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    split_path(pattern)
        .into_iter()
        .map(|seg| {
            if let Some(name) = seg.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(seg.to_string())
            }
        })
        .collect()
}

/// Splits on `/`, ignoring leading/trailing empty segments (spec §4.3 step 1).
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}

pub struct MatchedRoute {
    pub handler: HandlerId,
    pub params: HashMap<String, String>,
}

#[derive(Default)]
pub struct RouteTable {
    tries: HashMap<HttpMethod, TrieNode>,
    registered_patterns: HashSet<(HttpMethod, String)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(method, pattern) -> handler`. Returns `false` if the
    /// normalized `(method, pattern)` pair was already registered (spec §9:
    /// first-registered wins, no throw).
    pub fn register(&mut self, method: HttpMethod, pattern: &str, handler: HandlerId) -> bool {
        let normalized = normalize(pattern);
        let key = (method, normalized.clone());
        if !self.registered_patterns.insert(key) {
            return false;
        }
        let segments = parse_pattern(&normalized);
        self.tries.entry(method).or_default().insert(&segments, handler)
    }

    pub fn resolve(&self, method: HttpMethod, path: &str) -> Result<MatchedRoute, RuntimeError> {
        let segments = split_path(path);
        let seg_refs: Vec<&str> = segments.iter().map(String::as_str).collect();

        if let Some(trie) = self.tries.get(&method) {
            let mut params = Vec::new();
            if let Some(handler) = trie.find(&seg_refs, &mut params) {
                return Ok(MatchedRoute {
                    handler,
                    params: params.into_iter().collect(),
                });
            }
        }

        let matches_other_method = self.tries.iter().any(|(m, trie)| {
            *m != method && {
                let mut scratch = Vec::new();
                trie.find(&seg_refs, &mut scratch).is_some()
            }
        });

        if matches_other_method {
            Err(RuntimeError::MethodNotAllowed { method: method.as_str().into(), path: path.into() })
        } else {
            Err(RuntimeError::NotFound { method: method.as_str().into(), path: path.into() })
        }
    }
}

fn normalize(pattern: &str) -> String {
    format!("/{}", split_path(pattern).join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_wins_over_param() {
        let mut rt = RouteTable::new();
        rt.register(HttpMethod::Get, "/users/:id", 1);
        rt.register(HttpMethod::Get, "/users/me", 2);
        let m = rt.resolve(HttpMethod::Get, "/users/me").unwrap();
        assert_eq!(m.handler, 2);
        let m2 = rt.resolve(HttpMethod::Get, "/users/42").unwrap();
        assert_eq!(m2.handler, 1);
        assert_eq!(m2.params.get("id").unwrap(), "42");
    }

    #[test]
    fn duplicate_registration_is_first_wins() {
        let mut rt = RouteTable::new();
        assert!(rt.register(HttpMethod::Get, "/x", 1));
        assert!(!rt.register(HttpMethod::Get, "/x", 2));
        assert_eq!(rt.resolve(HttpMethod::Get, "/x").unwrap().handler, 1);
    }

    #[test]
    fn method_not_allowed_vs_not_found() {
        let mut rt = RouteTable::new();
        rt.register(HttpMethod::Post, "/users", 1);
        assert!(matches!(
            rt.resolve(HttpMethod::Get, "/users"),
            Err(RuntimeError::MethodNotAllowed { .. })
        ));
        assert!(matches!(
            rt.resolve(HttpMethod::Get, "/nope"),
            Err(RuntimeError::NotFound { .. })
        ));
    }

    #[test]
    fn leading_trailing_slashes_ignored() {
        let mut rt = RouteTable::new();
        rt.register(HttpMethod::Get, "users/:id/", 1);
        assert!(rt.resolve(HttpMethod::Get, "/users/7").is_ok());
    }
}
