//! # Router
//!
//! Generic GET/PUT dispatch over hierarchical paths.
//!
//! Each [`RouteNode`] consumes the leading path segment and forwards the
//! remainder to a literal child, or to its `unknown` child which captures
//! the segment under a parameter name. No match is `NotFound`.
//!
//! ## Kit
//!
//! Handlers receive a [`Kit`], the capability object for one request. It
//! carries the write transaction, the routing root, the history log and the
//! `skip_history` flag, so a handler can re-enter the router (to push
//! history, or to replay it) without knowing who built it.

mod entities;
mod history;
mod projects;
mod relationships;
mod stamps;

use crate::history::{HistoryEntry, HistoryLog, Operation};
use crate::primitives::{MAX_DISPATCH_DEPTH, MAX_PATH_SEGMENTS};
use crate::WeftError;
use redb::WriteTransaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

/// A request against the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default, alias = "skipHistory")]
    pub skip_history: bool,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: Value::Null,
            skip_history: false,
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body,
            skip_history: false,
        }
    }

    /// Suppress the history push for this one call.
    #[must_use]
    pub fn skipping_history(mut self) -> Self {
        self.skip_history = true;
        self
    }
}

/// The structured answer to a [`Request`]. Errors are encoded in the body,
/// never propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl Response {
    fn with_status(status: u16, body: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::with_status(200, body)
    }

    pub fn from_error(err: &WeftError) -> Self {
        Self::with_status(
            err.status(),
            json!({ "error": { "code": err.code(), "message": err.to_string() } }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The condition code of an error response.
    pub fn error_code(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(Value::as_str)
    }
}

// =============================================================================
// ROUTING TREE
// =============================================================================

/// Path parameters captured by `unknown` nodes.
pub type Params = BTreeMap<&'static str, String>;

/// An endpoint.
pub type Handler = fn(&mut Kit<'_>, &Params, Value) -> Result<Value, WeftError>;

/// One node of the routing tree.
#[derive(Default)]
pub struct RouteNode {
    get: Option<Handler>,
    put: Option<Handler>,
    children: BTreeMap<&'static str, RouteNode>,
    unknown: Option<(&'static str, Box<RouteNode>)>,
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("get", &self.get.is_some())
            .field("put", &self.put.is_some())
            .field("children", &self.children)
            .field("unknown", &self.unknown)
            .finish()
    }
}

impl RouteNode {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(mut self, handler: Handler) -> Self {
        self.get = Some(handler);
        self
    }

    #[must_use]
    pub fn put(mut self, handler: Handler) -> Self {
        self.put = Some(handler);
        self
    }

    #[must_use]
    pub fn child(mut self, segment: &'static str, node: RouteNode) -> Self {
        self.children.insert(segment, node);
        self
    }

    /// Fallback child for any segment without a literal match; the segment
    /// is captured as `param`.
    #[must_use]
    pub fn unknown(mut self, param: &'static str, node: RouteNode) -> Self {
        self.unknown = Some((param, Box::new(node)));
        self
    }

    fn resolve(&self, segments: &[&str], params: &mut Params) -> Option<&RouteNode> {
        let mut node = self;
        for segment in segments {
            if let Some(child) = node.children.get(*segment) {
                node = child;
            } else if let Some((param, child)) = &node.unknown {
                params.insert(*param, (*segment).to_string());
                node = child;
            } else {
                return None;
            }
        }
        Some(node)
    }

    fn handler(&self, method: Method) -> Option<Handler> {
        match method {
            Method::Get => self.get,
            Method::Put => self.put,
        }
    }
}

/// The full routing tree of the store.
pub fn routes() -> RouteNode {
    RouteNode::new()
        .child("projects", projects::routes())
        .child("stamps", stamps::routes())
        .child("history", history::routes())
}

fn split_path(path: &str) -> Result<Vec<&str>, WeftError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() > MAX_PATH_SEGMENTS {
        return Err(WeftError::InvalidRequest(format!(
            "path has {} segments, maximum is {}",
            segments.len(),
            MAX_PATH_SEGMENTS
        )));
    }
    Ok(segments)
}

// =============================================================================
// KIT
// =============================================================================

/// A history change made while handling a request, undone if the request
/// does not commit.
#[derive(Debug)]
pub(crate) enum HistoryMove {
    Undone,
    Redone,
    Replaced(Box<HistoryLog>),
}

/// Revert history moves, newest first.
pub(crate) fn revert(history: &mut HistoryLog, journal: Vec<HistoryMove>) {
    for change in journal.into_iter().rev() {
        match change {
            HistoryMove::Undone => history.revert_undo(),
            HistoryMove::Redone => history.revert_redo(),
            HistoryMove::Replaced(previous) => *history = *previous,
        }
    }
}

/// Capability handed to every handler for the lifetime of one request.
pub struct Kit<'a> {
    txn: &'a WriteTransaction,
    routes: &'a RouteNode,
    history: &'a mut HistoryLog,
    staged: Vec<HistoryEntry>,
    journal: Vec<HistoryMove>,
    skip_history: bool,
    depth: usize,
}

impl<'a> Kit<'a> {
    pub(crate) fn new(txn: &'a WriteTransaction, routes: &'a RouteNode, history: &'a mut HistoryLog) -> Self {
        Self {
            txn,
            routes,
            history,
            staged: Vec::new(),
            journal: Vec::new(),
            skip_history: false,
            depth: 0,
        }
    }

    /// The request's write transaction.
    pub fn txn(&self) -> &'a WriteTransaction {
        self.txn
    }

    /// Dispatch a nested call through the routing root.
    ///
    /// `skip_history` only ever adds suppression; a nested call cannot
    /// re-enable recording inside a replay.
    pub fn dispatch(
        &mut self,
        method: Method,
        path: &str,
        body: Value,
        skip_history: bool,
    ) -> Result<Value, WeftError> {
        if self.depth >= MAX_DISPATCH_DEPTH {
            return Err(WeftError::InvalidRequest(format!(
                "router calls nested deeper than {}",
                MAX_DISPATCH_DEPTH
            )));
        }
        let segments = split_path(path)?;
        let mut params = Params::new();
        let routes = self.routes;
        let node = routes
            .resolve(&segments, &mut params)
            .ok_or_else(|| WeftError::NotFound(format!("route {}", path)))?;
        let handler = node
            .handler(method)
            .ok_or_else(|| WeftError::NotFound(format!("{} handler for {}", method, path)))?;

        let saved = self.skip_history;
        self.skip_history = saved || skip_history;
        if method == Method::Put {
            tracing::debug!(path, skip_history = self.skip_history, depth = self.depth, "dispatch");
        }
        self.depth += 1;
        let result = handler(self, &params, body);
        self.depth -= 1;
        self.skip_history = saved;
        result
    }

    /// Record a reversible operation through `PUT /history/push`, unless
    /// history is suppressed for this call.
    pub fn record(&mut self, forward: Operation, backward: Operation) -> Result<(), WeftError> {
        if self.skip_history {
            return Ok(());
        }
        let entry = to_json(&HistoryEntry::Simple { forward, backward })?;
        self.dispatch(Method::Put, "/history/push", entry, false)?;
        Ok(())
    }

    /// Replay operations with history suppressed. Stops at the first
    /// failure.
    pub(crate) fn replay(&mut self, operations: &[Operation]) -> Result<(), WeftError> {
        for (index, op) in operations.iter().enumerate() {
            self.dispatch(Method::Put, &op.path, op.body.clone(), true)
                .map_err(|source| {
                    tracing::warn!(index, path = %op.path, error = %source, "history replay failed");
                    WeftError::ReplayFailed {
                        index,
                        source: Box::new(source),
                    }
                })?;
        }
        Ok(())
    }

    /// Queue an entry for the history log; it lands after commit.
    pub(crate) fn stage(&mut self, entry: HistoryEntry) {
        self.staged.push(entry);
    }

    pub(crate) fn history(&mut self) -> &mut HistoryLog {
        &mut *self.history
    }

    pub(crate) fn journal(&mut self, change: HistoryMove) {
        self.journal.push(change);
    }

    /// Journal a full copy of the log before a structural history change.
    pub(crate) fn checkpoint(&mut self) {
        let previous = Box::new((*self.history).clone());
        self.journal.push(HistoryMove::Replaced(previous));
    }

    pub(crate) fn finish(self) -> (Vec<HistoryEntry>, Vec<HistoryMove>) {
        (self.staged, self.journal)
    }
}

// =============================================================================
// HANDLER HELPERS
// =============================================================================

/// Decode a request body, reporting shape errors as `InvalidRequest`.
pub(crate) fn parse<T: DeserializeOwned>(body: Value) -> Result<T, WeftError> {
    serde_json::from_value(body).map_err(|e| WeftError::InvalidRequest(format!("malformed body: {}", e)))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, WeftError> {
    serde_json::to_value(value).map_err(|e| WeftError::SerializationError(e.to_string()))
}

/// True if `body` is an object whose `name` member is `true`.
pub(crate) fn flag(body: &Value, name: &str) -> bool {
    body.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// Take one member out of an object body.
pub(crate) fn field(body: Value, name: &str) -> Result<Value, WeftError> {
    match body {
        Value::Object(mut members) => members
            .remove(name)
            .ok_or_else(|| WeftError::InvalidRequest(format!("body is missing {}", name))),
        _ => Err(WeftError::InvalidRequest("body is not an object".into())),
    }
}

/// `{"_restore": true, <key>: value}`
pub(crate) fn restore_body<T: Serialize>(key: &str, value: &T) -> Result<Value, WeftError> {
    let mut body = serde_json::Map::new();
    body.insert("_restore".to_string(), Value::Bool(true));
    body.insert(key.to_string(), to_json(value)?);
    Ok(Value::Object(body))
}

pub(crate) fn param<'p>(params: &'p Params, name: &str) -> Result<&'p str, WeftError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| WeftError::InvalidRequest(format!("missing path parameter {}", name)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::Store;

    fn echo(_kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
        Ok(json!({ "params": params, "body": body }))
    }

    fn nested(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
        kit.dispatch(Method::Put, "/loop", Value::Null, false)
    }

    fn tree() -> RouteNode {
        RouteNode::new()
            .child(
                "things",
                RouteNode::new()
                    .get(echo)
                    .child("special", RouteNode::new().get(echo))
                    .unknown("thing_id", RouteNode::new().get(echo).put(echo)),
            )
            .child("loop", RouteNode::new().put(nested))
    }

    fn call(method: Method, path: &str) -> Result<Value, WeftError> {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let routes = tree();
        let mut history = HistoryLog::default();
        let mut kit = Kit::new(&txn, &routes, &mut history);
        kit.dispatch(method, path, json!(1), false)
    }

    #[test]
    fn literal_beats_unknown() {
        let value = call(Method::Get, "/things/special").expect("dispatch");
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn unknown_captures_segment() {
        let value = call(Method::Put, "/things/abc").expect("dispatch");
        assert_eq!(value["params"]["thing_id"], "abc");
        assert_eq!(value["body"], 1);
    }

    #[test]
    fn unmatched_segment_is_not_found() {
        assert!(matches!(call(Method::Get, "/nothing"), Err(WeftError::NotFound(_))));
        assert!(matches!(call(Method::Put, "/things"), Err(WeftError::NotFound(_))));
    }

    #[test]
    fn runaway_recursion_is_bounded() {
        assert!(matches!(call(Method::Put, "/loop"), Err(WeftError::InvalidRequest(_))));
    }

    #[test]
    fn too_many_segments_rejected() {
        let path = "/a".repeat(MAX_PATH_SEGMENTS + 1);
        assert!(matches!(call(Method::Get, &path), Err(WeftError::InvalidRequest(_))));
    }

    #[test]
    fn error_response_shape() {
        let response = Response::from_error(&WeftError::NotBatching);
        assert_eq!(response.status, 409);
        assert_eq!(response.error_code(), Some("not_batching"));
        assert!(!response.is_success());
    }

    #[test]
    fn revert_restores_replaced_log() {
        let mut history = HistoryLog::default();
        let journal = vec![HistoryMove::Replaced(Box::new(history.clone()))];
        history.begin_batch().expect("begin");
        revert(&mut history, journal);
        assert!(!history.is_batching());
    }
}
