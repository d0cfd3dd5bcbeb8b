//! # Session Module
//!
//! One editing session: the store, its history log and the routing tree.
//!
//! Each request runs in exactly one redb write transaction:
//! - GET aborts it when the handler returns
//! - PUT commits it; history pushes staged during the request land in the
//!   log only after the commit succeeds
//! - Any failure drops the transaction and reverts history moves, so a
//!   failed request leaves storage and history unchanged
//!
//! Sessions are independent: each owns its own [`HistoryLog`].

use crate::history::HistoryLog;
use crate::router::{self, Kit, Method, Request, Response, RouteNode};
use crate::storage::Store;
use crate::WeftError;
use serde_json::Value;
use std::path::Path;

/// An owning handle over store, history and routes.
#[derive(Debug)]
pub struct Session {
    store: Store,
    history: HistoryLog,
    routes: RouteNode,
}

impl Session {
    /// A session with the default history capacity.
    pub fn new(store: Store) -> Self {
        Self::with_history(store, HistoryLog::default())
    }

    pub fn with_history(store: Store, history: HistoryLog) -> Self {
        Self {
            store,
            history,
            routes: router::routes(),
        }
    }

    /// Open a persistent session at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeftError> {
        Ok(Self::new(Store::open(path)?))
    }

    /// A volatile session.
    pub fn in_memory() -> Result<Self, WeftError> {
        Ok(Self::new(Store::in_memory()?))
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Handle a request. Never fails: errors become structured responses.
    pub fn handle(&mut self, request: Request) -> Response {
        match self.execute(request) {
            Ok(body) => Response::ok(body),
            Err(err) => Response::from_error(&err),
        }
    }

    pub fn get(&mut self, path: &str) -> Result<Value, WeftError> {
        self.execute(Request::get(path))
    }

    pub fn put(&mut self, path: &str, body: Value) -> Result<Value, WeftError> {
        self.execute(Request::put(path, body))
    }

    /// Run one request in its own transaction.
    pub fn execute(&mut self, request: Request) -> Result<Value, WeftError> {
        let Request {
            method,
            path,
            body,
            skip_history,
        } = request;

        let txn = self.store.begin_write()?;
        let mut kit = Kit::new(&txn, &self.routes, &mut self.history);
        let result = kit.dispatch(method, &path, body, skip_history);
        let (staged, journal) = kit.finish();

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(path = %path, error = %abort, "abort failed");
                }
                router::revert(&mut self.history, journal);
                return Err(err);
            }
        };

        match method {
            Method::Get => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(path = %path, error = %abort, "abort failed");
                }
            }
            Method::Put => {
                if let Err(commit) = txn.commit() {
                    tracing::warn!(path = %path, error = %commit, "commit failed");
                    router::revert(&mut self.history, journal);
                    return Err(WeftError::StorageFailure(commit.to_string()));
                }
            }
        }

        for entry in staged {
            self.history.push(entry);
        }
        Ok(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_request_leaves_history_untouched() {
        let mut session = Session::in_memory().expect("session");
        session.put("/projects", json!({ "name": "p" })).expect("create");
        assert_eq!(session.history().undo_len(), 1);

        let response = session.handle(Request::put("/projects/ghost/entities", json!({})));
        assert_eq!(response.status, 404);
        assert_eq!(response.error_code(), Some("not_found"));
        assert_eq!(session.history().undo_len(), 1);
    }

    #[test]
    fn get_does_not_record() {
        let mut session = Session::in_memory().expect("session");
        session.get("/projects").expect("list");
        assert_eq!(session.history().undo_len(), 0);
    }

    #[test]
    fn skip_history_suppresses_push() {
        let mut session = Session::in_memory().expect("session");
        let response = session.handle(Request::put("/projects", json!({ "name": "p" })).skipping_history());
        assert!(response.is_success());
        assert_eq!(session.history().undo_len(), 0);
    }

    #[test]
    fn unknown_body_is_not_implemented() {
        let mut session = Session::in_memory().expect("session");
        let project = session.put("/projects", json!({ "name": "p" })).expect("create");
        let path = format!("/projects/{}", project["id"].as_str().expect("id"));
        let response = session.handle(Request::put(path, json!({ "colour": 1 })));
        assert_eq!(response.status, 501);
    }
}
