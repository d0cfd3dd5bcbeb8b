//! `/history` endpoints.
//!
//! Pushes are staged on the [`Kit`] and land in the log only after the
//! request commits. Undo and redo move entries between stacks right away and
//! journal the move, so the session can put it back if the commit fails.

use super::{HistoryMove, Kit, Params, RouteNode, parse, to_json};
use crate::history::{HistoryEntry, HistoryOutcome};
use crate::WeftError;
use serde_json::{Value, json};

pub(super) fn routes() -> RouteNode {
    RouteNode::new()
        .get(status)
        .child("push", RouteNode::new().put(push))
        .child("beginBatch", RouteNode::new().put(begin_batch))
        .child("endBatch", RouteNode::new().put(end_batch))
        .child("cancelBatch", RouteNode::new().put(cancel_batch))
        .child("undo", RouteNode::new().put(undo))
        .child("redo", RouteNode::new().put(redo))
        .child("clear", RouteNode::new().put(clear))
}

fn outcome(kit: &mut Kit<'_>, outcome: HistoryOutcome) -> Value {
    let history = kit.history();
    json!({
        "outcome": outcome,
        "undo_size": history.undo_len(),
        "redo_size": history.redo_len(),
    })
}

fn status(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    to_json(&kit.history().status())
}

fn push(kit: &mut Kit<'_>, _params: &Params, body: Value) -> Result<Value, WeftError> {
    let entry: HistoryEntry = parse(body)?;
    kit.stage(entry);
    Ok(json!({ "pushed": true }))
}

fn begin_batch(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    kit.checkpoint();
    kit.history().begin_batch()?;
    Ok(json!({ "batching": true }))
}

fn end_batch(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    kit.checkpoint();
    let folded = kit.history().end_batch()?;
    Ok(json!({ "batching": false, "folded": folded }))
}

fn cancel_batch(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    kit.checkpoint();
    let discarded = kit.history().cancel_batch()?;
    Ok(json!({ "batching": false, "discarded": discarded }))
}

fn clear(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    kit.checkpoint();
    kit.history().clear();
    Ok(outcome(kit, HistoryOutcome::Applied))
}

/// Replay the backward sides of the newest entry. On failure the entry goes
/// back on the undo stack and nothing is applied.
fn undo(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    let Some(entry) = kit.history().pop_undo() else {
        return Ok(outcome(kit, HistoryOutcome::Empty));
    };
    if let Err(err) = kit.replay(&entry.undo_operations()) {
        kit.history().restore_undo(entry);
        return Err(err);
    }
    kit.history().restore_redo(entry);
    kit.journal(HistoryMove::Undone);
    tracing::debug!(undo = kit.history().undo_len(), redo = kit.history().redo_len(), "undo");
    Ok(outcome(kit, HistoryOutcome::Applied))
}

/// Replay the forward sides of the newest redo entry.
fn redo(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    let Some(entry) = kit.history().pop_redo() else {
        return Ok(outcome(kit, HistoryOutcome::Empty));
    };
    if let Err(err) = kit.replay(&entry.redo_operations()) {
        kit.history().restore_redo(entry);
        return Err(err);
    }
    kit.history().restore_undo(entry);
    kit.journal(HistoryMove::Redone);
    tracing::debug!(undo = kit.history().undo_len(), redo = kit.history().redo_len(), "redo");
    Ok(outcome(kit, HistoryOutcome::Applied))
}
