//! `/stamps` endpoints.

use super::{Kit, Params, RouteNode, field, flag, param, parse, restore_body, to_json};
use crate::history::Operation;
use crate::stamps::{self, ApplyRecord, NewStamp, Stamp, StampUpdate};
use crate::{EntityId, StampId, WeftError};
use serde_json::{Value, json};

pub(super) fn routes() -> RouteNode {
    RouteNode::new().get(list).put(create).unknown(
        "stamp_id",
        RouteNode::new()
            .get(get)
            .put(update)
            .child("apply", RouteNode::new().unknown("target", RouteNode::new().put(apply)))
            .child("unapply", RouteNode::new().unknown("target", RouteNode::new().put(unapply)))
            .child(
                "applications",
                RouteNode::new().unknown("entity_id", RouteNode::new().get(applications)),
            ),
    )
}

fn stamp_path(id: &StampId) -> String {
    format!("/stamps/{}", id)
}

fn stamp_id(params: &Params) -> Result<StampId, WeftError> {
    Ok(StampId::from(param(params, "stamp_id")?))
}

fn list(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    to_json(&stamps::list(kit.txn())?)
}

fn create(kit: &mut Kit<'_>, _params: &Params, body: Value) -> Result<Value, WeftError> {
    let new: NewStamp = parse(body)?;
    let stamp = stamps::create(kit.txn(), new)?;
    let path = stamp_path(&stamp.summary.id);
    kit.record(
        Operation::new(&path, restore_body("stamp", &stamp)?),
        Operation::new(&path, Value::Null),
    )?;
    to_json(&stamp)
}

fn get(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let id = stamp_id(params)?;
    let stamp = stamps::get(kit.txn(), &id)?.ok_or_else(|| WeftError::NotFound(format!("stamp {}", id)))?;
    to_json(&stamp)
}

/// `null` deletes, `{_restore, stamp}` re-creates, anything else is a
/// metadata update.
fn update(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let id = stamp_id(params)?;
    let path = stamp_path(&id);
    let txn = kit.txn();

    if body.is_null() {
        let Some(stamp) = stamps::delete(txn, &id)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, Value::Null),
            Operation::new(&path, restore_body("stamp", &stamp)?),
        )?;
        return Ok(json!({ "deleted": true }));
    }

    if flag(&body, "_restore") {
        let stamp: Stamp = parse(field(body, "stamp")?)?;
        if stamp.summary.id != id {
            return Err(WeftError::InvalidRequest(format!(
                "stamp {} restored at {}",
                stamp.summary.id, path
            )));
        }
        stamps::create_with_id(txn, &stamp)?;
        kit.record(
            Operation::new(&path, restore_body("stamp", &stamp)?),
            Operation::new(&path, Value::Null),
        )?;
        return to_json(&stamp.summary);
    }

    let changes: StampUpdate = parse(body)?;
    if changes.is_empty() {
        return Err(WeftError::NotImplemented(format!("PUT {} with this body", path)));
    }
    let forward = to_json(&changes)?;
    let previous = stamps::update(txn, &id, changes)?;
    kit.record(
        Operation::new(&path, forward),
        Operation::new(&path, to_json(&StampUpdate::reverting_to(&previous))?),
    )?;
    get(kit, params, Value::Null)
}

/// Body is `null`, or a previous apply record whose ids are reused.
fn apply(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let id = stamp_id(params)?;
    let target = EntityId::from(param(params, "target")?);
    let pinned: Option<ApplyRecord> = if body.is_null() { None } else { Some(parse(body)?) };

    let record = stamps::apply(kit.txn(), &id, &target, pinned.as_ref())?;
    let pinned_body = to_json(&record)?;
    kit.record(
        Operation::new(format!("{}/apply/{}", stamp_path(&id), target), pinned_body.clone()),
        Operation::new(format!("{}/unapply/{}", stamp_path(&id), target), pinned_body),
    )?;
    to_json(&record)
}

/// Body is the apply record being inverted.
fn unapply(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let id = stamp_id(params)?;
    let target = EntityId::from(param(params, "target")?);
    let record: ApplyRecord = parse(body)?;

    stamps::unapply(kit.txn(), &id, &target, &record)?;
    let record_body = to_json(&record)?;
    kit.record(
        Operation::new(format!("{}/unapply/{}", stamp_path(&id), target), record_body.clone()),
        Operation::new(format!("{}/apply/{}", stamp_path(&id), target), record_body),
    )?;
    Ok(json!({ "unapplied": true }))
}

/// Live applications of this stamp on one entity.
fn applications(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let id = stamp_id(params)?;
    let entity = EntityId::from(param(params, "entity_id")?);
    let mut markers = stamps::applications(kit.txn(), &entity)?;
    markers.retain(|m| m.stamp_id == id);
    to_json(&markers)
}
