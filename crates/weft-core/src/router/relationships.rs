//! `/projects/:project_id/relationships` endpoints.

use super::entities::ensure_project;
use super::projects::project_path;
use super::{Kit, Params, RouteNode, field, flag, param, parse, restore_body, to_json};
use crate::history::Operation;
use crate::storage::relationships;
use crate::{NewRelationship, ProjectId, Relationship, RelationshipId, WeftError};
use redb::WriteTransaction;
use serde_json::{Value, json};

pub(super) fn routes() -> RouteNode {
    RouteNode::new()
        .get(list)
        .put(create)
        .unknown("relationship_id", RouteNode::new().get(get).put(update))
}

fn relationship_path(project: &ProjectId, id: &RelationshipId) -> String {
    format!("{}/relationships/{}", project_path(project), id)
}

fn scoped(
    txn: &WriteTransaction,
    project: &ProjectId,
    id: &RelationshipId,
) -> Result<Option<Relationship>, WeftError> {
    match relationships::get(txn, id)? {
        Some(rel) if rel.project_id != *project => Err(WeftError::NotFound(format!(
            "relationship {} in project {}",
            id, project
        ))),
        other => Ok(other),
    }
}

fn list(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    ensure_project(kit.txn(), &project)?;
    to_json(&relationships::list(kit.txn(), &project)?)
}

fn create(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    let new: NewRelationship = parse(body)?;
    let rel = relationships::create(kit.txn(), &project, new)?;
    let path = relationship_path(&project, &rel.id);
    kit.record(
        Operation::new(&path, restore_body("relationship", &rel)?),
        Operation::new(&path, Value::Null),
    )?;
    to_json(&rel)
}

fn get(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    let id = RelationshipId::from(param(params, "relationship_id")?);
    let rel = scoped(kit.txn(), &project, &id)?
        .ok_or_else(|| WeftError::NotFound(format!("relationship {}", id)))?;
    to_json(&rel)
}

/// `null` deletes, `{_restore, relationship}` re-creates.
fn update(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    let id = RelationshipId::from(param(params, "relationship_id")?);
    let path = relationship_path(&project, &id);
    let txn = kit.txn();

    if body.is_null() {
        if scoped(txn, &project, &id)?.is_none() {
            return Ok(json!({ "deleted": false }));
        }
        let Some(rel) = relationships::delete(txn, &id)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, Value::Null),
            Operation::new(&path, restore_body("relationship", &rel)?),
        )?;
        return Ok(json!({ "deleted": true }));
    }

    if flag(&body, "_restore") {
        let rel: Relationship = parse(field(body, "relationship")?)?;
        if rel.id != id || rel.project_id != project {
            return Err(WeftError::InvalidRequest(format!(
                "relationship {} restored at {}",
                rel.id, path
            )));
        }
        ensure_project(txn, &project)?;
        relationships::create_with_id(txn, &rel)?;
        kit.record(
            Operation::new(&path, restore_body("relationship", &rel)?),
            Operation::new(&path, Value::Null),
        )?;
        return to_json(&rel);
    }

    Err(WeftError::NotImplemented(format!("PUT {} with this body", path)))
}
