//! `/projects` endpoints.

use super::{Kit, Params, RouteNode, entities, field, flag, param, parse, relationships, restore_body, to_json};
use crate::history::Operation;
use crate::storage::projects;
use crate::{GraphSnapshot, ProjectId, ProjectSnapshot, WeftError};
use serde::Deserialize;
use serde_json::{Value, json};

pub(super) fn routes() -> RouteNode {
    RouteNode::new().get(list).put(create).unknown(
        "project_id",
        RouteNode::new()
            .get(get)
            .put(update)
            .child("entities", entities::routes())
            .child("relationships", relationships::routes()),
    )
}

pub(super) fn project_path(id: &ProjectId) -> String {
    format!("/projects/{}", id)
}

#[derive(Deserialize)]
struct ProjectName {
    name: String,
}

fn list(kit: &mut Kit<'_>, _params: &Params, _body: Value) -> Result<Value, WeftError> {
    to_json(&projects::list(kit.txn())?)
}

fn create(kit: &mut Kit<'_>, _params: &Params, body: Value) -> Result<Value, WeftError> {
    let ProjectName { name } = parse(body)?;
    let project = projects::create(kit.txn(), &name)?;
    let snapshot = ProjectSnapshot {
        project: project.clone(),
        graph: GraphSnapshot::default(),
    };
    let path = project_path(&project.id);
    kit.record(
        Operation::new(&path, restore_body("snapshot", &snapshot)?),
        Operation::new(&path, Value::Null),
    )?;
    to_json(&project)
}

fn get(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let id = ProjectId::from(param(params, "project_id")?);
    let project = projects::get(kit.txn(), &id)?.ok_or_else(|| WeftError::NotFound(format!("project {}", id)))?;
    to_json(&project)
}

/// `null` deletes, `{_restore, snapshot}` restores, `{name}` renames.
fn update(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let id = ProjectId::from(param(params, "project_id")?);
    let path = project_path(&id);

    if body.is_null() {
        let Some(snapshot) = projects::delete(kit.txn(), &id)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, Value::Null),
            Operation::new(&path, restore_body("snapshot", &snapshot)?),
        )?;
        return Ok(json!({
            "deleted": true,
            "entities": snapshot.graph.entities.len(),
            "relationships": snapshot.graph.relationships.len(),
        }));
    }

    if flag(&body, "_restore") {
        let snapshot: ProjectSnapshot = parse(field(body, "snapshot")?)?;
        if snapshot.project.id != id {
            return Err(WeftError::InvalidRequest(format!(
                "snapshot of project {} restored at {}",
                snapshot.project.id, path
            )));
        }
        projects::restore(kit.txn(), &snapshot)?;
        kit.record(
            Operation::new(&path, restore_body("snapshot", &snapshot)?),
            Operation::new(&path, Value::Null),
        )?;
        return to_json(&snapshot.project);
    }

    if let Some(name) = body.get("name").and_then(Value::as_str) {
        let previous = projects::rename(kit.txn(), &id, name)?;
        kit.record(
            Operation::new(&path, json!({ "name": name })),
            Operation::new(&path, json!({ "name": previous.name })),
        )?;
        return get(kit, params, Value::Null);
    }

    Err(WeftError::NotImplemented(format!("PUT {} with this body", path)))
}
