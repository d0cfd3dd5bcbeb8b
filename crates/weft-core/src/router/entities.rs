//! `/projects/:project_id/entities` endpoints, including attributes.

use super::projects::project_path;
use super::{Kit, Params, RouteNode, flag, param, parse, restore_body, to_json};
use crate::history::Operation;
use crate::storage::{applications, attrs, entities, projects};
use crate::{AttrMap, AttrValue, EntityId, EntityRecord, GraphSnapshot, ProjectId, StampApplication, WeftError};
use redb::WriteTransaction;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

pub(super) fn routes() -> RouteNode {
    RouteNode::new().get(list).put(create).unknown(
        "entity_id",
        RouteNode::new()
            .get(get)
            .put(update)
            .child(
                "attrs",
                RouteNode::new()
                    .get(list_attrs)
                    .put(patch_attrs)
                    .unknown("key", RouteNode::new().get(get_attr).put(put_attr)),
            )
            .child("attrPatch", RouteNode::new().put(patch_attrs_explicit)),
    )
}

fn entity_path(project: &ProjectId, entity: &EntityId) -> String {
    format!("{}/entities/{}", project_path(project), entity)
}

fn ids(params: &Params) -> Result<(ProjectId, EntityId), WeftError> {
    Ok((
        ProjectId::from(param(params, "project_id")?),
        EntityId::from(param(params, "entity_id")?),
    ))
}

pub(super) fn ensure_project(txn: &WriteTransaction, project: &ProjectId) -> Result<(), WeftError> {
    match projects::get(txn, project)? {
        Some(_) => Ok(()),
        None => Err(WeftError::NotFound(format!("project {}", project))),
    }
}

/// An entity, `None` if missing; an entity of another project is an error.
fn scoped(txn: &WriteTransaction, project: &ProjectId, entity: &EntityId) -> Result<Option<EntityRecord>, WeftError> {
    match entities::get(txn, entity)? {
        Some(record) if record.entity.project_id != *project => Err(WeftError::NotFound(format!(
            "entity {} in project {}",
            entity, project
        ))),
        other => Ok(other),
    }
}

fn existing(txn: &WriteTransaction, project: &ProjectId, entity: &EntityId) -> Result<EntityRecord, WeftError> {
    scoped(txn, project, entity)?.ok_or_else(|| WeftError::NotFound(format!("entity {}", entity)))
}

fn inputs(raw: BTreeMap<String, Value>) -> AttrMap {
    raw.into_iter().map(|(k, v)| (k, AttrValue::from_input(v))).collect()
}

// =============================================================================
// ENTITIES
// =============================================================================

#[derive(Deserialize, Default)]
struct NewEntity {
    #[serde(default)]
    attrs: BTreeMap<String, Value>,
}

fn list(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    ensure_project(kit.txn(), &project)?;
    to_json(&entities::list(kit.txn(), &project)?)
}

fn create(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let project = ProjectId::from(param(params, "project_id")?);
    let new: NewEntity = if body.is_null() { NewEntity::default() } else { parse(body)? };
    let txn = kit.txn();

    let entity = entities::create(txn, &project)?;
    let initial = inputs(new.attrs);
    if !initial.is_empty() {
        attrs::set_batch(txn, &entity.id, &initial)?;
    }
    let record = existing(txn, &project, &entity.id)?;

    let path = entity_path(&project, &entity.id);
    kit.record(
        Operation::new(&path, restore_body("entity", &record)?),
        Operation::new(&path, Value::Null),
    )?;
    to_json(&record)
}

fn get(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    to_json(&existing(kit.txn(), &project, &entity)?)
}

fn restore_batch_body(snapshot: &GraphSnapshot) -> Result<Value, WeftError> {
    Ok(json!({
        "_restoreBatch": true,
        "entities": to_json(&snapshot.entities)?,
        "relationships": to_json(&snapshot.relationships)?,
        "applications": to_json(&snapshot.applications)?,
    }))
}

/// A deleted entity as carried by `{_restore, entity, applications}`.
#[derive(Deserialize)]
struct RestoredEntity {
    entity: EntityRecord,
    #[serde(default)]
    applications: Vec<StampApplication>,
}

fn restore_entity_body(record: &EntityRecord, markers: &[StampApplication]) -> Result<Value, WeftError> {
    Ok(json!({
        "_restore": true,
        "entity": to_json(record)?,
        "applications": to_json(&markers)?,
    }))
}

fn stray_marker<'m>(markers: &'m [StampApplication], owners: &[&EntityId]) -> Option<&'m StampApplication> {
    markers.iter().find(|m| !owners.contains(&&m.entity_id))
}

/// `null` deletes, `{cascade}` deletes the `contains` subtree,
/// `{_restore, entity, applications}` and
/// `{_restoreBatch, entities, relationships, applications}` re-create
/// recorded state.
fn update(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    let path = entity_path(&project, &entity);
    let txn = kit.txn();

    if body.is_null() {
        if scoped(txn, &project, &entity)?.is_none() {
            return Ok(json!({ "deleted": false }));
        }
        let markers = applications::list(txn, &entity)?;
        let Some(record) = entities::delete(txn, &entity)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, Value::Null),
            Operation::new(&path, restore_entity_body(&record, &markers)?),
        )?;
        return Ok(json!({ "deleted": true }));
    }

    if flag(&body, "cascade") {
        if scoped(txn, &project, &entity)?.is_none() {
            return Ok(json!({ "deleted": false }));
        }
        let Some(snapshot) = entities::cascade_delete(txn, &entity)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, json!({ "cascade": true })),
            Operation::new(&path, restore_batch_body(&snapshot)?),
        )?;
        return Ok(json!({
            "deleted": true,
            "entities": snapshot.entities.len(),
            "relationships": snapshot.relationships.len(),
        }));
    }

    if flag(&body, "_restore") {
        let RestoredEntity { entity: record, applications: markers } = parse(body)?;
        if record.entity.id != entity || record.entity.project_id != project {
            return Err(WeftError::InvalidRequest(format!(
                "entity {} restored at {}",
                record.entity.id, path
            )));
        }
        if let Some(stray) = stray_marker(&markers, &[&entity]) {
            return Err(WeftError::InvalidRequest(format!(
                "application {} belongs to entity {}",
                stray.application_id, stray.entity_id
            )));
        }
        ensure_project(txn, &project)?;
        entities::restore(txn, &record)?;
        applications::put_all(txn, &markers)?;
        kit.record(
            Operation::new(&path, restore_entity_body(&record, &markers)?),
            Operation::new(&path, Value::Null),
        )?;
        return to_json(&record);
    }

    if flag(&body, "_restoreBatch") {
        let snapshot: GraphSnapshot = parse(body)?;
        if let Some(stray) = snapshot
            .entities
            .iter()
            .find(|r| r.entity.project_id != project)
        {
            return Err(WeftError::InvalidRequest(format!(
                "entity {} belongs to project {}",
                stray.entity.id, stray.entity.project_id
            )));
        }
        let owners: Vec<&EntityId> = snapshot.entities.iter().map(|r| &r.entity.id).collect();
        if let Some(stray) = stray_marker(&snapshot.applications, &owners) {
            return Err(WeftError::InvalidRequest(format!(
                "application {} belongs to entity {} outside the batch",
                stray.application_id, stray.entity_id
            )));
        }
        ensure_project(txn, &project)?;
        entities::restore_snapshot(txn, &snapshot)?;
        kit.record(
            Operation::new(&path, restore_batch_body(&snapshot)?),
            Operation::new(&path, json!({ "cascade": true })),
        )?;
        return Ok(json!({
            "restored": true,
            "entities": snapshot.entities.len(),
            "relationships": snapshot.relationships.len(),
        }));
    }

    Err(WeftError::NotImplemented(format!("PUT {} with this body", path)))
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Explicit attribute patch: keys to set and keys to remove.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AttrPatch {
    #[serde(default)]
    set: BTreeMap<String, Value>,
    #[serde(default)]
    delete: Vec<String>,
}

fn patch_body(set: &AttrMap, delete: &[String]) -> Result<Value, WeftError> {
    Ok(json!({ "set": to_json(set)?, "delete": delete }))
}

fn list_attrs(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    to_json(&existing(kit.txn(), &project, &entity)?.attrs)
}

/// A plain object sets every member (set_batch). Every key is an
/// attribute name, whatever it looks like.
fn patch_attrs(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let raw: BTreeMap<String, Value> = parse(body)?;
    apply_patch(kit, params, inputs(raw), Vec::new())
}

/// `{set, delete}` sets and removes explicitly. History records attribute
/// patches in this form.
fn patch_attrs_explicit(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let patch: AttrPatch = parse(body)?;
    apply_patch(kit, params, inputs(patch.set), patch.delete)
}

fn apply_patch(kit: &mut Kit<'_>, params: &Params, set: AttrMap, delete: Vec<String>) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    let txn = kit.txn();
    let before = existing(txn, &project, &entity)?.attrs;

    if set.is_empty() && delete.is_empty() {
        return to_json(&before);
    }
    if !set.is_empty() {
        attrs::set_batch(txn, &entity, &set)?;
    }
    for key in &delete {
        attrs::delete(txn, &entity, key)?;
    }

    let mut restore = AttrMap::new();
    let mut remove = Vec::new();
    for key in set.keys().chain(delete.iter()) {
        match before.get(key) {
            Some(value) => {
                restore.insert(key.clone(), value.clone());
            }
            None => {
                if !remove.contains(key) {
                    remove.push(key.clone());
                }
            }
        }
    }

    let path = format!("{}/attrPatch", entity_path(&project, &entity));
    tracing::debug!(
        entity = %entity,
        set = ?set.iter().map(|(k, v)| (k.as_str(), v.type_name())).collect::<Vec<_>>(),
        deleted = delete.len(),
        "attributes patched"
    );
    kit.record(
        Operation::new(&path, patch_body(&set, &delete)?),
        Operation::new(&path, patch_body(&restore, &remove)?),
    )?;
    to_json(&attrs::list(txn, &entity)?)
}

fn get_attr(kit: &mut Kit<'_>, params: &Params, _body: Value) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    let key = param(params, "key")?;
    existing(kit.txn(), &project, &entity)?;
    let value = attrs::get(kit.txn(), &entity, key)?
        .ok_or_else(|| WeftError::NotFound(format!("attribute {} of entity {}", key, entity)))?;
    to_json(&value)
}

/// `null` deletes the key; any other body is the new value.
fn put_attr(kit: &mut Kit<'_>, params: &Params, body: Value) -> Result<Value, WeftError> {
    let (project, entity) = ids(params)?;
    let key = param(params, "key")?;
    let txn = kit.txn();
    existing(txn, &project, &entity)?;
    let path = format!("{}/attrs/{}", entity_path(&project, &entity), key);

    if body.is_null() {
        let Some(previous) = attrs::delete(txn, &entity, key)? else {
            return Ok(json!({ "deleted": false }));
        };
        kit.record(
            Operation::new(&path, Value::Null),
            Operation::new(&path, to_json(&previous)?),
        )?;
        return Ok(json!({ "deleted": true }));
    }

    let value = AttrValue::from_input(body);
    let previous = attrs::set(txn, &entity, key, &value)?;
    let backward = match &previous {
        Some(old) => to_json(old)?,
        None => Value::Null,
    };
    kit.record(Operation::new(&path, to_json(&value)?), Operation::new(&path, backward))?;
    to_json(&value)
}
