//! Entity rows and the `contains` tree.

use super::{
    ENTITIES, PROJECT_ENTITIES, applications, attrs, encode, projects, read_row, relationships, scoped_keys,
    store_err,
};
use crate::primitives::{CONTAINS, MAX_TREE_DEPTH};
use crate::{
    Entity, EntityId, EntityRecord, GraphSnapshot, ProjectId, Relationship, RelationshipId,
    WeftError, advance_millis, now_millis,
};
use redb::WriteTransaction;
use std::collections::{BTreeMap, BTreeSet};

/// Insert or replace a row. A replaced row that lived in another project
/// loses its old index entry.
fn write_row(txn: &WriteTransaction, entity: &Entity) -> Result<(), WeftError> {
    let bytes = encode(entity)?;
    let replaced: Option<Entity> = {
        let mut table = txn.open_table(ENTITIES).map_err(store_err)?;
        let previous = table
            .insert(entity.id.as_str(), bytes.as_slice())
            .map_err(store_err)?;
        match previous {
            Some(data) => Some(super::decode(data.value())?),
            None => None,
        }
    };
    let mut index = txn.open_table(PROJECT_ENTITIES).map_err(store_err)?;
    if let Some(old) = replaced.filter(|old| old.project_id != entity.project_id) {
        index
            .remove((old.project_id.as_str(), entity.id.as_str()))
            .map_err(store_err)?;
    }
    index
        .insert((entity.project_id.as_str(), entity.id.as_str()), ())
        .map_err(store_err)?;
    Ok(())
}

/// Create an entity with a fresh id in an existing project.
pub fn create(txn: &WriteTransaction, project_id: &ProjectId) -> Result<Entity, WeftError> {
    create_with_id(txn, project_id, EntityId::generate())
}

/// Create an entity with a caller-chosen id in an existing project.
///
/// An id that is already taken is rejected.
pub fn create_with_id(
    txn: &WriteTransaction,
    project_id: &ProjectId,
    id: EntityId,
) -> Result<Entity, WeftError> {
    if projects::get(txn, project_id)?.is_none() {
        return Err(WeftError::NotFound(format!("project {}", project_id)));
    }
    if get_row(txn, &id)?.is_some() {
        return Err(WeftError::InvalidRequest(format!("entity {} already exists", id)));
    }
    let now = now_millis();
    let entity = Entity {
        id,
        project_id: project_id.clone(),
        created_at: now,
        modified_at: now,
    };
    write_row(txn, &entity)?;
    Ok(entity)
}

/// Re-create an entity exactly as recorded: id, timestamps and attributes.
///
/// This is the undo/redo restore path. An existing row with the same id is
/// replaced and its attributes are reset to the recorded ones.
pub fn restore(txn: &WriteTransaction, record: &EntityRecord) -> Result<(), WeftError> {
    attrs::clear(txn, &record.entity.id)?;
    attrs::put_all(txn, &record.entity.id, &record.attrs)?;
    write_row(txn, &record.entity)
}

/// Get an entity row without attributes.
pub fn get_row(txn: &WriteTransaction, id: &EntityId) -> Result<Option<Entity>, WeftError> {
    let table = txn.open_table(ENTITIES).map_err(store_err)?;
    read_row(&table, id.as_str())
}

/// Get an entity with its attributes.
pub fn get(txn: &WriteTransaction, id: &EntityId) -> Result<Option<EntityRecord>, WeftError> {
    match get_row(txn, id)? {
        Some(entity) => {
            let attrs = attrs::list(txn, id)?;
            Ok(Some(EntityRecord { entity, attrs }))
        }
        None => Ok(None),
    }
}

/// All entities of a project with their attributes, in id order.
pub fn list(txn: &WriteTransaction, project_id: &ProjectId) -> Result<Vec<EntityRecord>, WeftError> {
    let ids = {
        let index = txn.open_table(PROJECT_ENTITIES).map_err(store_err)?;
        scoped_keys(&index, project_id.as_str())?
    };
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get(txn, &EntityId(id))? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Advance `modified_at` of an entity. A missing entity is ignored.
pub(crate) fn touch(txn: &WriteTransaction, id: &EntityId) -> Result<(), WeftError> {
    if let Some(mut entity) = get_row(txn, id)? {
        entity.modified_at = advance_millis(entity.modified_at);
        write_row(txn, &entity)?;
    }
    Ok(())
}

/// Delete an entity row, its attributes and its application markers.
/// Relationships are left alone.
///
/// Returns the prior record, or `None` if the entity did not exist.
pub fn delete(txn: &WriteTransaction, id: &EntityId) -> Result<Option<EntityRecord>, WeftError> {
    let Some(record) = get(txn, id)? else {
        return Ok(None);
    };
    attrs::clear(txn, id)?;
    applications::clear(txn, id)?;
    {
        let mut table = txn.open_table(ENTITIES).map_err(store_err)?;
        table.remove(id.as_str()).map_err(store_err)?;
    }
    let mut index = txn.open_table(PROJECT_ENTITIES).map_err(store_err)?;
    index
        .remove((record.entity.project_id.as_str(), id.as_str()))
        .map_err(store_err)?;
    Ok(Some(record))
}

/// Walk outgoing `contains` edges depth-first from `root`, pre-order.
///
/// Each entity appears once, in discovery order; children are visited in
/// relationship-key order. The root is always first.
pub fn contains_tree(txn: &WriteTransaction, root: &EntityId) -> Result<Vec<EntityId>, WeftError> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![(root.clone(), 0usize)];

    while let Some((id, depth)) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if depth > MAX_TREE_DEPTH {
            return Err(WeftError::InvalidRequest(format!(
                "contains tree under {} is deeper than {}",
                root, MAX_TREE_DEPTH
            )));
        }
        let children = relationships::children(txn, &id, CONTAINS)?;
        order.push(id);
        for child in children.into_iter().rev() {
            if !seen.contains(&child) {
                stack.push((child, depth.saturating_add(1)));
            }
        }
    }
    Ok(order)
}

/// Delete an entity and every `contains` descendant.
///
/// The whole prior state (entity rows with attributes, every relationship
/// touching a removed entity, application markers) is captured before
/// anything is removed.
/// Relationships go first, then entities bottom-up.
pub fn cascade_delete(txn: &WriteTransaction, root: &EntityId) -> Result<Option<GraphSnapshot>, WeftError> {
    if get_row(txn, root)?.is_none() {
        return Ok(None);
    }
    let tree = contains_tree(txn, root)?;

    let mut snapshot = GraphSnapshot::default();
    let mut touching: BTreeMap<RelationshipId, Relationship> = BTreeMap::new();
    for id in &tree {
        if let Some(record) = get(txn, id)? {
            snapshot.entities.push(record);
        }
        snapshot.applications.extend(applications::list(txn, id)?);
        for rel in relationships::outgoing(txn, id)?
            .into_iter()
            .chain(relationships::incoming(txn, id)?)
        {
            touching.entry(rel.id.clone()).or_insert(rel);
        }
    }
    snapshot.relationships = touching.into_values().collect();

    for rel in &snapshot.relationships {
        relationships::delete(txn, &rel.id)?;
    }
    for id in tree.iter().rev() {
        delete(txn, id)?;
    }
    Ok(Some(snapshot))
}

/// Restore a captured snapshot: entities, then relationships, then markers.
pub fn restore_snapshot(txn: &WriteTransaction, snapshot: &GraphSnapshot) -> Result<(), WeftError> {
    for record in &snapshot.entities {
        restore(txn, record)?;
    }
    for rel in &snapshot.relationships {
        relationships::create_with_id(txn, rel)?;
    }
    applications::put_all(txn, &snapshot.applications)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use crate::{ApplicationId, AttrValue, NewRelationship, StampApplication, StampId};

    fn marker(entity: &EntityId, application: &str) -> StampApplication {
        StampApplication {
            entity_id: entity.clone(),
            stamp_id: StampId::from("s"),
            application_id: ApplicationId::from(application),
            applied_at: 7,
        }
    }

    fn contains(txn: &WriteTransaction, project: &ProjectId, from: &EntityId, to: &EntityId) {
        relationships::create(
            txn,
            project,
            NewRelationship {
                from_entity: from.clone(),
                to_entity: to.clone(),
                kind: CONTAINS.to_string(),
                label: None,
                binding_name: None,
                from_port: None,
                to_port: None,
            },
        )
        .expect("relationship");
    }

    #[test]
    fn create_requires_project() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let err = create(&txn, &ProjectId::from("ghost"));
        assert!(matches!(err, Err(WeftError::NotFound(_))));
    }

    #[test]
    fn delete_missing_is_noop() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        assert!(delete(&txn, &EntityId::from("ghost")).expect("delete").is_none());
        assert!(cascade_delete(&txn, &EntityId::from("ghost")).expect("delete").is_none());
    }

    #[test]
    fn delete_removes_row_and_attrs() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let e = create(&txn, &p.id).expect("entity");
        attrs::set(&txn, &e.id, "color", &AttrValue::String("red".into())).expect("set");

        let prior = delete(&txn, &e.id).expect("delete").expect("existed");
        assert_eq!(prior.attrs.len(), 1);
        assert!(get(&txn, &e.id).expect("get").is_none());
        assert!(attrs::list(&txn, &e.id).expect("list").is_empty());
        assert!(list(&txn, &p.id).expect("list").is_empty());
    }

    #[test]
    fn contains_tree_is_preorder() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let root = create(&txn, &p.id).expect("e").id;
        let a = create(&txn, &p.id).expect("e").id;
        let a1 = create(&txn, &p.id).expect("e").id;
        let b = create(&txn, &p.id).expect("e").id;
        contains(&txn, &p.id, &root, &a);
        contains(&txn, &p.id, &a, &a1);
        contains(&txn, &p.id, &root, &b);

        let tree = contains_tree(&txn, &root).expect("tree");
        assert_eq!(tree[0], root);
        assert_eq!(tree.len(), 4);
        let pos = |id: &EntityId| tree.iter().position(|x| x == id).expect("present");
        assert!(pos(&a) < pos(&a1));
    }

    #[test]
    fn contains_cycle_terminates() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let a = create(&txn, &p.id).expect("e").id;
        let b = create(&txn, &p.id).expect("e").id;
        contains(&txn, &p.id, &a, &b);
        contains(&txn, &p.id, &b, &a);

        assert_eq!(contains_tree(&txn, &a).expect("tree"), vec![a, b]);
    }

    #[test]
    fn cascade_delete_then_restore_is_exact() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let root = create(&txn, &p.id).expect("e").id;
        let child = create(&txn, &p.id).expect("e").id;
        let outsider = create(&txn, &p.id).expect("e").id;
        contains(&txn, &p.id, &root, &child);
        contains(&txn, &p.id, &outsider, &root);
        attrs::set(&txn, &child, "k", &AttrValue::Number(2.0)).expect("set");

        let before_entities = list(&txn, &p.id).expect("list");
        let before_rels = relationships::list(&txn, &p.id).expect("list");

        let snapshot = cascade_delete(&txn, &root).expect("cascade").expect("existed");
        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.relationships.len(), 2);
        assert_eq!(list(&txn, &p.id).expect("list").len(), 1);
        assert!(relationships::list(&txn, &p.id).expect("list").is_empty());

        restore_snapshot(&txn, &snapshot).expect("restore");
        assert_eq!(list(&txn, &p.id).expect("list"), before_entities);
        assert_eq!(relationships::list(&txn, &p.id).expect("list"), before_rels);
    }

    #[test]
    fn create_with_taken_id_is_rejected() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let e = create(&txn, &p.id).expect("entity");

        let err = create_with_id(&txn, &p.id, e.id.clone());
        assert!(matches!(err, Err(WeftError::InvalidRequest(_))));
        assert_eq!(get_row(&txn, &e.id).expect("get"), Some(e));
    }

    #[test]
    fn restore_into_other_project_drops_stale_index() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let q = projects::create(&txn, "q").expect("project");
        let e = create(&txn, &p.id).expect("entity");

        let mut moved = get(&txn, &e.id).expect("get").expect("row");
        moved.entity.project_id = q.id.clone();
        restore(&txn, &moved).expect("restore");

        assert!(list(&txn, &p.id).expect("list").is_empty());
        assert_eq!(list(&txn, &q.id).expect("list"), vec![moved]);
    }

    #[test]
    fn delete_clears_markers_and_cascade_restores_them() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let root = create(&txn, &p.id).expect("e").id;
        let child = create(&txn, &p.id).expect("e").id;
        contains(&txn, &p.id, &root, &child);
        applications::put_all(&txn, &[marker(&root, "a1"), marker(&child, "a2")]).expect("markers");

        let snapshot = cascade_delete(&txn, &root).expect("cascade").expect("existed");
        assert_eq!(snapshot.applications.len(), 2);
        assert!(applications::list(&txn, &root).expect("list").is_empty());
        assert!(applications::list(&txn, &child).expect("list").is_empty());

        restore_snapshot(&txn, &snapshot).expect("restore");
        assert_eq!(applications::list(&txn, &root).expect("list"), vec![marker(&root, "a1")]);
        assert_eq!(applications::list(&txn, &child).expect("list"), vec![marker(&child, "a2")]);

        delete(&txn, &child).expect("delete");
        assert!(applications::list(&txn, &child).expect("list").is_empty());
    }
}
