//! Directed relationship rows and their project/endpoint indexes.

use super::{INCOMING, OUTGOING, PROJECT_RELATIONSHIPS, RELATIONSHIPS, encode, projects, read_row, scoped_keys, store_err};
use crate::{EntityId, NewRelationship, ProjectId, Relationship, RelationshipId, WeftError, now_millis};
use redb::{TableDefinition, WriteTransaction};

type Index = TableDefinition<'static, (&'static str, &'static str), ()>;

fn index_scopes(rel: &Relationship) -> [(Index, &str); 3] {
    [
        (PROJECT_RELATIONSHIPS, rel.project_id.as_str()),
        (OUTGOING, rel.from_entity.as_str()),
        (INCOMING, rel.to_entity.as_str()),
    ]
}

fn unindex(txn: &WriteTransaction, rel: &Relationship) -> Result<(), WeftError> {
    for (def, scope) in index_scopes(rel) {
        let mut index = txn.open_table(def).map_err(store_err)?;
        index.remove((scope, rel.id.as_str())).map_err(store_err)?;
    }
    Ok(())
}

/// Insert or replace a row. The index keys of a replaced row are removed
/// before the new ones go in.
fn write_row(txn: &WriteTransaction, rel: &Relationship) -> Result<(), WeftError> {
    if let Some(old) = get(txn, &rel.id)? {
        unindex(txn, &old)?;
    }
    let bytes = encode(rel)?;
    {
        let mut table = txn.open_table(RELATIONSHIPS).map_err(store_err)?;
        table.insert(rel.id.as_str(), bytes.as_slice()).map_err(store_err)?;
    }
    for (def, scope) in index_scopes(rel) {
        let mut index = txn.open_table(def).map_err(store_err)?;
        index.insert((scope, rel.id.as_str()), ()).map_err(store_err)?;
    }
    Ok(())
}

/// Create a relationship with a fresh id. The project must exist; the
/// endpoints are not checked.
pub fn create(
    txn: &WriteTransaction,
    project_id: &ProjectId,
    new: NewRelationship,
) -> Result<Relationship, WeftError> {
    create_with_fresh_id(txn, project_id, RelationshipId::generate(), new)
}

/// Create a relationship under a caller-chosen id with a new timestamp.
/// An id that is already taken is rejected.
pub(crate) fn create_with_fresh_id(
    txn: &WriteTransaction,
    project_id: &ProjectId,
    id: RelationshipId,
    new: NewRelationship,
) -> Result<Relationship, WeftError> {
    if projects::get(txn, project_id)?.is_none() {
        return Err(WeftError::NotFound(format!("project {}", project_id)));
    }
    if get(txn, &id)?.is_some() {
        return Err(WeftError::InvalidRequest(format!("relationship {} already exists", id)));
    }
    let rel = Relationship {
        id,
        project_id: project_id.clone(),
        from_entity: new.from_entity,
        to_entity: new.to_entity,
        kind: new.kind,
        label: new.label,
        binding_name: new.binding_name,
        from_port: new.from_port,
        to_port: new.to_port,
        created_at: now_millis(),
    };
    write_row(txn, &rel)?;
    Ok(rel)
}

/// Re-create a relationship exactly as recorded (restore path).
pub fn create_with_id(txn: &WriteTransaction, rel: &Relationship) -> Result<(), WeftError> {
    write_row(txn, rel)
}

/// Get one relationship.
pub fn get(txn: &WriteTransaction, id: &RelationshipId) -> Result<Option<Relationship>, WeftError> {
    let table = txn.open_table(RELATIONSHIPS).map_err(store_err)?;
    read_row(&table, id.as_str())
}

/// Delete one relationship. Returns the prior row, `None` if it was missing.
pub fn delete(txn: &WriteTransaction, id: &RelationshipId) -> Result<Option<Relationship>, WeftError> {
    let Some(rel) = get(txn, id)? else {
        return Ok(None);
    };
    {
        let mut table = txn.open_table(RELATIONSHIPS).map_err(store_err)?;
        table.remove(id.as_str()).map_err(store_err)?;
    }
    unindex(txn, &rel)?;
    Ok(Some(rel))
}

fn load_indexed(
    txn: &WriteTransaction,
    def: Index,
    scope: &str,
) -> Result<Vec<Relationship>, WeftError> {
    let ids = {
        let index = txn.open_table(def).map_err(store_err)?;
        scoped_keys(&index, scope)?
    };
    let mut rels = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(rel) = get(txn, &RelationshipId(id))? {
            rels.push(rel);
        }
    }
    Ok(rels)
}

/// All relationships of a project, in id order.
pub fn list(txn: &WriteTransaction, project_id: &ProjectId) -> Result<Vec<Relationship>, WeftError> {
    load_indexed(txn, PROJECT_RELATIONSHIPS, project_id.as_str())
}

/// Relationships leaving an entity.
pub fn outgoing(txn: &WriteTransaction, entity: &EntityId) -> Result<Vec<Relationship>, WeftError> {
    load_indexed(txn, OUTGOING, entity.as_str())
}

/// Relationships arriving at an entity.
pub fn incoming(txn: &WriteTransaction, entity: &EntityId) -> Result<Vec<Relationship>, WeftError> {
    load_indexed(txn, INCOMING, entity.as_str())
}

/// Targets of outgoing relationships of one kind.
pub fn children(txn: &WriteTransaction, entity: &EntityId, kind: &str) -> Result<Vec<EntityId>, WeftError> {
    Ok(outgoing(txn, entity)?
        .into_iter()
        .filter(|rel| rel.kind == kind)
        .map(|rel| rel.to_entity)
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{Store, entities};

    fn edge(from: &EntityId, to: &EntityId, kind: &str) -> NewRelationship {
        NewRelationship {
            from_entity: from.clone(),
            to_entity: to.clone(),
            kind: kind.to_string(),
            label: Some("wire".into()),
            binding_name: None,
            from_port: Some("out".into()),
            to_port: Some("in".into()),
        }
    }

    #[test]
    fn create_and_get() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let a = entities::create(&txn, &p.id).expect("e").id;
        let b = entities::create(&txn, &p.id).expect("e").id;

        let rel = create(&txn, &p.id, edge(&a, &b, "wire")).expect("create");
        let found = get(&txn, &rel.id).expect("get").expect("present");
        assert_eq!(found, rel);
        assert_eq!(found.from_port.as_deref(), Some("out"));
        assert_eq!(outgoing(&txn, &a).expect("out").len(), 1);
        assert_eq!(incoming(&txn, &b).expect("in").len(), 1);
    }

    #[test]
    fn endpoints_are_not_checked() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let rel = create(
            &txn,
            &p.id,
            edge(&EntityId::from("x"), &EntityId::from("y"), "wire"),
        );
        assert!(rel.is_ok());
    }

    #[test]
    fn delete_clears_indexes_and_is_idempotent() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let a = entities::create(&txn, &p.id).expect("e").id;
        let b = entities::create(&txn, &p.id).expect("e").id;
        let rel = create(&txn, &p.id, edge(&a, &b, "contains")).expect("create");

        assert!(delete(&txn, &rel.id).expect("delete").is_some());
        assert!(delete(&txn, &rel.id).expect("delete").is_none());
        assert!(list(&txn, &p.id).expect("list").is_empty());
        assert!(children(&txn, &a, "contains").expect("children").is_empty());
    }

    #[test]
    fn children_filters_by_kind() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let a = entities::create(&txn, &p.id).expect("e").id;
        let b = entities::create(&txn, &p.id).expect("e").id;
        let c = entities::create(&txn, &p.id).expect("e").id;
        create(&txn, &p.id, edge(&a, &b, "contains")).expect("create");
        create(&txn, &p.id, edge(&a, &c, "wire")).expect("create");

        assert_eq!(children(&txn, &a, "contains").expect("children"), vec![b]);
    }

    #[test]
    fn create_with_taken_id_is_rejected() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let a = entities::create(&txn, &p.id).expect("e").id;
        let b = entities::create(&txn, &p.id).expect("e").id;
        let rel = create(&txn, &p.id, edge(&a, &b, "wire")).expect("create");

        let err = create_with_fresh_id(&txn, &p.id, rel.id.clone(), edge(&b, &a, "wire"));
        assert!(matches!(err, Err(WeftError::InvalidRequest(_))));
        assert_eq!(get(&txn, &rel.id).expect("get"), Some(rel));
        assert!(outgoing(&txn, &b).expect("out").is_empty());
    }

    #[test]
    fn restore_over_existing_row_moves_indexes() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = projects::create(&txn, "p").expect("project");
        let q = projects::create(&txn, "q").expect("project");
        let a = entities::create(&txn, &p.id).expect("e").id;
        let b = entities::create(&txn, &p.id).expect("e").id;
        let c = entities::create(&txn, &q.id).expect("e").id;
        let rel = create(&txn, &p.id, edge(&a, &b, "wire")).expect("create");

        let moved = Relationship {
            project_id: q.id.clone(),
            from_entity: c.clone(),
            ..rel.clone()
        };
        create_with_id(&txn, &moved).expect("restore");

        assert!(list(&txn, &p.id).expect("list").is_empty());
        assert!(outgoing(&txn, &a).expect("out").is_empty());
        assert_eq!(list(&txn, &q.id).expect("list"), vec![moved.clone()]);
        assert_eq!(outgoing(&txn, &c).expect("out"), vec![moved.clone()]);
        assert_eq!(incoming(&txn, &b).expect("in"), vec![moved]);
    }
}
