//! Project rows. A project scopes entities and relationships; deleting it
//! removes everything scoped to it.

use super::{PROJECTS, applications, encode, entities, read_row, relationships, store_err};
use crate::{GraphSnapshot, Project, ProjectId, ProjectSnapshot, WeftError, advance_millis, now_millis};
use redb::{ReadableTable, WriteTransaction};

fn write_row(txn: &WriteTransaction, project: &Project) -> Result<(), WeftError> {
    let bytes = encode(project)?;
    let mut table = txn.open_table(PROJECTS).map_err(store_err)?;
    table
        .insert(project.id.as_str(), bytes.as_slice())
        .map_err(store_err)?;
    Ok(())
}

/// Create a project with a fresh id.
pub fn create(txn: &WriteTransaction, name: &str) -> Result<Project, WeftError> {
    let now = now_millis();
    let project = Project {
        id: ProjectId::generate(),
        name: name.to_string(),
        created_at: now,
        modified_at: now,
    };
    write_row(txn, &project)?;
    Ok(project)
}

/// Get one project.
pub fn get(txn: &WriteTransaction, id: &ProjectId) -> Result<Option<Project>, WeftError> {
    let table = txn.open_table(PROJECTS).map_err(store_err)?;
    read_row(&table, id.as_str())
}

/// All projects, in id order.
pub fn list(txn: &WriteTransaction) -> Result<Vec<Project>, WeftError> {
    let table = txn.open_table(PROJECTS).map_err(store_err)?;
    let mut projects = Vec::new();
    for entry in table.iter().map_err(store_err)? {
        let (_, data) = entry.map_err(store_err)?;
        projects.push(super::decode(data.value())?);
    }
    Ok(projects)
}

/// Rename a project. Returns the row as it was before.
pub fn rename(txn: &WriteTransaction, id: &ProjectId, name: &str) -> Result<Project, WeftError> {
    let previous = get(txn, id)?.ok_or_else(|| WeftError::NotFound(format!("project {}", id)))?;
    let updated = Project {
        name: name.to_string(),
        modified_at: advance_millis(previous.modified_at),
        ..previous.clone()
    };
    write_row(txn, &updated)?;
    Ok(previous)
}

/// Capture a project with every entity, relationship and application
/// marker scoped to it.
pub fn snapshot(txn: &WriteTransaction, id: &ProjectId) -> Result<Option<ProjectSnapshot>, WeftError> {
    let Some(project) = get(txn, id)? else {
        return Ok(None);
    };
    let entities = entities::list(txn, id)?;
    let mut markers = Vec::new();
    for record in &entities {
        markers.extend(applications::list(txn, &record.entity.id)?);
    }
    Ok(Some(ProjectSnapshot {
        project,
        graph: GraphSnapshot {
            entities,
            relationships: relationships::list(txn, id)?,
            applications: markers,
        },
    }))
}

/// Delete a project and all of its contents. Returns the prior snapshot,
/// `None` if the project did not exist.
pub fn delete(txn: &WriteTransaction, id: &ProjectId) -> Result<Option<ProjectSnapshot>, WeftError> {
    let Some(snapshot) = snapshot(txn, id)? else {
        return Ok(None);
    };
    for rel in &snapshot.graph.relationships {
        relationships::delete(txn, &rel.id)?;
    }
    for record in &snapshot.graph.entities {
        entities::delete(txn, &record.entity.id)?;
    }
    let mut table = txn.open_table(PROJECTS).map_err(store_err)?;
    table.remove(id.as_str()).map_err(store_err)?;
    Ok(Some(snapshot))
}

/// Restore a project snapshot exactly as captured.
pub fn restore(txn: &WriteTransaction, snapshot: &ProjectSnapshot) -> Result<(), WeftError> {
    write_row(txn, &snapshot.project)?;
    entities::restore_snapshot(txn, &snapshot.graph)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{Store, attrs};
    use crate::{ApplicationId, AttrValue, StampApplication, StampId};

    #[test]
    fn rename_returns_previous() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = create(&txn, "draft").expect("create");

        let previous = rename(&txn, &p.id, "final").expect("rename");
        assert_eq!(previous.name, "draft");
        assert_eq!(get(&txn, &p.id).expect("get").expect("row").name, "final");
    }

    #[test]
    fn rename_missing_is_not_found() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        assert!(matches!(
            rename(&txn, &ProjectId::from("ghost"), "x"),
            Err(WeftError::NotFound(_))
        ));
    }

    #[test]
    fn delete_and_restore_round_trip() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = create(&txn, "p").expect("create");
        let e = entities::create(&txn, &p.id).expect("entity");
        attrs::set(&txn, &e.id, "color", &AttrValue::String("red".into())).expect("set");

        let before = snapshot(&txn, &p.id).expect("snapshot").expect("exists");
        let removed = delete(&txn, &p.id).expect("delete").expect("existed");
        assert!(get(&txn, &p.id).expect("get").is_none());
        assert!(entities::get(&txn, &e.id).expect("get").is_none());
        assert!(delete(&txn, &p.id).expect("delete").is_none());

        restore(&txn, &removed).expect("restore");
        assert_eq!(snapshot(&txn, &p.id).expect("snapshot"), Some(before));
    }

    #[test]
    fn delete_takes_markers_along_and_restore_brings_them_back() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let p = create(&txn, "p").expect("create");
        let e = entities::create(&txn, &p.id).expect("entity");
        let marker = StampApplication {
            entity_id: e.id.clone(),
            stamp_id: StampId::from("s"),
            application_id: ApplicationId::from("a"),
            applied_at: 42,
        };
        applications::put_all(&txn, std::slice::from_ref(&marker)).expect("marker");

        let removed = delete(&txn, &p.id).expect("delete").expect("existed");
        assert_eq!(removed.graph.applications, vec![marker.clone()]);
        assert!(applications::list(&txn, &e.id).expect("list").is_empty());

        restore(&txn, &removed).expect("restore");
        assert_eq!(applications::list(&txn, &e.id).expect("list"), vec![marker]);
    }
}
