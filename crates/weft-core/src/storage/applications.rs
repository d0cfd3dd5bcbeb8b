//! Stamp application markers, one row per live application.
//!
//! Rows are keyed `(entity, stamp, application)`, so the same stamp applied
//! twice to one entity leaves two markers and removing one leaves the other.

use super::{APPLICATIONS, store_err};
use crate::{ApplicationId, EntityId, StampApplication, StampId, WeftError};
use redb::{ReadableTable, WriteTransaction};

/// Markers on an entity, ordered by stamp id then application id.
pub fn list(txn: &WriteTransaction, entity: &EntityId) -> Result<Vec<StampApplication>, WeftError> {
    let table = txn.open_table(APPLICATIONS).map_err(store_err)?;
    let mut markers = Vec::new();
    for entry in table.range((entity.as_str(), "", "")..).map_err(store_err)? {
        let (key, applied_at) = entry.map_err(store_err)?;
        let (owner, stamp, application) = key.value();
        if owner != entity.as_str() {
            break;
        }
        markers.push(StampApplication {
            entity_id: entity.clone(),
            stamp_id: StampId::from(stamp),
            application_id: ApplicationId::from(application),
            applied_at: applied_at.value(),
        });
    }
    Ok(markers)
}

/// True when the marker of this application is present.
pub(crate) fn contains(
    txn: &WriteTransaction,
    entity: &EntityId,
    stamp: &StampId,
    application: &ApplicationId,
) -> Result<bool, WeftError> {
    let table = txn.open_table(APPLICATIONS).map_err(store_err)?;
    let found = table
        .get((entity.as_str(), stamp.as_str(), application.as_str()))
        .map_err(store_err)?;
    Ok(found.is_some())
}

/// Write markers verbatim.
pub(crate) fn put_all(txn: &WriteTransaction, markers: &[StampApplication]) -> Result<(), WeftError> {
    let mut table = txn.open_table(APPLICATIONS).map_err(store_err)?;
    for marker in markers {
        table
            .insert(
                (
                    marker.entity_id.as_str(),
                    marker.stamp_id.as_str(),
                    marker.application_id.as_str(),
                ),
                marker.applied_at,
            )
            .map_err(store_err)?;
    }
    Ok(())
}

/// Remove one application's marker. Returns whether it was present.
pub(crate) fn remove(
    txn: &WriteTransaction,
    entity: &EntityId,
    stamp: &StampId,
    application: &ApplicationId,
) -> Result<bool, WeftError> {
    let mut table = txn.open_table(APPLICATIONS).map_err(store_err)?;
    let removed = table
        .remove((entity.as_str(), stamp.as_str(), application.as_str()))
        .map_err(store_err)?;
    Ok(removed.is_some())
}

/// Remove every marker on an entity, returning what was there.
pub(crate) fn clear(txn: &WriteTransaction, entity: &EntityId) -> Result<Vec<StampApplication>, WeftError> {
    let existing = list(txn, entity)?;
    let mut table = txn.open_table(APPLICATIONS).map_err(store_err)?;
    for marker in &existing {
        table
            .remove((
                entity.as_str(),
                marker.stamp_id.as_str(),
                marker.application_id.as_str(),
            ))
            .map_err(store_err)?;
    }
    Ok(existing)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::Store;

    fn marker(entity: &str, stamp: &str, application: &str, applied_at: u64) -> StampApplication {
        StampApplication {
            entity_id: EntityId::from(entity),
            stamp_id: StampId::from(stamp),
            application_id: ApplicationId::from(application),
            applied_at,
        }
    }

    #[test]
    fn same_stamp_twice_keeps_two_markers() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let first = marker("e", "s", "a1", 10);
        let second = marker("e", "s", "a2", 20);
        put_all(&txn, &[first.clone(), second.clone()]).expect("put");

        assert_eq!(list(&txn, &first.entity_id).expect("list"), vec![first.clone(), second.clone()]);

        assert!(remove(&txn, &first.entity_id, &first.stamp_id, &first.application_id).expect("remove"));
        assert_eq!(list(&txn, &first.entity_id).expect("list"), vec![second]);
        assert!(!contains(&txn, &first.entity_id, &first.stamp_id, &first.application_id).expect("contains"));
    }

    #[test]
    fn clear_only_touches_one_entity() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let mine = marker("e1", "s", "a1", 1);
        let other = marker("e2", "s", "a2", 2);
        put_all(&txn, &[mine.clone(), other.clone()]).expect("put");

        assert_eq!(clear(&txn, &mine.entity_id).expect("clear"), vec![mine.clone()]);
        assert!(list(&txn, &mine.entity_id).expect("list").is_empty());
        assert_eq!(list(&txn, &other.entity_id).expect("list"), vec![other]);
    }
}
