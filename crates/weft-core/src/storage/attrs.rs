//! Attribute rows: at most one typed value per `(entity, key)`.
//!
//! Every write through `set`, `set_batch` or `delete` advances the owning
//! entity's `modified_at`.

use super::{ATTRS, decode, encode, entities, store_err};
use crate::primitives::MAX_ATTR_KEY_LENGTH;
use crate::{AttrMap, AttrValue, EntityId, StoredValue, WeftError};
use redb::{ReadableTable, WriteTransaction};
use std::collections::BTreeMap;

/// Previous value per key, `None` where the key was absent.
pub type PreviousAttrs = BTreeMap<String, Option<AttrValue>>;

fn validate_key(key: &str) -> Result<(), WeftError> {
    if key.is_empty() {
        return Err(WeftError::InvalidRequest("attribute key is empty".into()));
    }
    if key.len() > MAX_ATTR_KEY_LENGTH {
        return Err(WeftError::InvalidRequest(format!(
            "attribute key length {} exceeds maximum {}",
            key.len(),
            MAX_ATTR_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Get one attribute.
pub fn get(txn: &WriteTransaction, entity: &EntityId, key: &str) -> Result<Option<AttrValue>, WeftError> {
    let table = txn.open_table(ATTRS).map_err(store_err)?;
    match table.get((entity.as_str(), key)).map_err(store_err)? {
        Some(data) => {
            let stored: StoredValue = decode(data.value())?;
            Ok(Some(AttrValue::try_from(stored)?))
        }
        None => Ok(None),
    }
}

/// All attributes of an entity, ordered by key. Empty for a missing entity.
pub fn list(txn: &WriteTransaction, entity: &EntityId) -> Result<AttrMap, WeftError> {
    let table = txn.open_table(ATTRS).map_err(store_err)?;
    let mut attrs = AttrMap::new();
    for entry in table.range((entity.as_str(), "")..).map_err(store_err)? {
        let (key, data) = entry.map_err(store_err)?;
        let (owner, name) = key.value();
        if owner != entity.as_str() {
            break;
        }
        let stored: StoredValue = decode(data.value())?;
        attrs.insert(name.to_string(), AttrValue::try_from(stored)?);
    }
    Ok(attrs)
}

/// Write attributes without touching the entity row. Restore paths use this
/// so recorded timestamps come back verbatim.
pub(crate) fn put_all(txn: &WriteTransaction, entity: &EntityId, attrs: &AttrMap) -> Result<(), WeftError> {
    let mut table = txn.open_table(ATTRS).map_err(store_err)?;
    for (key, value) in attrs {
        validate_key(key)?;
        let bytes = encode(&StoredValue::try_from(value)?)?;
        table
            .insert((entity.as_str(), key.as_str()), bytes.as_slice())
            .map_err(store_err)?;
    }
    Ok(())
}

/// Remove every attribute of an entity, returning what was there.
pub(crate) fn clear(txn: &WriteTransaction, entity: &EntityId) -> Result<AttrMap, WeftError> {
    let existing = list(txn, entity)?;
    let mut table = txn.open_table(ATTRS).map_err(store_err)?;
    for key in existing.keys() {
        table.remove((entity.as_str(), key.as_str())).map_err(store_err)?;
    }
    Ok(existing)
}

/// Set one attribute (overwrite on conflict). Returns the previous value.
pub fn set(
    txn: &WriteTransaction,
    entity: &EntityId,
    key: &str,
    value: &AttrValue,
) -> Result<Option<AttrValue>, WeftError> {
    let mut single = AttrMap::new();
    single.insert(key.to_string(), value.clone());
    let previous = set_batch(txn, entity, &single)?;
    Ok(previous.into_values().next().flatten())
}

/// Set many attributes at once. Returns the previous value of each key.
pub fn set_batch(
    txn: &WriteTransaction,
    entity: &EntityId,
    attrs: &AttrMap,
) -> Result<PreviousAttrs, WeftError> {
    if entities::get_row(txn, entity)?.is_none() {
        return Err(WeftError::NotFound(format!("entity {}", entity)));
    }
    let mut previous = PreviousAttrs::new();
    for key in attrs.keys() {
        validate_key(key)?;
        previous.insert(key.clone(), get(txn, entity, key)?);
    }
    put_all(txn, entity, attrs)?;
    entities::touch(txn, entity)?;
    Ok(previous)
}

/// Delete one attribute. A missing entity or key is a no-op.
pub fn delete(txn: &WriteTransaction, entity: &EntityId, key: &str) -> Result<Option<AttrValue>, WeftError> {
    let previous = get(txn, entity, key)?;
    if previous.is_some() {
        {
            let mut table = txn.open_table(ATTRS).map_err(store_err)?;
            table.remove((entity.as_str(), key)).map_err(store_err)?;
        }
        entities::touch(txn, entity)?;
    }
    Ok(previous)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::{Store, projects};
    use serde_json::json;

    fn fixture(store: &Store) -> (WriteTransaction, EntityId) {
        let txn = store.begin_write().expect("txn");
        let project = projects::create(&txn, "p").expect("project");
        let entity = entities::create(&txn, &project.id).expect("entity");
        (txn, entity.id)
    }

    #[test]
    fn set_overwrites_single_value() {
        let store = Store::in_memory().expect("store");
        let (txn, e) = fixture(&store);

        assert_eq!(set(&txn, &e, "color", &AttrValue::String("red".into())).expect("set"), None);
        let prev = set(&txn, &e, "color", &AttrValue::String("blue".into())).expect("set");
        assert_eq!(prev, Some(AttrValue::String("red".into())));
        assert_eq!(list(&txn, &e).expect("list").len(), 1);
    }

    #[test]
    fn write_advances_modified_at() {
        let store = Store::in_memory().expect("store");
        let (txn, e) = fixture(&store);
        let before = entities::get_row(&txn, &e).expect("get").expect("row").modified_at;

        set(&txn, &e, "n", &AttrValue::infer(json!(1))).expect("set");
        let after_set = entities::get_row(&txn, &e).expect("get").expect("row").modified_at;
        assert!(after_set > before);

        delete(&txn, &e, "n").expect("delete");
        let after_delete = entities::get_row(&txn, &e).expect("get").expect("row").modified_at;
        assert!(after_delete > after_set);
    }

    #[test]
    fn set_on_missing_entity_is_not_found() {
        let store = Store::in_memory().expect("store");
        let txn = store.begin_write().expect("txn");
        let err = set(&txn, &EntityId::from("ghost"), "k", &AttrValue::String("v".into()));
        assert!(matches!(err, Err(WeftError::NotFound(_))));
    }

    #[test]
    fn delete_missing_key_is_noop() {
        let store = Store::in_memory().expect("store");
        let (txn, e) = fixture(&store);
        assert_eq!(delete(&txn, &e, "nope").expect("delete"), None);
        assert_eq!(delete(&txn, &EntityId::from("ghost"), "nope").expect("delete"), None);
    }

    #[test]
    fn list_is_scoped_to_entity() {
        let store = Store::in_memory().expect("store");
        let (txn, a) = fixture(&store);
        let project = entities::get_row(&txn, &a).expect("get").expect("row").project_id;
        let b = entities::create(&txn, &project).expect("entity").id;

        set(&txn, &a, "k", &AttrValue::String("a".into())).expect("set");
        set(&txn, &b, "k", &AttrValue::String("b".into())).expect("set");

        let attrs = list(&txn, &a).expect("list");
        assert_eq!(attrs.get("k"), Some(&AttrValue::String("a".into())));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = Store::in_memory().expect("store");
        let (txn, e) = fixture(&store);
        let err = set(&txn, &e, "", &AttrValue::String("v".into()));
        assert!(matches!(err, Err(WeftError::InvalidRequest(_))));
    }
}
