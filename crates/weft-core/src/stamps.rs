//! # Stamp Catalog
//!
//! A stamp is a reusable, position-independent pattern captured from a
//! subtree of the project graph.
//!
//! ## Local ids
//!
//! Inside a stamp, nodes are addressed only by `local_id`: the captured root
//! is `None`, every descendant is `member_<n>` in discovery order. Capture
//! builds a flat `EntityId -> local_id` table; apply builds the reverse
//! `local_id -> EntityId` table from freshly allocated ids. No absolute id
//! ever leaks into a stamp.
//!
//! ## Exact inverse
//!
//! `apply` returns an [`ApplyRecord`] holding everything `unapply` needs to
//! bring the target and the project back to their pre-apply state. Both run
//! inside the caller's write transaction, so partial materialization is never
//! observable.

use crate::primitives::{MEMBER_EXCLUDED_KEYS, MEMBER_PREFIX, ROOT_EXCLUDED_KEYS};
use crate::storage::{STAMPS, applications as markers, attrs, decode, encode, entities, read_row, relationships, store_err};
use crate::{
    ApplicationId, AttrMap, EntityId, NewRelationship, RelationshipId, StampApplication, StampId, StoredValue,
    WeftError, advance_millis, load_attrs, now_millis, store_attrs,
};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TYPES
// =============================================================================

/// Catalog metadata of a stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampSummary {
    pub id: StampId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub kind: String,
    pub created_at: u64,
    pub modified_at: u64,
}

/// A placeholder entity inside a stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampMember {
    pub local_id: String,
    #[serde(default)]
    pub attrs: AttrMap,
}

/// A relationship between stamp nodes. `None` endpoints denote the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRelationship {
    pub from_local_id: Option<String>,
    pub to_local_id: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub binding_name: Option<String>,
    #[serde(default)]
    pub from_port: Option<String>,
    #[serde(default)]
    pub to_port: Option<String>,
}

/// A complete stamp: metadata, root attributes, members and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(flatten)]
    pub summary: StampSummary,
    #[serde(default)]
    pub attrs: AttrMap,
    #[serde(default)]
    pub members: Vec<StampMember>,
    #[serde(default)]
    pub relationships: Vec<TemplateRelationship>,
}

/// Request to create a stamp, optionally captured from a source entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStamp {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, alias = "sourceEntityId")]
    pub source_entity_id: Option<EntityId>,
}

/// Metadata changes; absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

impl StampUpdate {
    /// The update that puts `summary`'s metadata back.
    #[must_use]
    pub fn reverting_to(summary: &StampSummary) -> Self {
        Self {
            name: Some(summary.name.clone()),
            description: Some(summary.description.clone()),
            category: Some(summary.category.clone()),
            kind: Some(summary.kind.clone()),
        }
    }

    /// True when no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.kind.is_none()
    }
}

/// Everything needed to invert one application of a stamp.
///
/// `application_id` and `applied_at` name the marker this application left;
/// replaying the record writes that marker back unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApplyRecord {
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
    #[serde(default)]
    pub applied_at: Option<u64>,
    pub created_entity_ids: Vec<EntityId>,
    pub created_relationship_ids: Vec<RelationshipId>,
    pub applied_attrs: AttrMap,
    pub previous_attrs: AttrMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMember {
    local_id: String,
    attrs: Vec<(String, StoredValue)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredStamp {
    summary: StampSummary,
    attrs: Vec<(String, StoredValue)>,
    members: Vec<StoredMember>,
    relationships: Vec<TemplateRelationship>,
}

impl TryFrom<&Stamp> for StoredStamp {
    type Error = WeftError;

    fn try_from(stamp: &Stamp) -> Result<Self, Self::Error> {
        Ok(Self {
            summary: stamp.summary.clone(),
            attrs: store_attrs(&stamp.attrs)?,
            members: stamp
                .members
                .iter()
                .map(|m| {
                    Ok(StoredMember {
                        local_id: m.local_id.clone(),
                        attrs: store_attrs(&m.attrs)?,
                    })
                })
                .collect::<Result<_, WeftError>>()?,
            relationships: stamp.relationships.clone(),
        })
    }
}

impl TryFrom<StoredStamp> for Stamp {
    type Error = WeftError;

    fn try_from(stored: StoredStamp) -> Result<Self, Self::Error> {
        Ok(Self {
            summary: stored.summary,
            attrs: load_attrs(stored.attrs)?,
            members: stored
                .members
                .into_iter()
                .map(|m| {
                    Ok(StampMember {
                        local_id: m.local_id,
                        attrs: load_attrs(m.attrs)?,
                    })
                })
                .collect::<Result<_, WeftError>>()?,
            relationships: stored.relationships,
        })
    }
}

// =============================================================================
// CATALOG ROWS
// =============================================================================

fn write_stamp(txn: &WriteTransaction, stamp: &Stamp) -> Result<(), WeftError> {
    let bytes = encode(&StoredStamp::try_from(stamp)?)?;
    let mut table = txn.open_table(STAMPS).map_err(store_err)?;
    table
        .insert(stamp.summary.id.as_str(), bytes.as_slice())
        .map_err(store_err)?;
    Ok(())
}

fn without(mut attrs: AttrMap, excluded: &[&str]) -> AttrMap {
    attrs.retain(|key, _| !excluded.contains(&key.as_str()));
    attrs
}

/// Capture the `contains` subtree under `source` as stamp content.
fn capture(
    txn: &WriteTransaction,
    source: &EntityId,
) -> Result<(AttrMap, Vec<StampMember>, Vec<TemplateRelationship>), WeftError> {
    if entities::get_row(txn, source)?.is_none() {
        return Err(WeftError::NotFound(format!("entity {}", source)));
    }
    let tree = entities::contains_tree(txn, source)?;

    let mut local_ids: BTreeMap<EntityId, Option<String>> = BTreeMap::new();
    let mut members = Vec::new();
    for (n, id) in tree.iter().skip(1).enumerate() {
        let local_id = format!("{}{}", MEMBER_PREFIX, n);
        members.push(StampMember {
            local_id: local_id.clone(),
            attrs: without(attrs::list(txn, id)?, &MEMBER_EXCLUDED_KEYS),
        });
        local_ids.insert(id.clone(), Some(local_id));
    }
    local_ids.insert(source.clone(), None);
    let root_attrs = without(attrs::list(txn, source)?, &ROOT_EXCLUDED_KEYS);

    let mut template = Vec::new();
    for id in &tree {
        for rel in relationships::outgoing(txn, id)? {
            let (Some(from), Some(to)) = (local_ids.get(&rel.from_entity), local_ids.get(&rel.to_entity))
            else {
                continue;
            };
            template.push(TemplateRelationship {
                from_local_id: from.clone(),
                to_local_id: to.clone(),
                kind: rel.kind,
                label: rel.label,
                binding_name: rel.binding_name,
                from_port: rel.from_port,
                to_port: rel.to_port,
            });
        }
    }
    Ok((root_attrs, members, template))
}

/// Create a stamp. With a `source_entity_id`, its `contains` subtree is
/// captured; positional and identity keys are left behind.
pub fn create(txn: &WriteTransaction, new: NewStamp) -> Result<Stamp, WeftError> {
    let (attrs, members, relationships) = match &new.source_entity_id {
        Some(source) => capture(txn, source)?,
        None => (AttrMap::new(), Vec::new(), Vec::new()),
    };
    let now = now_millis();
    let stamp = Stamp {
        summary: StampSummary {
            id: StampId::generate(),
            name: new.name,
            description: new.description,
            category: new.category,
            kind: new.kind,
            created_at: now,
            modified_at: now,
        },
        attrs,
        members,
        relationships,
    };
    write_stamp(txn, &stamp)?;
    tracing::debug!(
        stamp = %stamp.summary.id,
        members = stamp.members.len(),
        relationships = stamp.relationships.len(),
        "stamp captured"
    );
    Ok(stamp)
}

/// Re-create a stamp exactly as recorded (restore path).
pub fn create_with_id(txn: &WriteTransaction, stamp: &Stamp) -> Result<(), WeftError> {
    write_stamp(txn, stamp)
}

/// Get a complete stamp.
pub fn get(txn: &WriteTransaction, id: &StampId) -> Result<Option<Stamp>, WeftError> {
    let table = txn.open_table(STAMPS).map_err(store_err)?;
    match read_row::<StoredStamp, _>(&table, id.as_str())? {
        Some(stored) => Ok(Some(Stamp::try_from(stored)?)),
        None => Ok(None),
    }
}

/// Catalog listing, in id order.
pub fn list(txn: &WriteTransaction) -> Result<Vec<StampSummary>, WeftError> {
    let table = txn.open_table(STAMPS).map_err(store_err)?;
    let mut summaries = Vec::new();
    for entry in table.iter().map_err(store_err)? {
        let (_, data) = entry.map_err(store_err)?;
        let stored: StoredStamp = decode(data.value())?;
        summaries.push(stored.summary);
    }
    Ok(summaries)
}

/// Update stamp metadata. Returns the summary as it was before.
pub fn update(txn: &WriteTransaction, id: &StampId, changes: StampUpdate) -> Result<StampSummary, WeftError> {
    let mut stamp = get(txn, id)?.ok_or_else(|| WeftError::NotFound(format!("stamp {}", id)))?;
    let previous = stamp.summary.clone();
    let summary = &mut stamp.summary;
    if let Some(name) = changes.name {
        summary.name = name;
    }
    if let Some(description) = changes.description {
        summary.description = description;
    }
    if let Some(category) = changes.category {
        summary.category = category;
    }
    if let Some(kind) = changes.kind {
        summary.kind = kind;
    }
    summary.modified_at = advance_millis(previous.modified_at);
    write_stamp(txn, &stamp)?;
    Ok(previous)
}

/// Delete a stamp. Prior applications stay where they are.
pub fn delete(txn: &WriteTransaction, id: &StampId) -> Result<Option<Stamp>, WeftError> {
    let Some(stamp) = get(txn, id)? else {
        return Ok(None);
    };
    let mut table = txn.open_table(STAMPS).map_err(store_err)?;
    table.remove(id.as_str()).map_err(store_err)?;
    Ok(Some(stamp))
}

/// Application markers on an entity, in stamp id then application order.
pub fn applications(txn: &WriteTransaction, entity: &EntityId) -> Result<Vec<StampApplication>, WeftError> {
    markers::list(txn, entity)
}

// =============================================================================
// APPLY / UNAPPLY
// =============================================================================

fn resolve(
    local: Option<&String>,
    target: &EntityId,
    created: &BTreeMap<String, EntityId>,
) -> Result<EntityId, WeftError> {
    match local {
        None => Ok(target.clone()),
        Some(local_id) => created.get(local_id).cloned().ok_or_else(|| {
            WeftError::InvalidRequest(format!("stamp relationship references unknown member {}", local_id))
        }),
    }
}

/// A pinned record must match the stamp's shape, name only ids that are
/// free and never repeat one, and must not replay an application that is
/// still live.
fn check_pinned(
    txn: &WriteTransaction,
    stamp: &Stamp,
    target: &EntityId,
    record: &ApplyRecord,
) -> Result<(), WeftError> {
    let stamp_id = &stamp.summary.id;
    if record.created_entity_ids.len() != stamp.members.len()
        || record.created_relationship_ids.len() != stamp.relationships.len()
    {
        return Err(WeftError::InvalidRequest(format!(
            "pinned ids do not match stamp {} shape",
            stamp_id
        )));
    }

    let mut seen = BTreeSet::new();
    for id in &record.created_entity_ids {
        if !seen.insert(id.as_str()) || entities::get_row(txn, id)?.is_some() {
            return Err(WeftError::InvalidRequest(format!("pinned entity id {} is taken", id)));
        }
    }
    let mut seen = BTreeSet::new();
    for id in &record.created_relationship_ids {
        if !seen.insert(id.as_str()) || relationships::get(txn, id)?.is_some() {
            return Err(WeftError::InvalidRequest(format!("pinned relationship id {} is taken", id)));
        }
    }

    if let Some(application) = &record.application_id {
        if markers::contains(txn, target, stamp_id, application)? {
            return Err(WeftError::InvalidRequest(format!(
                "application {} of stamp {} on {} is already live",
                application, stamp_id, target
            )));
        }
    }
    Ok(())
}

/// Materialize a stamp onto `target`.
///
/// With `pinned`, the ids of a previous [`ApplyRecord`] are reused in order,
/// so replaying an application reproduces the same graph.
pub fn apply(
    txn: &WriteTransaction,
    stamp_id: &StampId,
    target: &EntityId,
    pinned: Option<&ApplyRecord>,
) -> Result<ApplyRecord, WeftError> {
    let stamp = get(txn, stamp_id)?.ok_or_else(|| WeftError::NotFound(format!("stamp {}", stamp_id)))?;
    let target_row =
        entities::get_row(txn, target)?.ok_or_else(|| WeftError::NotFound(format!("entity {}", target)))?;

    if let Some(record) = pinned {
        check_pinned(txn, &stamp, target, record)?;
    }
    let application_id = pinned
        .and_then(|r| r.application_id.clone())
        .unwrap_or_else(ApplicationId::generate);
    let applied_at = pinned.and_then(|r| r.applied_at).unwrap_or_else(now_millis);

    let previous_attrs = attrs::list(txn, target)?;
    if !stamp.attrs.is_empty() {
        attrs::set_batch(txn, target, &stamp.attrs)?;
    }

    let mut created: BTreeMap<String, EntityId> = BTreeMap::new();
    let mut created_entity_ids = Vec::with_capacity(stamp.members.len());
    for (i, member) in stamp.members.iter().enumerate() {
        let id = pinned
            .and_then(|r| r.created_entity_ids.get(i).cloned())
            .unwrap_or_else(EntityId::generate);
        let entity = entities::create_with_id(txn, &target_row.project_id, id)?;
        if !member.attrs.is_empty() {
            attrs::set_batch(txn, &entity.id, &member.attrs)?;
        }
        created.insert(member.local_id.clone(), entity.id.clone());
        created_entity_ids.push(entity.id);
    }

    let mut created_relationship_ids = Vec::with_capacity(stamp.relationships.len());
    for (j, template) in stamp.relationships.iter().enumerate() {
        let id = pinned
            .and_then(|r| r.created_relationship_ids.get(j).cloned())
            .unwrap_or_else(RelationshipId::generate);
        let rel = relationships::create_with_fresh_id(
            txn,
            &target_row.project_id,
            id,
            NewRelationship {
                from_entity: resolve(template.from_local_id.as_ref(), target, &created)?,
                to_entity: resolve(template.to_local_id.as_ref(), target, &created)?,
                kind: template.kind.clone(),
                label: template.label.clone(),
                binding_name: template.binding_name.clone(),
                from_port: template.from_port.clone(),
                to_port: template.to_port.clone(),
            },
        )?;
        created_relationship_ids.push(rel.id);
    }

    markers::put_all(
        txn,
        &[StampApplication {
            entity_id: target.clone(),
            stamp_id: stamp_id.clone(),
            application_id: application_id.clone(),
            applied_at,
        }],
    )?;

    tracing::debug!(
        stamp = %stamp_id,
        target = %target,
        application = %application_id,
        entities = created_entity_ids.len(),
        relationships = created_relationship_ids.len(),
        "stamp applied"
    );

    Ok(ApplyRecord {
        application_id: Some(application_id),
        applied_at: Some(applied_at),
        created_entity_ids,
        created_relationship_ids,
        applied_attrs: stamp.attrs,
        previous_attrs,
    })
}

/// Invert one application of a stamp.
///
/// Relationships go first (newest first), then entities (newest first),
/// then the target's attributes return to `previous_attrs`. Only the marker
/// named by the record is removed; the record must name a live one.
pub fn unapply(
    txn: &WriteTransaction,
    stamp_id: &StampId,
    target: &EntityId,
    record: &ApplyRecord,
) -> Result<(), WeftError> {
    if entities::get_row(txn, target)?.is_none() {
        return Err(WeftError::NotFound(format!("entity {}", target)));
    }
    let application = record
        .application_id
        .as_ref()
        .ok_or_else(|| WeftError::InvalidRequest("apply record has no application_id".into()))?;
    if !markers::remove(txn, target, stamp_id, application)? {
        return Err(WeftError::NotFound(format!(
            "application {} of stamp {} on {}",
            application, stamp_id, target
        )));
    }
    for id in record.created_relationship_ids.iter().rev() {
        relationships::delete(txn, id)?;
    }
    for id in record.created_entity_ids.iter().rev() {
        entities::delete(txn, id)?;
    }
    for key in record.applied_attrs.keys() {
        if !record.previous_attrs.contains_key(key) {
            attrs::delete(txn, target, key)?;
        }
    }
    if !record.previous_attrs.is_empty() {
        attrs::set_batch(txn, target, &record.previous_attrs)?;
    }
    tracing::debug!(stamp = %stamp_id, target = %target, application = %application, "stamp unapplied");
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
