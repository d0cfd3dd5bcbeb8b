//! # weft-core
//!
//! The project graph store behind the Weft propagator-network editor.
//!
//! This crate owns the part of the editor with real invariants:
//! - Entities with typed attributes, and directed relationships between them
//! - Stamps: subtrees captured as position-independent templates and
//!   re-materialized onto a target with an exact inverse record
//! - A bounded undo/redo history of reversible `(path, body)` operations,
//!   with atomic batching
//! - A path router that records every mutation's inverse and replays history
//!   through itself
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - Every request is one redb write transaction; partial structural changes
//!   are never observable
//! - Single writer: a [`Session`] needs `&mut self` to handle a request

// =============================================================================
// MODULES
// =============================================================================

pub mod history;
pub mod primitives;
pub mod router;
pub mod session;
pub mod stamps;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use types::{
    ApplicationId, AttrMap, AttrValue, Entity, EntityId, EntityRecord, GraphSnapshot,
    NewRelationship, Project, ProjectId, ProjectSnapshot, Relationship, RelationshipId,
    StampApplication, StampId, StoredValue, WeftError, advance_millis, load_attrs, now_millis,
    store_attrs,
};

pub use history::{HistoryEntry, HistoryLog, HistoryOutcome, HistoryStatus, Operation};
pub use router::{Kit, Method, Request, Response, RouteNode};
pub use session::Session;
pub use stamps::{
    ApplyRecord, NewStamp, Stamp, StampMember, StampSummary, StampUpdate, TemplateRelationship,
};
pub use storage::Store;
