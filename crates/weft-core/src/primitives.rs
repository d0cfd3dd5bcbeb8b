//! # Store Primitives
//!
//! Fixed constants shared by the store, the stamp catalog and the history log.

/// Capacity of the undo and redo stacks. The oldest entry is evicted first.
pub const MAX_STACK: usize = 100;

/// Relationship kind that forms the parent/child tree.
///
/// Cascade delete and stamp capture both walk outgoing edges of this kind.
pub const CONTAINS: &str = "contains";

/// Attribute keys a stamp never copies from its root entity.
pub const ROOT_EXCLUDED_KEYS: [&str; 3] = ["x", "y", "name"];

/// Attribute keys a stamp never copies from its members.
pub const MEMBER_EXCLUDED_KEYS: [&str; 2] = ["x", "y"];

/// Prefix of stamp member local ids (`member_0`, `member_1`, ...).
pub const MEMBER_PREFIX: &str = "member_";

/// Maximum depth of a `contains` walk.
///
/// Deeper trees are rejected rather than walked, keeping every structural
/// operation bounded.
pub const MAX_TREE_DEPTH: usize = 256;

/// Maximum length of an attribute key.
pub const MAX_ATTR_KEY_LENGTH: usize = 256;

/// Maximum number of path segments a request may carry.
pub const MAX_PATH_SEGMENTS: usize = 16;

/// Maximum nesting of router calls inside one request (history pushes and
/// undo/redo replays re-enter the router).
pub const MAX_DISPATCH_DEPTH: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exclusions_cover_member_exclusions() {
        for key in MEMBER_EXCLUDED_KEYS {
            assert!(ROOT_EXCLUDED_KEYS.contains(&key));
        }
    }

    #[test]
    fn stack_capacity_is_one_hundred() {
        assert_eq!(MAX_STACK, 100);
    }
}
