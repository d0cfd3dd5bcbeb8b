//! # History Log
//!
//! Bounded undo/redo stacks of reversible `(forward, backward)` operation
//! pairs, with atomic batch grouping.
//!
//! The log is content-agnostic: an [`Operation`] is an opaque `(path, body)`
//! pair that the router replays exactly like live traffic. Every mutating
//! endpoint computes its own pair.
//!
//! ## States
//!
//! ```text
//! Idle --beginBatch--> Batching --endBatch / cancelBatch--> Idle
//! ```
//!
//! While batching, pushes collect in a pending list and the stacks are left
//! alone until `endBatch` folds them into one entry.

use crate::primitives::MAX_STACK;
use crate::WeftError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// =============================================================================
// ENTRIES
// =============================================================================

/// One replayable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub path: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Operation {
    pub fn new(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

/// A recorded reversible operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Simple {
        forward: Operation,
        backward: Operation,
    },
    Compound {
        operations: Vec<HistoryEntry>,
    },
}

impl HistoryEntry {
    /// Backward sides in replay order: a compound entry is undone last-first.
    #[must_use]
    pub fn undo_operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        self.collect_backward(&mut ops);
        ops
    }

    /// Forward sides in replay order: a compound entry is redone first-first.
    #[must_use]
    pub fn redo_operations(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        self.collect_forward(&mut ops);
        ops
    }

    fn collect_backward(&self, ops: &mut Vec<Operation>) {
        match self {
            Self::Simple { backward, .. } => ops.push(backward.clone()),
            Self::Compound { operations } => {
                for entry in operations.iter().rev() {
                    entry.collect_backward(ops);
                }
            }
        }
    }

    fn collect_forward(&self, ops: &mut Vec<Operation>) {
        match self {
            Self::Simple { forward, .. } => ops.push(forward.clone()),
            Self::Compound { operations } => {
                for entry in operations {
                    entry.collect_forward(ops);
                }
            }
        }
    }
}

/// Result of an undo or redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    Applied,
    Empty,
}

/// Snapshot of the log for `GET /history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStatus {
    pub undo_size: usize,
    pub redo_size: usize,
    pub batching: bool,
    pub pending: usize,
    pub capacity: usize,
    pub undo: Vec<HistoryEntry>,
    pub redo: Vec<HistoryEntry>,
}

// =============================================================================
// LOG
// =============================================================================

/// The undo/redo log of one editing session.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    undo: VecDeque<HistoryEntry>,
    redo: VecDeque<HistoryEntry>,
    batch: Option<Vec<HistoryEntry>>,
    capacity: usize,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::with_capacity(MAX_STACK)
    }
}

impl HistoryLog {
    /// A log whose stacks keep at most `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::with_capacity(capacity),
            batch: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    /// Record a new entry. Outside a batch this clears the redo stack.
    pub fn push(&mut self, entry: HistoryEntry) {
        match &mut self.batch {
            Some(pending) => pending.push(entry),
            None => self.commit_entry(entry),
        }
    }

    fn commit_entry(&mut self, entry: HistoryEntry) {
        self.redo.clear();
        self.undo.push_back(entry);
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    /// Open a batch.
    pub fn begin_batch(&mut self) -> Result<(), WeftError> {
        if self.batch.is_some() {
            return Err(WeftError::AlreadyBatching);
        }
        self.batch = Some(Vec::new());
        tracing::debug!("history batch opened");
        Ok(())
    }

    /// Close the batch, folding its entries into one undo entry.
    ///
    /// Returns how many entries were folded. An empty batch leaves the
    /// stacks alone.
    pub fn end_batch(&mut self) -> Result<usize, WeftError> {
        let mut pending = self.batch.take().ok_or(WeftError::NotBatching)?;
        let count = pending.len();
        match count {
            0 => {}
            1 => {
                if let Some(entry) = pending.pop() {
                    self.commit_entry(entry);
                }
            }
            _ => self.commit_entry(HistoryEntry::Compound { operations: pending }),
        }
        tracing::debug!(entries = count, "history batch closed");
        Ok(count)
    }

    /// Discard the batch. Returns how many entries were dropped.
    pub fn cancel_batch(&mut self) -> Result<usize, WeftError> {
        let pending = self.batch.take().ok_or(WeftError::NotBatching)?;
        tracing::debug!(entries = pending.len(), "history batch cancelled");
        Ok(pending.len())
    }

    /// Empty both stacks. An open batch stays open.
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    /// Take the most recent undo entry.
    pub fn pop_undo(&mut self) -> Option<HistoryEntry> {
        self.undo.pop_back()
    }

    /// Take the most recent redo entry.
    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop_back()
    }

    /// Put an entry back on top of the undo stack without touching redo.
    pub fn restore_undo(&mut self, entry: HistoryEntry) {
        self.undo.push_back(entry);
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    /// Put an entry on top of the redo stack.
    pub fn restore_redo(&mut self, entry: HistoryEntry) {
        self.redo.push_back(entry);
        while self.redo.len() > self.capacity {
            self.redo.pop_front();
        }
    }

    /// Move the top of redo back to undo (inverse of a completed undo).
    pub(crate) fn revert_undo(&mut self) {
        if let Some(entry) = self.redo.pop_back() {
            self.restore_undo(entry);
        }
    }

    /// Move the top of undo back to redo (inverse of a completed redo).
    pub(crate) fn revert_redo(&mut self) {
        if let Some(entry) = self.undo.pop_back() {
            self.restore_redo(entry);
        }
    }

    /// Sizes, batch state and both stacks, oldest entry first.
    #[must_use]
    pub fn status(&self) -> HistoryStatus {
        HistoryStatus {
            undo_size: self.undo.len(),
            redo_size: self.redo.len(),
            batching: self.batch.is_some(),
            pending: self.batch.as_ref().map_or(0, Vec::len),
            capacity: self.capacity,
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.iter().cloned().collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(n: u32) -> HistoryEntry {
        HistoryEntry::Simple {
            forward: Operation::new(format!("/f/{}", n), json!(n)),
            backward: Operation::new(format!("/b/{}", n), json!(n)),
        }
    }

    #[test]
    fn push_clears_redo() {
        let mut log = HistoryLog::default();
        log.push(entry(1));
        let top = log.pop_undo().expect("entry");
        log.restore_redo(top);
        assert_eq!(log.redo_len(), 1);

        log.push(entry(2));
        assert_eq!(log.redo_len(), 0);
        assert_eq!(log.undo_len(), 1);
    }

    #[test]
    fn ring_evicts_oldest() {
        let mut log = HistoryLog::with_capacity(3);
        for n in 0..5 {
            log.push(entry(n));
        }
        assert_eq!(log.undo_len(), 3);
        let status = log.status();
        assert_eq!(status.undo[0], entry(2));
        assert_eq!(status.undo[2], entry(4));
    }

    #[test]
    fn batch_states() {
        let mut log = HistoryLog::default();
        assert!(matches!(log.end_batch(), Err(WeftError::NotBatching)));
        assert!(matches!(log.cancel_batch(), Err(WeftError::NotBatching)));
        log.begin_batch().expect("begin");
        assert!(matches!(log.begin_batch(), Err(WeftError::AlreadyBatching)));
        assert!(log.is_batching());
        assert_eq!(log.end_batch().expect("end"), 0);
        assert!(!log.is_batching());
        assert_eq!(log.undo_len(), 0);
    }

    #[test]
    fn batch_of_one_stays_simple() {
        let mut log = HistoryLog::default();
        log.begin_batch().expect("begin");
        log.push(entry(1));
        assert_eq!(log.undo_len(), 0);
        log.end_batch().expect("end");
        assert_eq!(log.pop_undo(), Some(entry(1)));
    }

    #[test]
    fn batch_of_many_folds_into_compound() {
        let mut log = HistoryLog::default();
        log.begin_batch().expect("begin");
        log.push(entry(1));
        log.push(entry(2));
        assert_eq!(log.end_batch().expect("end"), 2);
        assert_eq!(log.undo_len(), 1);

        let folded = log.pop_undo().expect("entry");
        let undo: Vec<_> = folded.undo_operations().into_iter().map(|op| op.path).collect();
        assert_eq!(undo, vec!["/b/2", "/b/1"]);
        let redo: Vec<_> = folded.redo_operations().into_iter().map(|op| op.path).collect();
        assert_eq!(redo, vec!["/f/1", "/f/2"]);
    }

    #[test]
    fn cancel_discards_pending() {
        let mut log = HistoryLog::default();
        log.push(entry(0));
        log.begin_batch().expect("begin");
        log.push(entry(1));
        assert_eq!(log.cancel_batch().expect("cancel"), 1);
        assert_eq!(log.undo_len(), 1);
        assert_eq!(log.pop_undo(), Some(entry(0)));
    }

    #[test]
    fn revert_moves_are_inverse() {
        let mut log = HistoryLog::default();
        log.push(entry(1));
        let top = log.pop_undo().expect("entry");
        log.restore_redo(top);
        log.revert_undo();
        assert_eq!((log.undo_len(), log.redo_len()), (1, 0));
        log.revert_redo();
        assert_eq!((log.undo_len(), log.redo_len()), (0, 1));
    }

    #[test]
    fn entry_json_shapes() {
        let simple = serde_json::to_value(entry(1)).expect("serialize");
        assert!(simple.get("forward").is_some());
        let compound = HistoryEntry::Compound {
            operations: vec![entry(1)],
        };
        let value = serde_json::to_value(&compound).expect("serialize");
        assert!(value.get("operations").is_some());
        let back: HistoryEntry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, compound);
    }
}
