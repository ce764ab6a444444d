//! Linear undo/redo over whole-document snapshots.
//!
//! Every tracked edit pushes a full copy of the editor state. The undo
//! stack is capped (oldest entries are evicted first) and always keeps its
//! first entry once editing has begun, so the editor can return to the
//! earliest recorded state but never past it. Any fresh edit clears the
//! redo stack; there are no branching timelines.

use std::collections::VecDeque;

use crate::storage::Attachment;

pub const DEFAULT_HISTORY_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub title: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

impl Snapshot {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: &[Attachment]) -> Self {
        self.attachments = attachments.to_vec();
        self
    }
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    max_depth: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl HistoryManager {
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            undo: VecDeque::with_capacity(max_depth + 1),
            redo: Vec::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Records a fresh edit. Identical consecutive snapshots are kept.
    pub fn record_snapshot(&mut self, snapshot: Snapshot) {
        self.push_undo(snapshot);
        self.redo.clear();
    }

    /// Steps back one entry and returns the state to apply, or `None` when
    /// only the floor entry is left.
    pub fn undo(&mut self) -> Option<&Snapshot> {
        if self.undo.len() <= 1 {
            return None;
        }
        let top = self.undo.pop_back()?;
        self.redo.push(top);
        self.undo.back()
    }

    /// Re-applies the most recently undone entry. `current` is the live
    /// state at the time of the call; it is pushed back onto the undo stack
    /// before the returned snapshot replaces it.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.redo.pop()?;
        self.push_undo(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 1
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.undo.back()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn push_undo(&mut self, snapshot: Snapshot) {
        self.undo.push_back(snapshot);
        while self.undo.len() > self.max_depth {
            self.undo.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(title: &str) -> Snapshot {
        Snapshot::new(title, format!("<p>{title}</p>"))
    }

    #[test]
    fn undo_walks_back_to_first_snapshot_and_stops() {
        let mut history = HistoryManager::default();
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));
        history.record_snapshot(titled("C"));

        assert_eq!(history.undo().map(|s| s.title.clone()), Some("B".into()));
        assert_eq!(history.undo().map(|s| s.title.clone()), Some("A".into()));
        assert!(history.undo().is_none());
        assert_eq!(history.latest().map(|s| s.title.as_str()), Some("A"));
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn exhausting_undo_always_leaves_the_floor_entry() {
        for count in 1..=DEFAULT_HISTORY_DEPTH {
            let mut history = HistoryManager::default();
            for i in 0..count {
                history.record_snapshot(titled(&i.to_string()));
            }
            while history.undo().is_some() {}
            assert_eq!(history.undo_depth(), 1, "after {count} records");
            assert_eq!(history.latest().map(|s| s.title.as_str()), Some("0"));
        }
    }

    #[test]
    fn undo_on_empty_history_is_noop() {
        let mut history = HistoryManager::default();
        assert!(history.undo().is_none());
        assert!(history.redo(titled("live")).is_none());
        assert_eq!(history.undo_depth(), 0);
    }

    #[test]
    fn redo_restores_state_before_undo() {
        let mut history = HistoryManager::default();
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));

        let live_before_undo = titled("B");
        let applied = history.undo().cloned().expect("undo");
        assert_eq!(applied.title, "A");

        let redone = history.redo(applied).expect("redo");
        assert_eq!(redone, live_before_undo);
        assert!(!history.can_redo());
    }

    #[test]
    fn redo_pushes_current_live_state() {
        let mut history = HistoryManager::default();
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));
        history.undo();

        history.redo(titled("A-edited-live")).expect("redo");
        assert_eq!(history.undo_depth(), 2);
        assert_eq!(
            history.latest().map(|s| s.title.as_str()),
            Some("A-edited-live")
        );
    }

    #[test]
    fn fresh_record_clears_redo() {
        let mut history = HistoryManager::default();
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));
        history.undo();
        assert!(history.can_redo());

        history.record_snapshot(titled("C"));
        assert!(!history.can_redo());
        assert!(history.redo(titled("C")).is_none());
    }

    #[test]
    fn stack_is_capped_and_evicts_oldest() {
        let mut history = HistoryManager::default();
        for i in 0..=DEFAULT_HISTORY_DEPTH {
            history.record_snapshot(titled(&i.to_string()));
            assert!(history.undo_depth() <= DEFAULT_HISTORY_DEPTH);
        }
        assert_eq!(history.undo_depth(), DEFAULT_HISTORY_DEPTH);
        while history.undo().is_some() {}
        assert_eq!(history.latest().map(|s| s.title.as_str()), Some("1"));
    }

    #[test]
    fn redo_respects_cap() {
        let mut history = HistoryManager::new(2);
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));
        history.undo();
        history.redo(titled("A")).expect("redo");
        assert_eq!(history.redo_depth(), 0);
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn duplicate_snapshots_are_not_deduplicated() {
        let mut history = HistoryManager::default();
        history.record_snapshot(titled("same"));
        history.record_snapshot(titled("same"));
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn zero_depth_is_clamped_to_one() {
        let mut history = HistoryManager::new(0);
        history.record_snapshot(titled("A"));
        history.record_snapshot(titled("B"));
        assert_eq!(history.max_depth(), 1);
        assert_eq!(history.undo_depth(), 1);
        assert!(history.undo().is_none());
    }
}
