use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::storage::{NoteRecord, StorageHandle, TodoRecord, PENDING_UNDO_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum DeletedItem {
    Note(NoteRecord),
    Todo(TodoRecord),
}

impl DeletedItem {
    pub fn label(&self) -> &'static str {
        match self {
            DeletedItem::Note(_) => "Note",
            DeletedItem::Todo(_) => "Task",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            DeletedItem::Note(note) => &note.title,
            DeletedItem::Todo(todo) => &todo.title,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUndo {
    pub item: DeletedItem,
    /// Position the item held before it was removed.
    pub index: usize,
    /// Unix milliseconds after which the deletion is final.
    pub expires_at: i64,
}

impl PendingUndo {
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        unix_millis(now) < self.expires_at
    }
}

/// Owns the single undo slot. A newer deletion replaces the pending one,
/// which then becomes permanent.
#[derive(Clone)]
pub struct UndoLedger {
    storage: StorageHandle,
    window: Duration,
}

impl UndoLedger {
    pub fn new(storage: StorageHandle, window: Duration) -> Self {
        Self { storage, window }
    }

    pub fn peek(&self) -> Option<PendingUndo> {
        self.storage.get_json(PENDING_UNDO_KEY, None)
    }

    pub fn push(&self, item: DeletedItem, index: usize, now: OffsetDateTime) -> bool {
        if let Some(previous) = self.peek().filter(|p| p.is_live(now)) {
            tracing::info!(
                kind = previous.item.label(),
                title = previous.item.title(),
                "pending undo superseded by a newer deletion"
            );
        }
        let pending = PendingUndo {
            item,
            index,
            expires_at: unix_millis(now + self.window),
        };
        self.storage.set_json(PENDING_UNDO_KEY, &Some(pending))
    }

    /// Drops the pending slot without restoring anything.
    pub fn discard(&self) {
        if let Err(err) = self.storage.remove(PENDING_UNDO_KEY) {
            tracing::error!(?err, "failed to clear pending undo");
        }
    }

    /// Removes and returns the pending deletion if its window is still open.
    pub fn take_live(&self, now: OffsetDateTime) -> Option<PendingUndo> {
        let pending = self.peek()?;
        if let Err(err) = self.storage.remove(PENDING_UNDO_KEY) {
            tracing::error!(?err, "failed to clear pending undo");
        }
        if pending.is_live(now) {
            Some(pending)
        } else {
            tracing::debug!(kind = pending.item.label(), "pending undo expired");
            None
        }
    }

    /// Puts the pending item back where it was. Returns the restored item,
    /// or `None` when nothing was pending, the window closed, or the write
    /// failed.
    pub fn undo(&self, now: OffsetDateTime) -> Option<DeletedItem> {
        let pending = self.take_live(now)?;
        let saved = match &pending.item {
            DeletedItem::Note(note) => {
                let mut notes = self.storage.load_notes();
                let index = pending.index.min(notes.len());
                notes.insert(index, note.clone());
                self.storage.save_notes(&notes)
            }
            DeletedItem::Todo(todo) => {
                let mut todos = self.storage.load_todos();
                let index = pending.index.min(todos.len());
                todos.insert(index, todo.clone());
                self.storage.save_todos(&todos)
            }
        };
        saved.then_some(pending.item)
    }
}

fn unix_millis(dt: OffsetDateTime) -> i64 {
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}
