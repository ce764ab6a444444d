use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::notify::{DeletedItem, UndoLedger};
use crate::storage::{NoteRecord, StorageHandle};
use crate::text;

pub const PREVIEW_CHARS: usize = 150;
/// Note count at which the progress meter is full.
pub const PROGRESS_TARGET: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NoteFilter {
    #[default]
    All,
    Achieved,
}

impl NoteFilter {
    pub fn matches(self, note: &NoteRecord) -> bool {
        match self {
            NoteFilter::All => true,
            NoteFilter::Achieved => note.achieved,
        }
    }

    pub fn empty_message(self) -> &'static str {
        match self {
            NoteFilter::All => "No notes yet. Create your first note!",
            NoteFilter::Achieved => "No achieved notes yet.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteCard {
    pub id: String,
    pub title: String,
    pub date_label: String,
    pub preview: String,
    pub achieved: bool,
    pub attachment_count: usize,
}

impl From<&NoteRecord> for NoteCard {
    fn from(note: &NoteRecord) -> Self {
        let stamp = if note.updated_at.is_empty() {
            &note.created_at
        } else {
            &note.updated_at
        };
        Self {
            id: note.id.clone(),
            title: note.title.clone(),
            date_label: text::format_timestamp_date(stamp),
            preview: text::truncate_text(&note.text, PREVIEW_CHARS),
            achieved: note.achieved,
            attachment_count: note.attachments.len(),
        }
    }
}

/// The note list. Every call reads storage fresh; nothing is cached here.
pub struct NoteBook {
    storage: StorageHandle,
    ledger: UndoLedger,
}

impl NoteBook {
    pub fn new(storage: StorageHandle, ledger: UndoLedger) -> Self {
        Self { storage, ledger }
    }

    pub fn get(&self, id: &str) -> Option<NoteRecord> {
        self.storage.load_notes().into_iter().find(|note| note.id == id)
    }

    pub fn cards(&self, filter: NoteFilter) -> Vec<NoteCard> {
        self.storage
            .load_notes()
            .iter()
            .filter(|note| filter.matches(note))
            .map(NoteCard::from)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.storage.load_notes().len()
    }

    pub fn progress_percent(&self) -> u8 {
        let count = self.count().min(PROGRESS_TARGET);
        (count * 100 / PROGRESS_TARGET) as u8
    }

    /// Flips the achieved flag. `None` when the id is unknown or the write
    /// failed.
    pub fn toggle_achieved(&self, id: &str) -> Option<bool> {
        let mut notes = self.storage.load_notes();
        let note = notes.iter_mut().find(|note| note.id == id)?;
        note.achieved = !note.achieved;
        let achieved = note.achieved;
        self.storage.save_notes(&notes).then_some(achieved)
    }

    /// Records the note in the undo slot, then removes it. `false` when the
    /// id is unknown or either write failed; the list is untouched then.
    pub fn delete(&self, id: &str, now: OffsetDateTime) -> bool {
        let mut notes = self.storage.load_notes();
        let Some(index) = notes.iter().position(|note| note.id == id) else {
            return false;
        };
        let removed = notes.remove(index);
        let note_id = removed.id.clone();
        if !self.ledger.push(DeletedItem::Note(removed), index, now) {
            tracing::warn!(%note_id, "could not record undo, note kept");
            return false;
        }
        if !self.storage.save_notes(&notes) {
            self.ledger.discard();
            return false;
        }
        tracing::info!(%note_id, "deleted note");
        true
    }
}
