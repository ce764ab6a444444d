use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::storage::{Attachment, NoteRecord, StorageHandle};
use crate::text::{self, UNTITLED_NOTE};

pub mod history;

pub use history::{HistoryManager, Snapshot, DEFAULT_HISTORY_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorMode {
    Create,
    Edit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Bold,
    Italic,
    Underline,
    FontSize(u8),
}

impl FormatKind {
    fn wrap(self, inner: &str) -> String {
        match self {
            FormatKind::Bold => format!("<b>{inner}</b>"),
            FormatKind::Italic => format!("<i>{inner}</i>"),
            FormatKind::Underline => format!("<u>{inner}</u>"),
            FormatKind::FontSize(size) => {
                format!("<font size=\"{}\">{inner}</font>", size.clamp(1, 7))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub contents: String,
}

/// One open note. Owns the live title, content and attachments plus the
/// undo/redo history for them.
#[derive(Debug)]
pub struct EditorSession {
    mode: EditorMode,
    title: String,
    content: String,
    attachments: Vec<Attachment>,
    history: HistoryManager,
}

impl EditorSession {
    /// Opens `note_id` when it names a stored note, otherwise starts a new
    /// draft. The opening state becomes the floor of the undo history.
    pub fn open(storage: &StorageHandle, note_id: Option<&str>, history_depth: usize) -> Self {
        let existing = note_id.and_then(|id| {
            storage
                .load_notes()
                .into_iter()
                .find(|note| note.id == id)
        });
        let mut session = match existing {
            Some(note) => Self {
                mode: EditorMode::Edit(note.id),
                title: note.title,
                content: note.content,
                attachments: note.attachments,
                history: HistoryManager::new(history_depth),
            },
            None => {
                if let Some(id) = note_id {
                    tracing::debug!(note_id = id, "note not found, opening a blank draft");
                }
                Self::blank(history_depth)
            }
        };
        session.record();
        session
    }

    pub fn blank(history_depth: usize) -> Self {
        Self {
            mode: EditorMode::Create,
            title: String::new(),
            content: String::new(),
            attachments: Vec::new(),
            history: HistoryManager::new(history_depth),
        }
    }

    pub fn mode(&self) -> &EditorMode {
        &self.mode
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.title.clone(), self.content.clone()).with_attachments(&self.attachments)
    }

    pub fn record(&mut self) {
        let snapshot = self.snapshot();
        self.history.record_snapshot(snapshot);
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.record();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.record();
    }

    /// Wraps `range` (byte offsets into the content) or the whole content in
    /// the markup for `kind`. Ranges that do not fall on character
    /// boundaries are ignored.
    pub fn apply_format(&mut self, kind: FormatKind, range: Option<Range<usize>>) -> bool {
        let range = range.unwrap_or(0..self.content.len());
        if range.start > range.end
            || range.end > self.content.len()
            || !self.content.is_char_boundary(range.start)
            || !self.content.is_char_boundary(range.end)
        {
            return false;
        }
        let wrapped = kind.wrap(&self.content[range.clone()]);
        self.content.replace_range(range, &wrapped);
        self.record();
        true
    }

    pub fn attach(&mut self, name: &str, bytes: &[u8]) -> &Attachment {
        let mime_type = detect_mime(name, bytes);
        let data = format!("data:{mime_type};base64,{}", STANDARD.encode(bytes));
        self.attachments.push(Attachment {
            id: text::generate_id(),
            name: name.to_string(),
            mime_type,
            data,
        });
        self.record();
        let last = self.attachments.len() - 1;
        &self.attachments[last]
    }

    pub fn attach_file(&mut self, path: &Path) -> Result<&Attachment> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading attachment {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment")
            .to_string();
        Ok(self.attach(&name, &bytes))
    }

    pub fn remove_attachment(&mut self, attachment_id: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.id != attachment_id);
        if self.attachments.len() == before {
            return false;
        }
        self.record();
        true
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.history.undo().cloned() else {
            return false;
        };
        self.apply(snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let current = self.snapshot();
        let Some(snapshot) = self.history.redo(current) else {
            return false;
        };
        self.apply(snapshot);
        true
    }

    pub fn plain_text(&self) -> String {
        text::extract_text_from_html(&self.content)
    }

    pub fn word_count(&self) -> usize {
        text::count_words(&self.plain_text())
    }

    fn display_title(&self) -> String {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            UNTITLED_NOTE.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Persists the live state. A new draft is prepended to the note list and
    /// the session switches to editing it. Returns `false` when the write
    /// failed.
    pub fn save(&mut self, storage: &StorageHandle) -> bool {
        let title = self.display_title();
        let plain = self.plain_text();
        let now = text::timestamp(text::now_local());
        let mut notes = storage.load_notes();

        match self.mode.clone() {
            EditorMode::Edit(id) => {
                let Some(note) = notes.iter_mut().find(|note| note.id == id) else {
                    tracing::debug!(note_id = %id, "note vanished before save");
                    return true;
                };
                note.title = title;
                note.content = self.content.clone();
                note.text = plain;
                note.attachments = self.attachments.clone();
                note.updated_at = now;
                storage.save_notes(&notes)
            }
            EditorMode::Create => {
                let note = NoteRecord {
                    id: text::generate_id(),
                    title,
                    content: self.content.clone(),
                    text: plain,
                    attachments: self.attachments.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                    achieved: false,
                };
                let id = note.id.clone();
                notes.insert(0, note);
                let saved = storage.save_notes(&notes);
                if saved {
                    tracing::info!(note_id = %id, "created note");
                    self.mode = EditorMode::Edit(id);
                }
                saved
            }
        }
    }

    pub fn export(&self) -> ExportedFile {
        let title = self.display_title();
        ExportedFile {
            filename: text::export_filename(&title),
            contents: format!("{title}\n\n{}", self.plain_text()),
        }
    }

    /// First line becomes the title, the rest the content.
    pub fn import(&mut self, raw: &str) {
        let mut lines = raw.split('\n');
        let title = lines.next().unwrap_or_default();
        self.title = title.trim_end_matches('\r').to_string();
        self.content = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        self.record();
    }

    /// Ends the session, saving first when `autosave` is set and there is
    /// something to keep.
    pub fn close(mut self, storage: &StorageHandle, autosave: bool) -> bool {
        if autosave && (!self.title.trim().is_empty() || !self.content.trim().is_empty()) {
            return self.save(storage);
        }
        true
    }

    fn apply(&mut self, snapshot: Snapshot) {
        self.title = snapshot.title;
        self.content = snapshot.content;
        self.attachments = snapshot.attachments;
    }
}

fn detect_mime(name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    let mime = match ext.as_deref() {
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    };
    mime.to_string()
}
