use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// `data:<mime>;base64,<payload>`
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        if self.mime_type.starts_with("image/") {
            AttachmentKind::Image
        } else if self.mime_type.starts_with("video/") {
            AttachmentKind::Video
        } else if self.mime_type.starts_with("audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::File
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub achieved: bool,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    /// `YYYY-MM-DD`, empty when unset.
    #[serde(default)]
    pub date: String,
    /// `HH:MM`, empty when unset.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl TodoRecord {
    pub fn has_reminder_slot(&self) -> bool {
        !self.date.trim().is_empty() && !self.time.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_record_uses_camel_case_keys() -> anyhow::Result<()> {
        let raw = r#"{
            "id": "n1",
            "title": "Groceries",
            "content": "<b>milk</b>",
            "text": "milk",
            "attachments": [{"id": "a1", "name": "pic.png", "type": "image/png", "data": "data:image/png;base64,AA=="}],
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-02T00:00:00Z",
            "achieved": true
        }"#;
        let note: NoteRecord = serde_json::from_str(raw)?;
        assert_eq!(note.attachments[0].kind(), AttachmentKind::Image);
        assert!(note.achieved);
        let value = serde_json::to_value(&note)?;
        assert_eq!(value["createdAt"], "2025-01-01T00:00:00Z");
        assert_eq!(value["attachments"][0]["type"], "image/png");
        Ok(())
    }

    #[test]
    fn todo_record_omits_missing_updated_at() -> anyhow::Result<()> {
        let todo = TodoRecord {
            id: "t1".into(),
            title: "Call mum".into(),
            priority: Priority::High,
            date: String::new(),
            time: String::new(),
            completed: false,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: None,
        };
        let value = serde_json::to_value(&todo)?;
        assert!(value.get("updatedAt").is_none());
        assert_eq!(value["priority"], "high");
        assert!(!todo.has_reminder_slot());
        Ok(())
    }
}
