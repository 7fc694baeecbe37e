use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single file delivered by the admin team.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionFile {
    pub file_id: String,
    pub file_url: String,
    pub filename: String,
    pub mime_type: String,
}

/// Append-only delivery record, one per order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub order_id: String,
    /// Admin who delivered the files.
    pub delivered_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub files: Vec<SubmissionFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(order_id: impl Into<String>, delivered_by: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            delivered_by: delivered_by.into(),
            email: None,
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Appends files whose `fileId` is not yet recorded and returns how many
    /// were added. Existing entries are never modified or removed.
    pub fn append(&mut self, files: Vec<SubmissionFile>, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for file in files {
            if !self.files.iter().any(|f| f.file_id == file.file_id) {
                self.files.push(file);
                added += 1;
            }
        }
        if added > 0 {
            self.updated_at = now;
        }
        added
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }
}
