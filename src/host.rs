//! Narrow view of the host that drives a render invocation: the attachments
//! presented on each input row.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub name: String,
    pub mime_type: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("input row {row} does not exist")]
    RowOutOfRange { row: usize },
    #[error("attachment '{name}' not found on input row {row}")]
    AttachmentMissing { row: usize, name: String },
}

pub trait AttachmentHost {
    fn row_count(&self) -> usize;
    fn attachments(&self, row: usize) -> Vec<AttachmentInfo>;
    fn attachment_bytes(&self, row: usize, name: &str) -> Result<Vec<u8>, HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredAttachment {
    info: AttachmentInfo,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InMemoryAttachments {
    rows: Vec<Vec<StoredAttachment>>,
}

impl InMemoryAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attachment to `row`, growing the row list as needed. A second
    /// attachment with the same name on the same row replaces the first.
    pub fn insert(
        &mut self,
        row: usize,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        file_name: Option<String>,
        bytes: Vec<u8>,
    ) {
        while self.rows.len() <= row {
            self.rows.push(Vec::new());
        }
        let info = AttachmentInfo {
            name: name.into(),
            mime_type: mime_type.into(),
            file_name,
        };
        let entries = &mut self.rows[row];
        entries.retain(|entry| entry.info.name != info.name);
        entries.push(StoredAttachment { info, bytes });
    }

    pub fn with(
        mut self,
        row: usize,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.insert(row, name, mime_type, None, bytes);
        self
    }
}

impl AttachmentHost for InMemoryAttachments {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn attachments(&self, row: usize) -> Vec<AttachmentInfo> {
        self.rows
            .get(row)
            .map(|entries| entries.iter().map(|entry| entry.info.clone()).collect())
            .unwrap_or_default()
    }

    fn attachment_bytes(&self, row: usize, name: &str) -> Result<Vec<u8>, HostError> {
        let entries = self
            .rows
            .get(row)
            .ok_or(HostError::RowOutOfRange { row })?;
        entries
            .iter()
            .find(|entry| entry.info.name == name)
            .map(|entry| entry.bytes.clone())
            .ok_or_else(|| HostError::AttachmentMissing {
                row,
                name: name.to_string(),
            })
    }
}
