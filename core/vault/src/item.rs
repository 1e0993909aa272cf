//! Vault item records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultkeep_common::{Error, FolderPath, ItemId, PhysicalRef, Result, SensitiveBytes};
use vaultkeep_crypto::ContentHash;

/// `application/*` substrings that mark a document.
const DOCUMENT_MARKERS: &[&str] = &[
    "msword",
    "wordprocessing",
    "officedocument",
    "vnd.",
    "rtf",
    "epub",
];

/// Coarse content type of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Image,
    Video,
    Document,
    Other,
}

/// One stored file: metadata plus the name of its ciphertext blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultItem {
    pub id: ItemId,
    pub original_name: String,
    /// Lowercase MIME type.
    pub mime_type: String,
    /// Plaintext length in bytes.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub physical_ref: PhysicalRef,
    pub category: Option<String>,
    /// Logical folder; `None` is the root.
    pub folder_path: Option<FolderPath>,
    pub content_hash: ContentHash,
    /// Set at ingestion; never re-derived from the MIME type.
    pub is_image: bool,
}

impl VaultItem {
    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    pub fn is_document(&self) -> bool {
        let mime = self.mime_type.as_str();
        if mime.starts_with("text/") || mime.contains("pdf") {
            return true;
        }
        mime.starts_with("application/") && DOCUMENT_MARKERS.iter().any(|m| mime.contains(m))
    }

    /// Kind with precedence image, video, document, other.
    pub fn kind(&self) -> ItemKind {
        if self.is_image {
            ItemKind::Image
        } else if self.is_video() {
            ItemKind::Video
        } else if self.is_document() {
            ItemKind::Document
        } else {
            ItemKind::Other
        }
    }

    /// Folder as a path, root when unset.
    pub fn folder(&self) -> FolderPath {
        self.folder_path.clone().unwrap_or_else(FolderPath::root)
    }

    /// Whether the item sits directly in `folder` (`None` = root).
    pub fn is_in(&self, folder: Option<&FolderPath>) -> bool {
        self.folder_path.as_ref() == folder
    }
}

/// Input for adding an item.
#[derive(Debug)]
pub struct NewItem {
    pub data: SensitiveBytes,
    pub original_name: String,
    pub mime_type: String,
    pub is_image: bool,
    pub category: Option<String>,
    pub folder: Option<FolderPath>,
}

impl NewItem {
    pub fn new(
        data: impl Into<Vec<u8>>,
        original_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            data: SensitiveBytes::new(data.into()),
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            is_image: false,
            category: None,
            folder: None,
        }
    }

    pub fn image(mut self, is_image: bool) -> Self {
        self.is_image = is_image;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn folder(mut self, folder: FolderPath) -> Self {
        self.folder = Some(folder);
        self
    }

    /// Build the record for a blob that was just written.
    ///
    /// Names are trimmed, MIME types lowercased, blank categories dropped,
    /// and an unset folder falls back to the category.
    pub(crate) fn into_record(
        self,
        physical_ref: PhysicalRef,
        content_hash: ContentHash,
    ) -> Result<(VaultItem, SensitiveBytes)> {
        let original_name = validate_name(&self.original_name)?;
        let category = self
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let folder_path = self
            .folder
            .filter(|f| !f.is_root())
            .or_else(|| FolderPath::from_optional(category.as_deref()));

        let item = VaultItem {
            id: ItemId::generate(),
            original_name,
            mime_type: self.mime_type.trim().to_lowercase(),
            size: self.data.len() as u64,
            created_at: now_millis(),
            physical_ref,
            category,
            folder_path,
            content_hash,
            is_image: self.is_image,
        };
        Ok((item, self.data))
    }
}

/// Trim a display name and reject blank or path-like names.
pub(crate) fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Item name cannot be empty".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidInput(format!(
            "Item name cannot contain '/': {}",
            name
        )));
    }
    Ok(name.to_string())
}

/// Current time truncated to the millisecond precision the index stores.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}


#[cfg(test)]
mod tests {
    use super::fixtures::item;
    use super::*;

    #[test]
    fn test_kind_precedence() {
        assert_eq!(item("a.jpg", "image/jpeg").kind(), ItemKind::Image);
        assert_eq!(item("a.mp4", "video/mp4").kind(), ItemKind::Video);
        assert_eq!(item("a.pdf", "application/pdf").kind(), ItemKind::Document);
        assert_eq!(item("a.txt", "text/plain").kind(), ItemKind::Document);
        assert_eq!(item("a.zip", "application/zip").kind(), ItemKind::Other);

        // The ingestion flag wins over the MIME type.
        let mut flagged = item("frame.mp4", "video/mp4");
        flagged.is_image = true;
        assert_eq!(flagged.kind(), ItemKind::Image);
    }

    #[test]
    fn test_document_markers() {
        for mime in [
            "application/msword",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "application/vnd.ms-excel",
            "application/rtf",
            "application/epub+zip",
        ] {
            assert!(item("x", mime).is_document(), "{mime}");
        }
        assert!(!item("x", "application/json").is_document());
        assert!(!item("x", "audio/mpeg").is_document());
    }

    #[test]
    fn test_into_record_normalizes() {
        let new = NewItem::new(vec![1, 2, 3], "  photo.jpg ", " Image/JPEG ")
            .image(true)
            .category("  Trips ");
        let (record, data) = new
            .into_record(PhysicalRef::generate(), ContentHash::of(&[1, 2, 3]))
            .unwrap();

        assert_eq!(record.original_name, "photo.jpg");
        assert_eq!(record.mime_type, "image/jpeg");
        assert_eq!(record.size, 3);
        assert_eq!(record.category.as_deref(), Some("Trips"));
        assert_eq!(record.folder_path, Some(FolderPath::parse("Trips")));
        assert_eq!(data.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_into_record_keeps_explicit_folder() {
        let new = NewItem::new(vec![0], "a.txt", "text/plain")
            .category("Work")
            .folder(FolderPath::parse("Inbox/2024"));
        let (record, _) = new
            .into_record(PhysicalRef::generate(), ContentHash::of(&[0]))
            .unwrap();

        assert_eq!(record.folder_path, Some(FolderPath::parse("Inbox/2024")));
    }

    #[test]
    fn test_into_record_rejects_blank_name() {
        let new = NewItem::new(vec![0], "   ", "text/plain");
        assert!(new
            .into_record(PhysicalRef::generate(), ContentHash::of(&[0]))
            .is_err());
        assert!(validate_name("a/b").is_err());
    }
}
