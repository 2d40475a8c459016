//! Deterministic local layout of vault content
//!
//! ```text
//! {data_dir}/files/bin/{collection}/{file}{ext}          decrypted content
//! {data_dir}/files/enc/{collection}/{file}.enc           encrypted content
//! {data_dir}/files/thumbs/{collection}/{file}.thumb      decrypted thumbnail
//! {data_dir}/files/thumbs/{collection}/{file}.thumb.enc  encrypted thumbnail
//! ```

use std::path::{Path, PathBuf};

use crate::types::FileMetadata;

/// Extension used when nothing better can be determined.
pub const FALLBACK_EXTENSION: &str = ".dat";

const MIME_TABLE: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/heic", ".heic"),
    ("image/svg+xml", ".svg"),
    ("video/mp4", ".mp4"),
    ("video/quicktime", ".mov"),
    ("video/webm", ".webm"),
    ("audio/mpeg", ".mp3"),
    ("audio/wav", ".wav"),
    ("audio/ogg", ".ogg"),
    ("application/pdf", ".pdf"),
    ("application/zip", ".zip"),
    ("application/json", ".json"),
    ("application/msword", ".doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
    ),
    ("text/plain", ".txt"),
    ("text/markdown", ".md"),
    ("text/csv", ".csv"),
    ("text/html", ".html"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalLayout {
    root: PathBuf,
}

impl LocalLayout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn decrypted_path(&self, collection_id: &str, file_id: &str, extension: &str) -> PathBuf {
        self.root
            .join("files/bin")
            .join(collection_id)
            .join(format!("{file_id}{extension}"))
    }

    pub fn encrypted_path(&self, collection_id: &str, file_id: &str) -> PathBuf {
        self.root
            .join("files/enc")
            .join(collection_id)
            .join(format!("{file_id}.enc"))
    }

    pub fn decrypted_thumbnail_path(&self, collection_id: &str, file_id: &str) -> PathBuf {
        self.root
            .join("files/thumbs")
            .join(collection_id)
            .join(format!("{file_id}.thumb"))
    }

    pub fn encrypted_thumbnail_path(&self, collection_id: &str, file_id: &str) -> PathBuf {
        self.root
            .join("files/thumbs")
            .join(collection_id)
            .join(format!("{file_id}.thumb.enc"))
    }
}

/// Resolve the extension (with leading dot) for a decrypted copy.
///
/// Priority: explicit metadata extension, then the extension of the
/// original name, then the MIME table, then [`FALLBACK_EXTENSION`].
pub fn resolve_extension(metadata: &FileMetadata) -> String {
    if let Some(ext) = metadata.extension.as_deref().and_then(normalize) {
        return ext;
    }
    if let Some(ext) = Path::new(&metadata.name)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(normalize)
    {
        return ext;
    }
    extension_for_mime(&metadata.mime_type)
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

fn normalize(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() || trimmed.contains(['/', '\\']) {
        return None;
    }
    Some(format!(".{}", trimmed.to_ascii_lowercase()))
}

pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let mime = mime.split(';').next().unwrap_or_default().trim();
    MIME_TABLE
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mime))
        .map(|(_, ext)| *ext)
}

/// Guess a MIME type from a file name, for import.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()));
    match ext.as_deref() {
        Some(".jpeg") => "image/jpeg",
        Some(".htm") => "text/html",
        Some(ext) => MIME_TABLE
            .iter()
            .find(|(_, e)| *e == ext)
            .map(|(m, _)| *m)
            .unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(name: &str, mime: &str, extension: Option<&str>) -> FileMetadata {
        FileMetadata {
            name: name.into(),
            mime_type: mime.into(),
            extension: extension.map(Into::into),
            size: 0,
            thumbnail_size: None,
            source_path: None,
            created_at: Utc::now(),
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_explicit_extension_wins() {
        let m = metadata("photo.png", "image/png", Some("JPG"));
        assert_eq!(resolve_extension(&m), ".jpg");
    }

    #[test]
    fn test_extension_from_name() {
        let m = metadata("report.final.PDF", "text/plain", None);
        assert_eq!(resolve_extension(&m), ".pdf");
    }

    #[test]
    fn test_extension_from_mime() {
        let m = metadata("README", "text/markdown; charset=utf-8", None);
        assert_eq!(resolve_extension(&m), ".md");
    }

    #[test]
    fn test_fallback_extension() {
        let m = metadata("blob", "application/x-unknown", Some(""));
        assert_eq!(resolve_extension(&m), ".dat");
    }

    #[test]
    fn test_layout_paths() {
        let layout = LocalLayout::new("/data");
        assert_eq!(
            layout.decrypted_path("c1", "f1", ".txt"),
            PathBuf::from("/data/files/bin/c1/f1.txt")
        );
        assert_eq!(
            layout.encrypted_path("c1", "f1"),
            PathBuf::from("/data/files/enc/c1/f1.enc")
        );
        assert_eq!(
            layout.encrypted_thumbnail_path("c1", "f1"),
            PathBuf::from("/data/files/thumbs/c1/f1.thumb.enc")
        );
    }

    #[test]
    fn test_mime_from_name() {
        assert_eq!(mime_from_name("a.JPEG"), "image/jpeg");
        assert_eq!(mime_from_name("notes.txt"), "text/plain");
        assert_eq!(mime_from_name("noext"), "application/octet-stream");
        assert_eq!(mime_from_name("x.weird"), "application/octet-stream");
    }
}
