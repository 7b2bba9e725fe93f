//! Filesystem blob store for voice-note audio.
//!
//! Objects are keyed `{ticket_id}/{timestamp}-{field}.wav` and referenced by
//! URL from the `voice_notes` table. Removal is best-effort: callers log and
//! continue when a blob is already gone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// URL prefix under which stored blobs are served back out.
pub const VOICE_NOTE_URL_PREFIX: &str = "/api/voice-notes";

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub file_name: String,
    pub url: String,
}

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create blob store at {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist a voice note under `{ticket_id}/{timestamp}-{field}.wav`.
    pub fn store_voice_note(
        &self,
        ticket_id: i64,
        field: &str,
        bytes: &[u8],
    ) -> Result<StoredBlob> {
        let file_name = format!(
            "{}-{}.wav",
            chrono::Utc::now().timestamp_millis(),
            sanitize(field)
        );
        let dir = self.root.join(ticket_id.to_string());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(&file_name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(StoredBlob {
            url: format!("{}/{}/{}", VOICE_NOTE_URL_PREFIX, ticket_id, file_name),
            file_name,
        })
    }

    /// Remove one stored blob. Missing files are not an error.
    pub fn remove(&self, ticket_id: i64, file_name: &str) -> Result<()> {
        if file_name.contains("..") || file_name.contains('/') {
            anyhow::bail!("Invalid blob file name: {}", file_name);
        }
        let path = self.root.join(ticket_id.to_string()).join(file_name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Resolve a relative `ticket_id/file` path to an on-disk path, rejecting
    /// traversal.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        if rel.contains("..") || rel.starts_with('/') {
            return None;
        }
        let path = self.root.join(rel);
        path.is_file().then_some(path)
    }
}

/// Strip path separators from client-supplied name fragments.
fn sanitize(fragment: &str) -> String {
    fragment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("voice-notes")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_and_resolve() {
        let (_dir, store) = store();
        let blob = store.store_voice_note(7, "voice_note_0", b"RIFF").unwrap();
        assert!(blob.url.starts_with("/api/voice-notes/7/"));
        assert!(blob.file_name.ends_with("-voice_note_0.wav"));

        let rel = format!("7/{}", blob.file_name);
        let path = store.resolve(&rel).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"RIFF");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        let blob = store.store_voice_note(3, "voice_note_0", b"x").unwrap();
        store.remove(3, &blob.file_name).unwrap();
        // Second removal of a gone file succeeds silently.
        store.remove(3, &blob.file_name).unwrap();
        assert!(store.resolve(&format!("3/{}", blob.file_name)).is_none());
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (_dir, store) = store();
        assert!(store.resolve("../etc/passwd").is_none());
        assert!(store.resolve("/etc/passwd").is_none());
        assert!(store.resolve("7/../../x.wav").is_none());
    }

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("voice_note_0"), "voice_note_0");
        assert_eq!(sanitize("a/b\\c"), "abc");
    }

    #[test]
    fn test_remove_rejects_traversal_names() {
        let (_dir, store) = store();
        assert!(store.remove(1, "../secret.wav").is_err());
        assert!(store.remove(1, "a/b.wav").is_err());
    }
}
