use crate::error::IngestError;
use std::fs;
use std::path::{Path, PathBuf};

/// Narrow file-storage collaborator: one folder of PDFs per user. Callers
/// go through the orchestrator so staleness tracking stays correct.
pub trait DocumentStorage: Send + Sync {
    fn user_dir(&self, user: &str) -> PathBuf;

    /// Stored PDF names for the user, sorted. A user with no folder yet has
    /// zero documents.
    fn list_documents(&self, user: &str) -> Result<Vec<String>, IngestError>;

    fn save_document(&self, user: &str, name: &str, bytes: &[u8]) -> Result<PathBuf, IngestError>;

    fn delete_document(&self, user: &str, name: &str) -> Result<(), IngestError>;
}

/// Filesystem storage rooted at one data directory, `root/<user>/<name>`.
pub struct FsDocumentStorage {
    root: PathBuf,
}

impl FsDocumentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rejects names that would escape the user's folder.
    fn checked_component<'a>(value: &'a str, what: &str) -> Result<&'a str, IngestError> {
        let bad =
            value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']);
        if bad {
            return Err(IngestError::InvalidArgument(format!(
                "invalid {what}: {value:?}"
            )));
        }
        Ok(value)
    }
}

impl DocumentStorage for FsDocumentStorage {
    fn user_dir(&self, user: &str) -> PathBuf {
        self.root.join(user)
    }

    fn list_documents(&self, user: &str) -> Result<Vec<String>, IngestError> {
        Self::checked_component(user, "user")?;
        let dir = self.user_dir(user);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.to_ascii_lowercase().ends_with(".pdf") {
                names.push(name);
            }
        }

        names.sort_unstable();
        Ok(names)
    }

    fn save_document(&self, user: &str, name: &str, bytes: &[u8]) -> Result<PathBuf, IngestError> {
        Self::checked_component(user, "user")?;
        Self::checked_component(name, "document name")?;

        let dir = self.user_dir(user);
        fs::create_dir_all(&dir)?;
        let path = dir.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn delete_document(&self, user: &str, name: &str) -> Result<(), IngestError> {
        Self::checked_component(user, "user")?;
        Self::checked_component(name, "document name")?;

        let path = self.user_dir(user).join(name);
        if !path.is_file() {
            return Err(IngestError::Load(format!(
                "document not found: {}",
                path.display()
            )));
        }
        fs::remove_file(&path)?;
        Ok(())
    }
}
