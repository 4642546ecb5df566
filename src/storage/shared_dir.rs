use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use crate::utils::{P2PError, Result};

pub const MAX_FILENAME_LEN: usize = 255;

/// Reject anything that is not a single plain path component.
///
/// Shared names travel in newline-terminated transfer requests and are joined
/// onto the shared root, so separators, control characters and dot entries
/// are refused.
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(P2PError::ValidationError("empty filename".to_string()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(P2PError::ValidationError(format!(
            "filename longer than {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(P2PError::ValidationError(format!("invalid filename '{}'", name)));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(P2PError::ValidationError(format!(
            "filename '{}' contains a separator or control character",
            name.escape_debug()
        )));
    }
    Ok(())
}

/// A plain directory of files this peer offers to others.
#[derive(Debug, Clone)]
pub struct SharedFiles {
    root: PathBuf,
}

impl SharedFiles {
    pub async fn new(root: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&root)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to create {:?}: {}", root, e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the regular files directly under the root, sorted.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut entries = async_fs::read_dir(&self.root)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to read directory: {}", e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_filename(&name).is_ok() => files.push(name),
                Ok(name) => debug!("Skipping unshareable name {:?}", name),
                Err(raw) => warn!("Skipping non UTF-8 filename {:?}", raw),
            }
        }

        files.sort();
        debug!("Found {} shareable files in {:?}", files.len(), self.root);
        Ok(files)
    }

    /// Path of `name` if it is a valid name for an existing regular file.
    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        validate_filename(name).ok()?;
        let path = self.root.join(name);
        match async_fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// Copy an outside file into the shared root, returning its shared name.
    pub async fn import(&self, source: &Path) -> Result<String> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| P2PError::ValidationError(format!("no usable filename in {:?}", source)))?
            .to_string();
        validate_filename(&name)?;

        let dest = self.root.join(&name);
        async_fs::copy(source, &dest)
            .await
            .map_err(|e| P2PError::IoError(format!("Failed to copy {:?}: {}", source, e)))?;

        info!("Copied {:?} into shared directory as {}", source, name);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("notes.txt").is_ok());
        assert!(validate_filename("with space.tar.gz").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("dir/file").is_err());
        assert!(validate_filename("dir\\file").is_err());
        assert!(validate_filename("line\nbreak").is_err());
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_list_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedFiles::new(dir.path().join("shared")).await.unwrap();
        std::fs::write(shared.root().join("b.txt"), b"b").unwrap();
        std::fs::write(shared.root().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(shared.root().join("subdir")).unwrap();

        assert_eq!(shared.list_files().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert!(shared.resolve("a.txt").await.is_some());
        assert!(shared.resolve("missing.txt").await.is_none());
        assert!(shared.resolve("subdir").await.is_none());
        assert!(shared.resolve("../shared/a.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_import_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.pdf");
        std::fs::write(&source, b"%PDF").unwrap();

        let shared = SharedFiles::new(dir.path().join("shared")).await.unwrap();
        let name = shared.import(&source).await.unwrap();
        assert_eq!(name, "report.pdf");
        assert_eq!(std::fs::read(shared.root().join("report.pdf")).unwrap(), b"%PDF");
    }
}
