use std::io;
use std::path::{Path, PathBuf};

use rocket::fs::TempFile;

use crate::error::AppError;

/// The upload directory. Storage keys are plain file names generated by the
/// document lifecycle; they never contain path separators.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, storage_key: &str) -> PathBuf {
        self.root.join(storage_key)
    }

    pub async fn save(&self, storage_key: &str, content: &[u8]) -> Result<(), AppError> {
        tokio::fs::write(self.path_for(storage_key), content).await?;
        Ok(())
    }

    pub async fn save_temp_file(
        &self,
        storage_key: &str,
        file: &mut TempFile<'_>,
    ) -> Result<(), AppError> {
        file.copy_to(self.path_for(storage_key)).await?;
        Ok(())
    }

    pub async fn read(&self, storage_key: &str) -> Result<Vec<u8>, AppError> {
        Ok(tokio::fs::read(self.path_for(storage_key)).await?)
    }

    pub async fn remove(&self, storage_key: &str) -> io::Result<()> {
        tokio::fs::remove_file(self.path_for(storage_key)).await
    }

    pub async fn exists(&self, storage_key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(storage_key))
            .await
            .unwrap_or(false)
    }

    pub async fn list_keys(&self) -> Result<Vec<String>, AppError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }
}
