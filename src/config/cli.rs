use crate::core::Storage;
use crate::utils::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem storage. Reads take paths as given (relative to the working
/// directory); writes land under `base_path`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: String,
}

impl LocalStorage {
    pub fn new(base_path: String) -> Self {
        Self { base_path }
    }

    pub fn output_location(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        tracing::debug!("Reading {}", path);
        let data = fs::read(path)?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.output_location(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::debug!("Writing {} bytes to {}", data.len(), full_path.display());
        fs::write(full_path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_under_base_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("out");
        let storage = LocalStorage::new(base.to_str().unwrap().to_string());

        storage.write_file("nested/pred.jsonl", b"{}\n").await.unwrap();
        let written = base.join("nested/pred.jsonl");
        assert!(written.exists());

        let data = storage.read_file(written.to_str().unwrap()).await.unwrap();
        assert_eq!(data, b"{}\n");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let storage = LocalStorage::new("unused".to_string());
        let result = storage.read_file("definitely/not/here.json").await;
        assert!(matches!(result, Err(crate::utils::error::ProbeError::IoError(_))));
    }
}
