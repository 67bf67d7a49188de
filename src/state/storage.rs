// File system operations for stored assets and per-job working directories
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to get app data directory")]
    NoAppDataDir,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Platform data directory for the app, e.g. ~/.local/share/vocal-notes
pub fn default_data_dir() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or(StorageError::NoAppDataDir)?;
    Ok(data_dir.join("vocal-notes"))
}

/// Directory holding the stored assets of one analysis
pub fn analysis_dir(data_dir: &Path, analysis_id: &Uuid) -> StorageResult<PathBuf> {
    let dir = data_dir.join("analyses").join(analysis_id.to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Scratch directory for one job (fetched source, separator output, trace)
pub fn job_dir(data_dir: &Path, job_id: &Uuid) -> StorageResult<PathBuf> {
    let dir = data_dir.join("jobs").join(job_id.to_string());
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove a job's scratch directory and trace, if present
pub fn remove_job_dir(data_dir: &Path, job_id: &Uuid) -> StorageResult<()> {
    let dir = data_dir.join("jobs").join(job_id.to_string());
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Write an asset for an analysis and return its path and SHA256 hash
pub fn store_file(
    data_dir: &Path,
    analysis_id: &Uuid,
    filename: &str,
    data: &[u8],
) -> StorageResult<(PathBuf, String)> {
    let file_path = analysis_dir(data_dir, analysis_id)?.join(filename);
    fs::write(&file_path, data)?;
    Ok((file_path, calculate_sha256(data)))
}

/// Remove an analysis directory and everything in it, if present
pub fn remove_analysis_files(data_dir: &Path, analysis_id: &Uuid) -> StorageResult<()> {
    let dir = data_dir.join("analyses").join(analysis_id.to_string());
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_calculate_sha256() {
        assert_eq!(
            calculate_sha256(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_store_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();

        let (path, hash) = store_file(temp_dir.path(), &id, "vocals.wav", b"abc").unwrap();
        assert!(path.ends_with(format!("analyses/{}/vocals.wav", id)));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
        assert_eq!(hash, calculate_sha256(b"abc"));

        remove_analysis_files(temp_dir.path(), &id).unwrap();
        assert!(!path.exists());
        // Second removal is a no-op
        remove_analysis_files(temp_dir.path(), &id).unwrap();
    }

    #[test]
    fn test_job_dir_created() {
        let temp_dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let dir = job_dir(temp_dir.path(), &id).unwrap();
        assert!(dir.is_dir());

        fs::write(dir.join("trace.jsonl"), b"{}").unwrap();
        remove_job_dir(temp_dir.path(), &id).unwrap();
        assert!(!dir.exists());
        remove_job_dir(temp_dir.path(), &id).unwrap();
    }
}
