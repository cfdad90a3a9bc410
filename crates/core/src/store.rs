use crate::error::IndexError;
use crate::index::{FlatIndex, IndexHeader};
use crate::models::MetadataRecord;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const METADATA_FILE_NAME: &str = "metadata.json";

/// `metadata.json` in the same directory as `index_path`.
pub fn metadata_path_for(index_path: &Path) -> PathBuf {
    match index_path.parent() {
        Some(parent) => parent.join(METADATA_FILE_NAME),
        None => PathBuf::from(METADATA_FILE_NAME),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Writes `bytes` to a temporary sibling of `path` and renames it into place,
/// so readers see either the previous file or the complete new one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|error| IndexError::io(parent, error))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| IndexError::format(path, "path has no file name"))?;
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    fs::write(&temp_path, bytes).map_err(|error| IndexError::io(&temp_path, error))?;
    if let Err(error) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(IndexError::io(path, error));
    }

    Ok(())
}

/// Serializes the metadata array and returns the SHA-256 of the written bytes.
pub fn write_metadata(path: &Path, records: &[MetadataRecord]) -> Result<String, IndexError> {
    let bytes = serde_json::to_vec(records)?;
    atomic_write(path, &bytes)?;
    Ok(sha256_hex(&bytes))
}

/// Reads the metadata array, returning the records and the SHA-256 of the file.
pub fn read_metadata(path: &Path) -> Result<(Vec<MetadataRecord>, String), IndexError> {
    let bytes = fs::read(path).map_err(|error| IndexError::io(path, error))?;
    let records: Vec<MetadataRecord> = serde_json::from_slice(&bytes)
        .map_err(|error| IndexError::format(path, format!("bad metadata: {error}")))?;
    Ok((records, sha256_hex(&bytes)))
}

/// Persists a matched index/metadata pair. Metadata goes first so the index,
/// which records the metadata checksum, is the last file to appear.
pub fn save_index_pair(
    index_path: &Path,
    index: &FlatIndex,
    records: &[MetadataRecord],
) -> Result<IndexHeader, IndexError> {
    if records.len() != index.len() {
        return Err(IndexError::Mismatch(format!(
            "{} metadata records for {} vectors",
            records.len(),
            index.len()
        )));
    }

    let metadata_sha256 = write_metadata(&metadata_path_for(index_path), records)?;
    index.save(index_path, Some(metadata_sha256))
}
