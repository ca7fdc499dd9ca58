//! Staging backends: where relayed bytes rest between download and upload.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::relay::database::Database;
use crate::relay::transfer::ChunkSink;

/// A fully staged payload, ready for delivery.
pub enum StagedBytes {
    Disk(PathBuf),
    Memory(Vec<u8>),
}

impl StagedBytes {
    pub fn len(&self) -> Result<u64, String> {
        match self {
            Self::Disk(path) => fs::metadata(path)
                .map(|m| m.len())
                .map_err(|e| format!("Failed to stat {}: {e}", path.display())),
            Self::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn read_all(&self) -> Result<Vec<u8>, String> {
        match self {
            Self::Disk(path) => {
                fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))
            }
            Self::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    /// Read a byte range, used to carve split-delivery parts. Short reads at
    /// the tail return fewer bytes than requested.
    pub fn read_range(&self, offset: u64, len: u64) -> Result<Vec<u8>, String> {
        match self {
            Self::Disk(path) => {
                let mut file = File::open(path)
                    .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| format!("Failed to seek {}: {e}", path.display()))?;
                let mut buf = Vec::new();
                file.take(len)
                    .read_to_end(&mut buf)
                    .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
                Ok(buf)
            }
            Self::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = (start + len as usize).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            }
        }
    }
}

/// A staging area that chunks stream into. finish seals it for delivery;
/// cleanup discards the staged artifact and is safe to call more than once
/// and on every exit path.
pub trait Staging: ChunkSink {
    fn finish(&mut self) -> Result<StagedBytes, String>;
    fn cleanup(&mut self);
}

impl ChunkSink for Box<dyn Staging> {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
        (**self).write_chunk(chunk)
    }
}

/// Stages onto the local filesystem as `{transfer_id}.part`.
pub struct DiskStaging {
    path: PathBuf,
    file: Option<File>,
    cleaned: bool,
}

impl DiskStaging {
    pub fn create(dir: &std::path::Path, transfer_id: &str) -> Result<Self, String> {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create staging dir {}: {e}", dir.display()))?;
        let path = dir.join(format!("{transfer_id}.part"));
        let file =
            File::create(&path).map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
        debug!("Staging to {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
            cleaned: false,
        })
    }
}

impl ChunkSink for DiskStaging {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
        let file = self.file.as_mut().ok_or("staging file already closed")?;
        file.write_all(chunk)
            .map_err(|e| format!("Failed to write {}: {e}", self.path.display()))
    }
}

impl Staging for DiskStaging {
    fn finish(&mut self) -> Result<StagedBytes, String> {
        if let Some(file) = self.file.take() {
            file.sync_all()
                .map_err(|e| format!("Failed to flush {}: {e}", self.path.display()))?;
        }
        Ok(StagedBytes::Disk(self.path.clone()))
    }

    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        self.file = None;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove staged file {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for DiskStaging {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Stages entirely in memory. Fast, bounded only by the transfer ceiling.
#[derive(Default)]
pub struct MemoryStaging {
    bytes: Vec<u8>,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkSink for MemoryStaging {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }
}

impl Staging for MemoryStaging {
    fn finish(&mut self) -> Result<StagedBytes, String> {
        Ok(StagedBytes::Memory(std::mem::take(&mut self.bytes)))
    }

    fn cleanup(&mut self) {
        self.bytes = Vec::new();
    }
}

/// Stages into the staged_blobs table, one row per chunk.
pub struct SqliteStaging {
    db: Arc<Database>,
    blob_id: String,
    seq: u64,
    cleaned: bool,
}

impl SqliteStaging {
    pub fn new(db: Arc<Database>, transfer_id: &str) -> Self {
        Self {
            db,
            blob_id: transfer_id.to_string(),
            seq: 0,
            cleaned: false,
        }
    }
}

impl ChunkSink for SqliteStaging {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), String> {
        self.db.append_blob_chunk(&self.blob_id, self.seq, chunk)?;
        self.seq += 1;
        Ok(())
    }
}

impl Staging for SqliteStaging {
    fn finish(&mut self) -> Result<StagedBytes, String> {
        Ok(StagedBytes::Memory(self.db.read_blob(&self.blob_id)?))
    }

    fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if let Err(e) = self.db.delete_blob(&self.blob_id) {
            warn!("Failed to delete staged blob {}: {e}", self.blob_id);
        }
    }
}

impl Drop for SqliteStaging {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_staging_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = DiskStaging::create(dir.path(), "t1").unwrap();
        staging.write_chunk(b"hello ").unwrap();
        staging.write_chunk(b"disk").unwrap();

        let staged = staging.finish().unwrap();
        assert_eq!(staged.len().unwrap(), 10);
        assert_eq!(staged.read_all().unwrap(), b"hello disk");

        staging.cleanup();
        assert!(!dir.path().join("t1.part").exists());
    }

    #[test]
    fn test_disk_cleanup_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = DiskStaging::create(dir.path(), "t2").unwrap();
        staging.write_chunk(b"x").unwrap();
        staging.cleanup();
        staging.cleanup();
        assert!(!dir.path().join("t2.part").exists());
    }

    #[test]
    fn test_memory_staging_round_trip() {
        let mut staging = MemoryStaging::new();
        staging.write_chunk(b"in ").unwrap();
        staging.write_chunk(b"memory").unwrap();
        let staged = staging.finish().unwrap();
        assert_eq!(staged.read_all().unwrap(), b"in memory");
    }

    #[test]
    fn test_sqlite_staging_round_trip_and_cleanup() {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut staging = SqliteStaging::new(db.clone(), "t3");
        staging.write_chunk(b"blob ").unwrap();
        staging.write_chunk(b"bytes").unwrap();

        let staged = staging.finish().unwrap();
        assert_eq!(staged.read_all().unwrap(), b"blob bytes");

        staging.cleanup();
        assert!(db.read_blob("t3").unwrap().is_empty());
    }

    #[test]
    fn test_read_range_partial_tail() {
        let staged = StagedBytes::Memory(b"0123456789".to_vec());
        assert_eq!(staged.read_range(0, 4).unwrap(), b"0123");
        assert_eq!(staged.read_range(8, 10).unwrap(), b"89");
        assert_eq!(staged.read_range(20, 5).unwrap(), b"");
    }

    #[test]
    fn test_disk_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = DiskStaging::create(dir.path(), "t4").unwrap();
        staging.write_chunk(b"abcdefgh").unwrap();
        let staged = staging.finish().unwrap();
        assert_eq!(staged.read_range(2, 3).unwrap(), b"cde");
        assert_eq!(staged.read_range(6, 100).unwrap(), b"gh");
    }
}
