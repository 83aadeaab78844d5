use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

/// File-based storage: one file per key.
///
/// Files under `dir`:
/// - `<hex(sha256(key))>.rec`: record bytes
/// - `<hex(sha256(key))>.rec.tmp`: temporary file for atomic writes
///
/// Hashing the key keeps arbitrary feature names out of the file system.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage rooted at the config's kv directory
    pub fn new(config: &Config) -> Self {
        FileStorage {
            dir: config.kv_dir(),
        }
    }

    /// Create FileStorage at a custom directory (for testing)
    pub fn with_dir(dir: PathBuf) -> Self {
        FileStorage { dir }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Path of the record file for `key`
    pub fn record_path(&self, key: &str) -> PathBuf {
        let digest = crate::sha256_digest(key.as_bytes());
        self.dir.join(format!("{}.rec", hex::encode(digest)))
    }

    /// Ensure the storage directory exists
    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::Persistence(format!("Failed to create data directory: {}", e)))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "Failed to open record {}: {}",
                    key, e
                )))
            }
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::Persistence(format!("Failed to read record {}: {}", key, e)))?;
        Ok(Some(data))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir()?;

        let path = self.record_path(key);
        let tmp_path = path.with_extension("rec.tmp");

        let mut file = File::create(&tmp_path)
            .map_err(|e| Error::Persistence(format!("Failed to create temp record: {}", e)))?;
        file.write_all(bytes)
            .map_err(|e| Error::Persistence(format!("Failed to write record {}: {}", key, e)))?;

        // Fsync before rename (crash safety)
        file.sync_all()
            .map_err(|e| Error::Persistence(format!("Failed to fsync temp record: {}", e)))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .map_err(|e| Error::Persistence(format!("Failed to rename temp record: {}", e)))?;

        // Fsync directory so the rename itself is durable
        let dir = File::open(&self.dir)
            .map_err(|e| Error::Persistence(format!("Failed to open data directory: {}", e)))?;
        dir.sync_all()
            .map_err(|e| Error::Persistence(format!("Failed to fsync data directory: {}", e)))?;

        tracing::debug!(key, bytes = bytes.len(), "record saved");
        Ok(())
    }
}
