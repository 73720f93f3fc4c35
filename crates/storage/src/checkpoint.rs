// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable state file writes with optional zstd compression.
//!
//! A checkpoint is written to `<path>.tmp`, fsynced, renamed over the state
//! file, and the directory is fsynced so the rename survives a crash. Readers
//! therefore observe either the previous or the new document, never a mix.
//!
//! The `CheckpointWriter` trait abstracts all I/O operations, enabling
//! deterministic unit tests and error injection.

use crate::error::StateError;
use crate::migration::MigrationRegistry;
use crate::state::{StateData, CURRENT_FORMAT_VERSION};
use serde_json::Value;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// zstd frame magic number, used to detect compressed state files.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Errors from checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("checkpoint failed after {attempts} attempts: {last}")]
    Failed { attempts: u32, last: String },
}

/// Result of a completed checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointResult {
    /// Size of the written state file in bytes
    pub size_bytes: u64,
}

/// Trait abstracting checkpoint I/O for testability.
pub trait CheckpointWriter: Send + Sync + 'static {
    /// Write data to a temporary file.
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), CheckpointError>;

    /// Fsync a file to ensure data is durable.
    fn fsync_file(&self, path: &Path) -> Result<(), CheckpointError>;

    /// Atomically rename tmp file to final path.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), CheckpointError>;

    /// Fsync directory to make rename durable.
    fn fsync_dir(&self, path: &Path) -> Result<(), CheckpointError>;
}

/// Production checkpoint writer using real filesystem operations.
///
/// State files are created owner-readable only (mode 0600).
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCheckpointWriter;

impl CheckpointWriter for FsCheckpointWriter {
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), CheckpointError> {
        let file = File::open(path)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), CheckpointError> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), CheckpointError> {
        let dir = File::open(path)?;
        dir.sync_all()?;
        Ok(())
    }
}

/// Writes encoded state documents to the state file.
pub struct Checkpointer<W: CheckpointWriter = FsCheckpointWriter> {
    writer: W,
    path: PathBuf,
    compression_level: Option<i32>,
}

impl Checkpointer<FsCheckpointWriter> {
    /// Create a new checkpointer with default filesystem writer.
    pub fn new(path: PathBuf) -> Self {
        Self::with_writer(FsCheckpointWriter, path)
    }
}

impl<W: CheckpointWriter> Checkpointer<W> {
    /// Create a checkpointer with a custom writer (for testing).
    pub fn with_writer(writer: W, path: PathBuf) -> Self {
        Self {
            writer,
            path,
            compression_level: Some(3),
        }
    }

    /// Set the zstd compression level (1-22), or `None` to write plain JSON.
    pub fn with_compression_level(mut self, level: Option<i32>) -> Self {
        self.compression_level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably replace the state file with `json`.
    pub fn checkpoint(&self, json: &[u8]) -> Result<CheckpointResult, CheckpointError> {
        let tmp_path = self.path.with_extension("tmp");

        let payload = match self.compression_level {
            Some(level) => zstd::encode_all(json, level)
                .map_err(|e| CheckpointError::Compress(e.to_string()))?,
            None => json.to_vec(),
        };

        self.writer.write_tmp(&tmp_path, &payload)?;
        self.writer.fsync_file(&tmp_path)?;
        self.writer.rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            self.writer.fsync_dir(parent)?;
        }

        Ok(CheckpointResult {
            size_bytes: payload.len() as u64,
        })
    }
}

/// Decode a state document, decompressing and migrating as needed.
pub fn decode_state(bytes: &[u8]) -> Result<StateData, StateError> {
    let json = if bytes.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(bytes).map_err(|e| StateError::Read(e.to_string()))?
    } else {
        bytes.to_vec()
    };
    let value: Value = serde_json::from_slice(&json).map_err(|e| StateError::Read(e.to_string()))?;

    let registry = MigrationRegistry::state_document();
    let migrated = registry.migrate_to(value, CURRENT_FORMAT_VERSION)?;
    let mut data: StateData =
        serde_json::from_value(migrated).map_err(|e| StateError::Read(e.to_string()))?;
    data.seed_change_updates();
    Ok(data)
}

/// Read a state document from `reader`.
pub fn read_state(mut reader: impl Read) -> Result<StateData, StateError> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| StateError::Read(e.to_string()))?;
    decode_state(&bytes)
}

/// Load the state file, or `None` if it does not exist yet.
pub fn load_state(path: &Path) -> Result<Option<StateData>, StateError> {
    match File::open(path) {
        Ok(file) => read_state(file).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::Read(e.to_string())),
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
