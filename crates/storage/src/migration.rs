// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State document migrations for format evolution.
//!
//! Migrations transform the document JSON from one format version to the
//! next, before it is decoded. The registry chains them to reach the current
//! version. Migration happens in memory; the file on disk is only replaced by
//! the next successful checkpoint, so a failed migration leaves it untouched.

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during migration
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration v{from}→v{to} failed: {reason}")]
    Failed { from: u32, to: u32, reason: String },
    #[error("no supported migration from v{0} to v{1}")]
    NoPath(u32, u32),
    #[error("cannot downgrade: state version {0} is newer than supported ({1})")]
    TooNew(u32, u32),
}

/// A migration from one format version to the next.
pub trait Migration: Send + Sync {
    fn source_version(&self) -> u32;
    fn target_version(&self) -> u32;
    fn migrate(&self, document: &mut Value) -> Result<(), MigrationError>;
}

/// Registry of migrations for upgrading state documents.
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    /// Registry without migrations.
    pub fn new() -> Self {
        Self {
            migrations: Vec::new(),
        }
    }

    /// Registry holding every migration of the state document.
    pub fn state_document() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(NoticesV2));
        registry
    }

    pub fn register(&mut self, migration: Box<dyn Migration>) {
        self.migrations.push(migration);
    }

    /// Migrate a document to the target version.
    pub fn migrate_to(&self, mut document: Value, target: u32) -> Result<Value, MigrationError> {
        let current = document
            .get("v")
            .and_then(|v| v.as_u64())
            .map_or(1, |v| u32::try_from(v).unwrap_or(u32::MAX));

        if current == target {
            return Ok(document);
        }
        if current > target {
            return Err(MigrationError::TooNew(current, target));
        }

        let mut version = current;
        while version < target {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.source_version() == version)
                .ok_or(MigrationError::NoPath(version, target))?;

            migration.migrate(&mut document)?;
            version = migration.target_version();

            if let Some(obj) = document.as_object_mut() {
                obj.insert("v".into(), version.into());
            }
        }
        Ok(document)
    }
}

/// Version 2 adds notices. Version 1 documents written before the lane
/// counter was persisted get it back from the lanes their tasks joined.
struct NoticesV2;

impl Migration for NoticesV2 {
    fn source_version(&self) -> u32 {
        1
    }

    fn target_version(&self) -> u32 {
        2
    }

    fn migrate(&self, document: &mut Value) -> Result<(), MigrationError> {
        let obj = document.as_object_mut().ok_or(MigrationError::Failed {
            from: 1,
            to: 2,
            reason: "document is not an object".into(),
        })?;
        obj.entry("notices").or_insert_with(|| Value::Array(Vec::new()));
        obj.entry("last-notice-id").or_insert_with(|| 0.into());

        if !obj.contains_key("last-lane-id") {
            let max_lane = obj
                .get("tasks")
                .and_then(Value::as_object)
                .into_iter()
                .flat_map(|tasks| tasks.values())
                .filter_map(|task| task.get("lanes").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_u64)
                .max()
                .unwrap_or(0);
            obj.insert("last-lane-id".into(), max_lane.into());
        }
        Ok(())
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
