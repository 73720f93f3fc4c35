// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

/// Renames a top-level key, moving the document one version forward.
struct RenameKey {
    from: u32,
    old: &'static str,
    new: &'static str,
}

impl Migration for RenameKey {
    fn source_version(&self) -> u32 {
        self.from
    }

    fn target_version(&self) -> u32 {
        self.from + 1
    }

    fn migrate(&self, document: &mut Value) -> Result<(), MigrationError> {
        let obj = document.as_object_mut().ok_or(MigrationError::Failed {
            from: self.from,
            to: self.from + 1,
            reason: "document is not an object".into(),
        })?;
        if let Some(v) = obj.remove(self.old) {
            obj.insert(self.new.into(), v);
        }
        Ok(())
    }
}

#[test]
fn same_version_is_untouched() {
    let registry = MigrationRegistry::new();
    let doc = json!({"v": 1, "data": {}});
    assert_eq!(registry.migrate_to(doc.clone(), 1).unwrap(), doc);
}

#[test]
fn migrations_chain_to_target() {
    let mut registry = MigrationRegistry::new();
    registry.register(Box::new(RenameKey { from: 2, old: "b", new: "c" }));
    registry.register(Box::new(RenameKey { from: 1, old: "a", new: "b" }));

    let migrated = registry.migrate_to(json!({"a": 5}), 3).unwrap();
    assert_eq!(migrated, json!({"v": 3, "c": 5}));
}

#[test]
fn newer_document_cannot_be_downgraded() {
    let registry = MigrationRegistry::new();
    let err = registry.migrate_to(json!({"v": 4}), 1).unwrap_err();
    assert!(matches!(err, MigrationError::TooNew(4, 1)));
    assert!(err.to_string().starts_with("cannot downgrade"));
}

#[test]
fn missing_step_is_reported() {
    let mut registry = MigrationRegistry::new();
    registry.register(Box::new(RenameKey { from: 1, old: "a", new: "b" }));
    let err = registry.migrate_to(json!({"v": 1}), 3).unwrap_err();
    assert!(matches!(err, MigrationError::NoPath(2, 3)));
}

#[test]
fn failing_migration_surfaces_error() {
    let mut registry = MigrationRegistry::new();
    registry.register(Box::new(RenameKey { from: 1, old: "a", new: "b" }));
    let err = registry.migrate_to(json!([1, 2]), 2).unwrap_err();
    assert!(matches!(err, MigrationError::Failed { from: 1, to: 2, .. }));
}

#[test]
fn version_one_documents_gain_notices() {
    let registry = MigrationRegistry::state_document();
    let migrated = registry
        .migrate_to(json!({"v": 1, "last-lane-id": 2, "data": {}}), 2)
        .unwrap();
    assert_eq!(
        migrated,
        json!({"v": 2, "last-lane-id": 2, "data": {}, "notices": [], "last-notice-id": 0})
    );
}

#[test]
fn missing_lane_counter_is_rebuilt_from_tasks() {
    let registry = MigrationRegistry::state_document();
    let doc = json!({
        "tasks": {
            "1": {"lanes": [3]},
            "2": {"lanes": [1, 5]},
            "3": {},
        }
    });
    let migrated = registry.migrate_to(doc, 2).unwrap();
    assert_eq!(migrated["v"], 2);
    assert_eq!(migrated["last-lane-id"], 5);
}
