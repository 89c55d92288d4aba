//! Records row-level changes made by the sync engine and restores
//! deleted records from their snapshots.

use chrono::{Local, Utc};
use log::info;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::audit_errors::{AuditError, Result};
use super::audit_model::{
    AuditAction, AuditFilter, AuditLogEntry, AuditStats, DeletedRecordEntry, NewAuditLogEntry,
    NewDeletedRecord,
};
use super::audit_repository::AuditRepository;
use crate::store::MirrorStore;

/// Session id: run kind, local wall-clock second, short random suffix.
/// Readable in the log and unique enough for concurrent processes.
pub fn new_session_id(sync_type: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        sync_type,
        Local::now().format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

pub struct AuditService {
    repository: AuditRepository,
    store: Arc<MirrorStore>,
}

impl AuditService {
    pub fn new(repository: AuditRepository, store: Arc<MirrorStore>) -> Self {
        Self { repository, store }
    }

    pub fn log_insert(
        &self,
        session_id: &str,
        company: &str,
        table: &str,
        guid: &str,
        new_data: &Map<String, Value>,
    ) -> Result<()> {
        self.repository.append(NewAuditLogEntry {
            session_id: session_id.to_string(),
            company_name: company.to_string(),
            table_name: table.to_string(),
            record_guid: guid.to_string(),
            action: AuditAction::Insert.as_str().to_string(),
            old_data: None,
            new_data: Some(Value::Object(new_data.clone()).to_string()),
            changed_fields: None,
            created_at: Utc::now().naive_utc(),
        })
    }

    pub fn log_update(
        &self,
        session_id: &str,
        company: &str,
        table: &str,
        guid: &str,
        old_data: &Map<String, Value>,
        new_data: &Map<String, Value>,
    ) -> Result<()> {
        let changed = changed_fields(old_data, new_data);
        self.repository.append(NewAuditLogEntry {
            session_id: session_id.to_string(),
            company_name: company.to_string(),
            table_name: table.to_string(),
            record_guid: guid.to_string(),
            action: AuditAction::Update.as_str().to_string(),
            old_data: Some(Value::Object(old_data.clone()).to_string()),
            new_data: Some(Value::Object(new_data.clone()).to_string()),
            changed_fields: Some(serde_json::to_string(&changed)?),
            created_at: Utc::now().naive_utc(),
        })
    }

    /// Record a deletion: the audit entry and the recovery snapshot land
    /// in one transaction.
    pub fn log_delete(
        &self,
        session_id: &str,
        company: &str,
        table: &str,
        guid: &str,
        old_data: &Map<String, Value>,
    ) -> Result<()> {
        let snapshot = Value::Object(old_data.clone()).to_string();
        let now = Utc::now().naive_utc();
        self.repository.append_delete(
            NewAuditLogEntry {
                session_id: session_id.to_string(),
                company_name: company.to_string(),
                table_name: table.to_string(),
                record_guid: guid.to_string(),
                action: AuditAction::Delete.as_str().to_string(),
                old_data: Some(snapshot.clone()),
                new_data: None,
                changed_fields: None,
                created_at: now,
            },
            NewDeletedRecord {
                session_id: session_id.to_string(),
                company_name: company.to_string(),
                table_name: table.to_string(),
                record_guid: guid.to_string(),
                record_data: snapshot,
                deleted_at: now,
                is_restored: false,
            },
        )
    }

    /// Write a deletion snapshot back into the mirrored table.
    ///
    /// Each snapshot can be restored exactly once; a second attempt fails
    /// with [`AuditError::AlreadyRestored`] instead of clobbering whatever
    /// has happened to the record since.
    pub fn restore(&self, deleted_id: i32) -> Result<DeletedRecordEntry> {
        let snapshot = self.repository.get_deleted(deleted_id)?;
        if snapshot.is_restored {
            return Err(AuditError::AlreadyRestored(deleted_id));
        }

        let data: Map<String, Value> = serde_json::from_str(&snapshot.record_data)?;
        self.store
            .insert_json_row(&snapshot.table_name, &snapshot.company_name, &data)?;
        self.repository.mark_restored(deleted_id)?;

        self.repository.append(NewAuditLogEntry {
            session_id: new_session_id("restore"),
            company_name: snapshot.company_name.clone(),
            table_name: snapshot.table_name.clone(),
            record_guid: snapshot.record_guid.clone(),
            action: AuditAction::Restore.as_str().to_string(),
            old_data: None,
            new_data: Some(snapshot.record_data.clone()),
            changed_fields: None,
            created_at: Utc::now().naive_utc(),
        })?;

        info!(
            "Restored {}/{} guid {} from snapshot {}",
            snapshot.company_name, snapshot.table_name, snapshot.record_guid, deleted_id
        );
        self.repository.get_deleted(deleted_id)
    }

    pub fn history(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        self.repository.history(filter)
    }

    pub fn deleted(
        &self,
        company: &str,
        table: Option<&str>,
        include_restored: bool,
    ) -> Result<Vec<DeletedRecordEntry>> {
        self.repository.deleted(company, table, include_restored)
    }

    pub fn stats(&self, company: &str) -> Result<AuditStats> {
        self.repository.stats(company)
    }
}

/// Names of the fields whose values differ, sorted for stable output.
fn changed_fields(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<String> {
    let mut changed: Vec<String> = new
        .iter()
        .filter(|(name, value)| old.get(*name) != Some(value))
        .map(|(name, _)| name.clone())
        .collect();
    for name in old.keys() {
        if !new.contains_key(name) {
            changed.push(name.clone());
        }
    }
    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRepository;
    use crate::db;
    use crate::mapping::MappingSet;
    use crate::protocol::{FieldValue, ParsedRow};
    use serde_json::json;
    use tempfile::TempDir;

    fn service() -> (AuditService, Arc<MirrorStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("audit.db");
        let db_path = db_path.to_str().unwrap();
        db::init(db_path).unwrap();
        let pool = db::create_pool(db_path).unwrap();
        db::run_migrations(&pool).unwrap();

        let store = Arc::new(MirrorStore::open_in_memory().unwrap());
        let service = AuditService::new(AuditRepository::new(pool), store.clone());
        (service, store, dir)
    }

    fn ledger_mapping() -> MappingSet {
        MappingSet::from_json(
            r#"{"master": [{
                "name": "mst_ledger", "collection": "Ledger", "nature": "Primary",
                "fields": [
                    {"name": "guid", "field": "Guid"},
                    {"name": "alterid", "field": "AlterId", "type": "number"},
                    {"name": "name", "field": "Name"}
                ]
            }]}"#,
        )
        .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn session_ids_carry_type_and_are_unique() {
        let a = new_session_id("incremental");
        let b = new_session_id("incremental");
        assert!(a.starts_with("incremental_"));
        assert_ne!(a, b);
    }

    #[test]
    fn update_records_changed_fields() {
        let (service, _store, _dir) = service();
        let old = object(json!({"guid": "g-1", "alterid": 1, "name": "Cash"}));
        let new = object(json!({"guid": "g-1", "alterid": 2, "name": "Petty Cash"}));
        service
            .log_update("s-1", "Acme", "mst_ledger", "g-1", &old, &new)
            .unwrap();

        let history = service
            .history(&AuditFilter {
                company: Some("Acme".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, "UPDATE");
        let changed: Vec<String> =
            serde_json::from_str(history[0].changed_fields.as_deref().unwrap()).unwrap();
        assert_eq!(changed, vec!["alterid".to_string(), "name".to_string()]);
    }

    #[test]
    fn delete_then_restore_round_trip() {
        let (service, store, _dir) = service();
        let set = ledger_mapping();
        let ledger = &set.master[0];
        store.ensure_schema(ledger).unwrap();
        store
            .upsert_rows(
                ledger,
                "Acme",
                &[ParsedRow::from_pairs(vec![
                    ("guid".into(), FieldValue::Text("g-1".into())),
                    ("alterid".into(), FieldValue::Integer(4)),
                    ("name".into(), FieldValue::Text("Cash".into())),
                ])],
            )
            .unwrap();

        let snapshot = store.read_row(ledger, "Acme", "g-1").unwrap().unwrap();
        store
            .delete_rows(ledger, "Acme", &["g-1".to_string()])
            .unwrap();
        service
            .log_delete("s-1", "Acme", "mst_ledger", "g-1", &snapshot)
            .unwrap();
        assert_eq!(store.count(ledger, "Acme").unwrap(), 0);

        let pending = service.deleted("Acme", None, false).unwrap();
        assert_eq!(pending.len(), 1);

        let restored = service.restore(pending[0].id).unwrap();
        assert!(restored.is_restored);
        assert_eq!(store.count(ledger, "Acme").unwrap(), 1);
        assert_eq!(
            store.current_keys(ledger, "Acme").unwrap().get("g-1"),
            Some(&4)
        );

        // Restored snapshots drop out of the pending list but stay queryable.
        assert!(service.deleted("Acme", None, false).unwrap().is_empty());
        assert_eq!(service.deleted("Acme", None, true).unwrap().len(), 1);
    }

    #[test]
    fn second_restore_is_rejected() {
        let (service, store, _dir) = service();
        let set = ledger_mapping();
        store.ensure_schema(&set.master[0]).unwrap();

        let snapshot = object(json!({"guid": "g-1", "alterid": 1, "name": "Cash"}));
        service
            .log_delete("s-1", "Acme", "mst_ledger", "g-1", &snapshot)
            .unwrap();
        let pending = service.deleted("Acme", None, false).unwrap();

        service.restore(pending[0].id).unwrap();
        assert!(matches!(
            service.restore(pending[0].id),
            Err(AuditError::AlreadyRestored(_))
        ));
    }

    #[test]
    fn stats_count_per_action() {
        let (service, _store, _dir) = service();
        let data = object(json!({"guid": "g-1", "alterid": 1}));
        service
            .log_insert("s-1", "Acme", "mst_ledger", "g-1", &data)
            .unwrap();
        service
            .log_insert("s-1", "Acme", "mst_ledger", "g-2", &data)
            .unwrap();
        service
            .log_delete("s-1", "Acme", "mst_ledger", "g-1", &data)
            .unwrap();

        let stats = service.stats("Acme").unwrap();
        assert_eq!(stats.inserts, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.updates, 0);
    }
}
