use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{audit_log, deleted_records};

/// Row-level change kinds recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
    Restore,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Insert => "INSERT",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Restore => "RESTORE",
        }
    }
}

/// One recorded change to one mirrored record.
#[derive(Queryable, Identifiable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = audit_log)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: i32,
    pub session_id: String,
    pub company_name: String,
    pub table_name: String,
    pub record_guid: String,
    pub action: String,
    pub old_data: Option<String>,
    pub new_data: Option<String>,
    pub changed_fields: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = audit_log)]
pub struct NewAuditLogEntry {
    pub session_id: String,
    pub company_name: String,
    pub table_name: String,
    pub record_guid: String,
    pub action: String,
    pub old_data: Option<String>,
    pub new_data: Option<String>,
    pub changed_fields: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Full-row snapshot of a deleted record, kept for recovery.
#[derive(Queryable, Identifiable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = deleted_records)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRecordEntry {
    pub id: i32,
    pub session_id: String,
    pub company_name: String,
    pub table_name: String,
    pub record_guid: String,
    pub record_data: String,
    pub deleted_at: NaiveDateTime,
    pub is_restored: bool,
    pub restored_at: Option<NaiveDateTime>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = deleted_records)]
pub struct NewDeletedRecord {
    pub session_id: String,
    pub company_name: String,
    pub table_name: String,
    pub record_guid: String,
    pub record_data: String,
    pub deleted_at: NaiveDateTime,
    pub is_restored: bool,
}

/// Optional narrowing of an audit history query.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub company: Option<String>,
    pub table: Option<String>,
    pub record_guid: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<i64>,
}

/// Per-action counts over one company's audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub inserts: i64,
    pub updates: i64,
    pub deletes: i64,
    pub restores: i64,
}
