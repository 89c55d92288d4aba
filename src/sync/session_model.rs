use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::sync_sessions;

/// Which kind of run a session was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Incremental,
    Full,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Incremental => "incremental",
            SyncType::Full => "full",
        }
    }
}

/// Terminal and non-terminal session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Row counts accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCounts {
    pub inserted: i32,
    pub updated: i32,
    pub deleted: i32,
}

impl SyncCounts {
    pub fn add(&mut self, other: SyncCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

/// One recorded sync run.
#[derive(Queryable, Identifiable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = sync_sessions)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub id: String,
    pub company_name: String,
    pub sync_type: String,
    pub status: String,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub records_inserted: i32,
    pub records_updated: i32,
    pub records_deleted: i32,
    pub error_message: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = sync_sessions)]
pub struct NewSyncSession {
    pub id: String,
    pub company_name: String,
    pub sync_type: String,
    pub status: String,
    pub started_at: NaiveDateTime,
}

/// What a caller gets back from a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub session_id: String,
    pub company_name: String,
    pub sync_type: SyncType,
    pub status: SessionStatus,
    pub counts: SyncCounts,
    /// True when the alter-id probe showed nothing changed and the run
    /// ended without fetching any table.
    pub up_to_date: bool,
}
