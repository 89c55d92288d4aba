use serde::{Deserialize, Serialize};

use crate::protocol::Period;
use crate::sync::SyncType;

/// Lifecycle of one queued company sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

/// One queued task: sync this company, this way.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub company_name: String,
    pub sync_type: SyncType,
    pub period: Period,
    pub status: QueueStatus,
    pub error_message: Option<String>,
}
