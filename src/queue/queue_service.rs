//! Serial FIFO queue over the sync service.
//!
//! Multiple companies are synced one after another on a single worker
//! task; a failure marks its own entry failed and the worker moves on,
//! so one broken company never blocks the rest of the batch.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use super::queue_model::{QueueEntry, QueueStatus};
use crate::protocol::Period;
use crate::sync::{SyncError, SyncService, SyncType};

pub struct SyncQueueService {
    service: Arc<SyncService>,
    inner: Arc<Mutex<QueueInner>>,
}

#[derive(Default)]
struct QueueInner {
    entries: Vec<QueueEntry>,
    worker_active: bool,
    cancel_requested: bool,
}

impl SyncQueueService {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self {
            service,
            inner: Arc::new(Mutex::new(QueueInner::default())),
        }
    }

    /// Append one entry per company and make sure the worker is running.
    /// Returns the queue ids in enqueue order.
    pub fn enqueue(
        &self,
        companies: &[String],
        sync_type: SyncType,
        period: Period,
    ) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = companies
            .iter()
            .map(|company| {
                let id = uuid::Uuid::new_v4().to_string();
                inner.entries.push(QueueEntry {
                    id: id.clone(),
                    company_name: company.clone(),
                    sync_type,
                    period,
                    status: QueueStatus::Pending,
                    error_message: None,
                });
                id
            })
            .collect();
        info!("Queued {} sync task(s)", ids.len());

        if !inner.worker_active && !ids.is_empty() {
            inner.worker_active = true;
            tokio::spawn(worker(self.service.clone(), self.inner.clone()));
        }
        ids
    }

    /// Cancel the whole queue: pending entries are marked cancelled
    /// immediately and the in-flight run gets its cancellation token set.
    pub fn cancel(&self) {
        let running = {
            let mut inner = self.inner.lock().unwrap();
            inner.cancel_requested = true;
            for entry in &mut inner.entries {
                if entry.status == QueueStatus::Pending {
                    entry.status = QueueStatus::Cancelled;
                }
            }
            inner
                .entries
                .iter()
                .find(|e| e.status == QueueStatus::Running)
                .map(|e| e.company_name.clone())
        };
        if let Some(company) = running {
            warn!("Cancelling in-flight sync for '{}'", company);
            self.service.cancel(&company);
        }
    }

    /// Drop finished entries. Refused while anything is pending or
    /// running; returns whether the queue was cleared.
    pub fn clear(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.worker_active || inner.entries.iter().any(|e| !e.status.is_terminal()) {
            return false;
        }
        inner.entries.clear();
        true
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.inner.lock().unwrap().entries.clone()
    }

    pub fn is_idle(&self) -> bool {
        !self.inner.lock().unwrap().worker_active
    }
}

async fn worker(service: Arc<SyncService>, inner: Arc<Mutex<QueueInner>>) {
    loop {
        let next = {
            let mut inner = inner.lock().unwrap();
            if inner.cancel_requested {
                for entry in &mut inner.entries {
                    if entry.status == QueueStatus::Pending {
                        entry.status = QueueStatus::Cancelled;
                    }
                }
            }
            match inner
                .entries
                .iter_mut()
                .find(|e| e.status == QueueStatus::Pending)
            {
                Some(entry) => {
                    entry.status = QueueStatus::Running;
                    Some((
                        entry.id.clone(),
                        entry.company_name.clone(),
                        entry.sync_type,
                        entry.period,
                    ))
                }
                None => {
                    inner.worker_active = false;
                    inner.cancel_requested = false;
                    None
                }
            }
        };
        let Some((id, company, sync_type, period)) = next else {
            return;
        };

        let result = service.run(&company, sync_type, period).await;

        let mut inner = inner.lock().unwrap();
        if let Some(entry) = inner.entries.iter_mut().find(|e| e.id == id) {
            match result {
                Ok(_) => entry.status = QueueStatus::Completed,
                Err(SyncError::Cancelled) => entry.status = QueueStatus::Cancelled,
                Err(e) => {
                    entry.status = QueueStatus::Failed;
                    entry.error_message = Some(e.to_string());
                }
            }
        }
    }
}
