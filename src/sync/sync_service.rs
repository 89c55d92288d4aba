//! Orchestrates sync runs: one run per company at a time, each recorded
//! as a session row from start to terminal state.

use std::sync::{Arc, Mutex};

use log::{error, info, warn};

use super::engine::{CancelToken, ReconciliationEngine, SyncProgress};
use super::session_model::{SessionStatus, SyncCounts, SyncReport, SyncSession, SyncType};
use super::session_repository::SessionRepository;
use super::sync_errors::{Result, SyncError};
use crate::audit::new_session_id;
use crate::mapping::MappingSet;
use crate::protocol::Period;

pub struct SyncService {
    engine: Arc<ReconciliationEngine>,
    sessions: Arc<SessionRepository>,
    mappings: Arc<MappingSet>,
    // One session per process: holds the active company and its token.
    running: Mutex<Option<(String, CancelToken)>>,
}

impl SyncService {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        sessions: Arc<SessionRepository>,
        mappings: Arc<MappingSet>,
    ) -> Self {
        Self {
            engine,
            sessions,
            mappings,
            running: Mutex::new(None),
        }
    }

    /// Run one sync for one company. Only one session may be active in
    /// the whole process: while any run is in flight, starting another
    /// fails fast with [`SyncError::AlreadyRunning`] naming the active
    /// company, whichever company was asked for.
    pub async fn run(
        &self,
        company: &str,
        sync_type: SyncType,
        period: Period,
    ) -> Result<SyncReport> {
        let cancel = {
            let mut running = self.running.lock().unwrap();
            if let Some((active, _)) = running.as_ref() {
                return Err(SyncError::AlreadyRunning(active.clone()));
            }
            let token = CancelToken::new();
            *running = Some((company.to_string(), token.clone()));
            token
        };

        let session_id = new_session_id(sync_type.as_str());
        if let Err(e) = self.sessions.open(&session_id, company, sync_type) {
            *self.running.lock().unwrap() = None;
            return Err(e);
        }
        info!("{}: started {} sync ({})", company, sync_type.as_str(), session_id);

        let result = match sync_type {
            SyncType::Incremental => {
                self.engine
                    .run_incremental(&self.mappings, company, period, &session_id, &cancel)
                    .await
            }
            SyncType::Full => self
                .engine
                .run_full(&self.mappings, company, period, &cancel)
                .await
                .map(|counts| (counts, false)),
        };
        *self.running.lock().unwrap() = None;

        match result {
            Ok((counts, up_to_date)) => {
                self.sessions
                    .close(&session_id, SessionStatus::Completed, counts, None)?;
                Ok(SyncReport {
                    session_id,
                    company_name: company.to_string(),
                    sync_type,
                    status: SessionStatus::Completed,
                    counts,
                    up_to_date,
                })
            }
            Err(SyncError::Cancelled) => {
                warn!("{}: sync {} cancelled", company, session_id);
                self.sessions.close(
                    &session_id,
                    SessionStatus::Cancelled,
                    SyncCounts::default(),
                    None,
                )?;
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                error!("{}: sync {} failed: {}", company, session_id, e);
                self.sessions.close(
                    &session_id,
                    SessionStatus::Failed,
                    SyncCounts::default(),
                    Some(&e.to_string()),
                )?;
                Err(e)
            }
        }
    }

    /// Flag the in-flight run for this company; it stops at the next
    /// table boundary. Returns false when nothing is running or the
    /// active session belongs to another company.
    pub fn cancel(&self, company: &str) -> bool {
        match self.running.lock().unwrap().as_ref() {
            Some((active, token)) if active == company => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, company: &str) -> bool {
        matches!(
            self.running.lock().unwrap().as_ref(),
            Some((active, _)) if active == company
        )
    }

    pub fn running_company(&self) -> Option<String> {
        self.running
            .lock()
            .unwrap()
            .as_ref()
            .map(|(active, _)| active.clone())
    }

    /// Snapshot of the in-flight session's progress, if any.
    pub fn status(&self) -> Option<SyncProgress> {
        self.running.lock().unwrap().as_ref()?;
        self.engine.progress()
    }

    pub fn history(&self, company: Option<&str>, limit: i64) -> Result<Vec<SyncSession>> {
        self.sessions.recent(company, limit)
    }

    pub fn session(&self, session_id: &str) -> Result<SyncSession> {
        self.sessions.get(session_id)
    }
}
