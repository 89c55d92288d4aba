use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::session_model::{NewSyncSession, SessionStatus, SyncCounts, SyncSession, SyncType};
use super::sync_errors::{Result, SyncError};
use crate::db::get_connection;
use crate::schema::sync_sessions;

/// Repository for sync session history
pub struct SessionRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl SessionRepository {
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<crate::db::DbConnection> {
        get_connection(&self.pool).map_err(|e| SyncError::DatabaseError(e.to_string()))
    }

    pub fn open(&self, session_id: &str, company: &str, sync_type: SyncType) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(sync_sessions::table)
            .values(&NewSyncSession {
                id: session_id.to_string(),
                company_name: company.to_string(),
                sync_type: sync_type.as_str().to_string(),
                status: SessionStatus::Running.as_str().to_string(),
                started_at: Utc::now().naive_utc(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn close(
        &self,
        session_id: &str,
        status: SessionStatus,
        counts: SyncCounts,
        error: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::update(sync_sessions::table.find(session_id))
            .set((
                sync_sessions::status.eq(status.as_str()),
                sync_sessions::finished_at.eq(Some(Utc::now().naive_utc())),
                sync_sessions::records_inserted.eq(counts.inserted),
                sync_sessions::records_updated.eq(counts.updated),
                sync_sessions::records_deleted.eq(counts.deleted),
                sync_sessions::error_message.eq(error),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<SyncSession> {
        let mut conn = self.conn()?;
        sync_sessions::table
            .find(session_id)
            .first::<SyncSession>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => {
                    SyncError::DatabaseError(format!("Session {} not found", session_id))
                }
                _ => SyncError::DatabaseError(e.to_string()),
            })
    }

    pub fn recent(&self, company: Option<&str>, limit: i64) -> Result<Vec<SyncSession>> {
        let mut conn = self.conn()?;
        let mut query = sync_sessions::table.into_boxed();
        if let Some(company) = company {
            query = query.filter(sync_sessions::company_name.eq(company));
        }
        Ok(query
            .order(sync_sessions::started_at.desc())
            .limit(limit)
            .load::<SyncSession>(&mut conn)?)
    }
}
