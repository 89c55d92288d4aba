use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::audit_errors::{AuditError, Result};
use super::audit_model::{
    AuditFilter, AuditLogEntry, AuditStats, DeletedRecordEntry, NewAuditLogEntry, NewDeletedRecord,
};
use crate::db::get_connection;
use crate::schema::{audit_log, deleted_records};

/// Repository for the audit trail and deletion snapshots
pub struct AuditRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl AuditRepository {
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<crate::db::DbConnection> {
        get_connection(&self.pool).map_err(|e| AuditError::DatabaseError(e.to_string()))
    }

    pub fn append(&self, entry: NewAuditLogEntry) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_into(audit_log::table)
            .values(&entry)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Write a DELETE audit entry and its recovery snapshot atomically;
    /// a crash can never leave a deletion without its snapshot.
    pub fn append_delete(
        &self,
        entry: NewAuditLogEntry,
        snapshot: NewDeletedRecord,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::insert_into(audit_log::table)
                .values(&entry)
                .execute(conn)?;
            diesel::insert_into(deleted_records::table)
                .values(&snapshot)
                .execute(conn)?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn history(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let mut conn = self.conn()?;
        let mut query = audit_log::table.into_boxed();
        if let Some(company) = &filter.company {
            query = query.filter(audit_log::company_name.eq(company));
        }
        if let Some(table) = &filter.table {
            query = query.filter(audit_log::table_name.eq(table));
        }
        if let Some(guid) = &filter.record_guid {
            query = query.filter(audit_log::record_guid.eq(guid));
        }
        if let Some(session) = &filter.session_id {
            query = query.filter(audit_log::session_id.eq(session));
        }
        Ok(query
            .order(audit_log::created_at.desc())
            .limit(filter.limit.unwrap_or(500))
            .load::<AuditLogEntry>(&mut conn)?)
    }

    pub fn deleted(
        &self,
        company: &str,
        table: Option<&str>,
        include_restored: bool,
    ) -> Result<Vec<DeletedRecordEntry>> {
        let mut conn = self.conn()?;
        let mut query = deleted_records::table
            .filter(deleted_records::company_name.eq(company))
            .into_boxed();
        if let Some(table) = table {
            query = query.filter(deleted_records::table_name.eq(table));
        }
        if !include_restored {
            query = query.filter(deleted_records::is_restored.eq(false));
        }
        Ok(query
            .order(deleted_records::deleted_at.desc())
            .load::<DeletedRecordEntry>(&mut conn)?)
    }

    pub fn get_deleted(&self, deleted_id: i32) -> Result<DeletedRecordEntry> {
        let mut conn = self.conn()?;
        deleted_records::table
            .find(deleted_id)
            .first::<DeletedRecordEntry>(&mut conn)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => AuditError::NotFound(format!(
                    "Deleted record with id {} not found",
                    deleted_id
                )),
                _ => AuditError::DatabaseError(e.to_string()),
            })
    }

    /// Flip the restored flag, but only if it is still clear. Zero
    /// affected rows means someone restored it first.
    pub fn mark_restored(&self, deleted_id: i32) -> Result<()> {
        let mut conn = self.conn()?;
        let affected = diesel::update(
            deleted_records::table
                .find(deleted_id)
                .filter(deleted_records::is_restored.eq(false)),
        )
        .set((
            deleted_records::is_restored.eq(true),
            deleted_records::restored_at.eq(Some(Utc::now().naive_utc())),
        ))
        .execute(&mut conn)?;

        if affected == 0 {
            return Err(AuditError::AlreadyRestored(deleted_id));
        }
        Ok(())
    }

    pub fn stats(&self, company: &str) -> Result<AuditStats> {
        let mut conn = self.conn()?;
        let count_for = |conn: &mut crate::db::DbConnection, action: &str| {
            audit_log::table
                .filter(audit_log::company_name.eq(company))
                .filter(audit_log::action.eq(action))
                .count()
                .get_result::<i64>(conn)
        };
        Ok(AuditStats {
            inserts: count_for(&mut conn, "INSERT")?,
            updates: count_for(&mut conn, "UPDATE")?,
            deletes: count_for(&mut conn, "DELETE")?,
            restores: count_for(&mut conn, "RESTORE")?,
        })
    }
}
