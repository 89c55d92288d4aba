use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{self, Pool};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use super::store_errors::{Result, StoreError};
use super::store_model::{CompanyConfig, NewCompanyConfig};
use crate::db::get_connection;
use crate::remote::AlterIds;
use crate::schema::company_config;
use crate::schema::company_config::dsl::*;

/// Repository for per-company sync state
pub struct CompanyConfigRepository {
    pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>,
}

impl CompanyConfigRepository {
    pub fn new(pool: Arc<Pool<r2d2::ConnectionManager<SqliteConnection>>>) -> Self {
        Self { pool }
    }

    /// Fetch one company's config, creating a zero-watermark row on first
    /// contact.
    pub fn ensure(&self, company: &str) -> Result<CompanyConfig> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if let Some(existing) = company_config
            .filter(company_name.eq(company))
            .first::<CompanyConfig>(&mut conn)
            .optional()?
        {
            return Ok(existing);
        }

        diesel::insert_into(company_config::table)
            .values(&NewCompanyConfig {
                company_name: company,
            })
            .execute(&mut conn)?;

        Ok(company_config
            .filter(company_name.eq(company))
            .first::<CompanyConfig>(&mut conn)?)
    }

    pub fn get(&self, company: &str) -> Result<Option<CompanyConfig>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(company_config
            .filter(company_name.eq(company))
            .first::<CompanyConfig>(&mut conn)
            .optional()?)
    }

    pub fn list(&self) -> Result<Vec<CompanyConfig>> {
        let mut conn = get_connection(&self.pool)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(company_config
            .order(company_name.asc())
            .load::<CompanyConfig>(&mut conn)?)
    }

    /// Record a completed sync: advance both watermarks to the remote
    /// counters seen at run start, remember the company guid, bump the
    /// run counter.
    pub fn record_sync(
        &self,
        company: &str,
        watermarks: AlterIds,
        guid: Option<&str>,
    ) -> Result<CompanyConfig> {
        let current = self.ensure(company)?;
        let mut conn = get_connection(&self.pool)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let now = Utc::now().naive_utc();
        let kept_guid = guid
            .map(|g| g.to_string())
            .or(current.company_guid.clone());

        diesel::update(company_config.filter(company_name.eq(company)))
            .set((
                last_alter_id_master.eq(watermarks.master),
                last_alter_id_transaction.eq(watermarks.transaction),
                last_sync_at.eq(Some(now)),
                sync_count.eq(current.sync_count + 1),
                company_guid.eq(kept_guid),
                updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(company_config
            .filter(company_name.eq(company))
            .first::<CompanyConfig>(&mut conn)?)
    }

    /// Reset both watermarks to zero, forcing the next incremental run to
    /// re-fetch everything. Used before a full sync.
    pub fn reset_watermarks(&self, company: &str) -> Result<()> {
        self.ensure(company)?;
        let mut conn = get_connection(&self.pool)
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        diesel::update(company_config.filter(company_name.eq(company)))
            .set((
                last_alter_id_master.eq(0i64),
                last_alter_id_transaction.eq(0i64),
                updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }
}
