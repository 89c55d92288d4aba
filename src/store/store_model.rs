use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::company_config;

/// Per-company sync state: identity, alter-id watermarks, and run counters.
#[derive(Queryable, Identifiable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = company_config)]
#[serde(rename_all = "camelCase")]
pub struct CompanyConfig {
    pub id: i32,
    pub company_name: String,
    pub company_guid: Option<String>,
    pub last_alter_id_master: i64,
    pub last_alter_id_transaction: i64,
    pub last_sync_at: Option<NaiveDateTime>,
    pub sync_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = company_config)]
pub struct NewCompanyConfig<'a> {
    pub company_name: &'a str,
}
