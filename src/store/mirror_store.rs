//! Company-scoped storage for the mirrored Tally tables.
//!
//! Mirrored tables are defined by the mapping document at runtime, so their
//! shape is not known at compile time; this store drives them with dynamic
//! SQL. Every table carries a hidden `_company` column and every operation
//! is scoped to one company, which is what keeps multi-company data apart.

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, info};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};

use super::store_errors::{Result, StoreError};
use crate::constants::{ALTER_ID_COLUMN, COMPANY_COLUMN, GUID_COLUMN};
use crate::mapping::TableMapping;
use crate::protocol::{FieldValue, ParsedRow};

pub struct MirrorStore {
    conn: Mutex<Connection>,
}

fn valid_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().unwrap().is_ascii_digit()
}

fn quote_ident(name: &str, table: &str) -> Result<String> {
    if !valid_ident(name) {
        return Err(StoreError::SchemaMismatch(
            table.to_string(),
            format!("invalid identifier '{}'", name),
        ));
    }
    Ok(format!("\"{}\"", name))
}

fn to_sql_value(value: &FieldValue) -> SqlValue {
    match value {
        FieldValue::Text(s) => SqlValue::Text(s.clone()),
        FieldValue::Integer(n) => SqlValue::Integer(*n),
        FieldValue::Decimal(d) => SqlValue::Real(d.to_f64().unwrap_or(0.0)),
        FieldValue::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        FieldValue::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        FieldValue::Null => SqlValue::Null,
    }
}

fn json_to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json_value(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

impl MirrorStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 30000;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Create or additively extend one mirrored table.
    ///
    /// Missing tables are created from the mapping; missing columns are
    /// added to existing tables. A column that already exists with a
    /// different type is a schema mismatch, never silently coerced.
    pub fn ensure_schema(&self, mapping: &TableMapping) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let table = quote_ident(&mapping.name, &mapping.name)?;

        let existing: HashMap<String, String> = {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        if existing.is_empty() {
            let mut columns = vec![format!("{} TEXT NOT NULL", COMPANY_COLUMN)];
            for field in &mapping.fields {
                let col = quote_ident(&field.name, &mapping.name)?;
                if mapping.is_primary() && field.name == GUID_COLUMN {
                    columns.push(format!("{} TEXT NOT NULL PRIMARY KEY", col));
                } else {
                    columns.push(format!("{} {}", col, field.kind.sql_type()));
                }
            }
            conn.execute_batch(&format!(
                "CREATE TABLE {} ({});
                 CREATE INDEX \"idx_{}_company\" ON {} ({});",
                table,
                columns.join(", "),
                mapping.name,
                table,
                COMPANY_COLUMN
            ))?;
            info!("Created mirrored table '{}'", mapping.name);
            return Ok(());
        }

        for field in &mapping.fields {
            match existing.get(&field.name) {
                None => {
                    let col = quote_ident(&field.name, &mapping.name)?;
                    conn.execute(
                        &format!(
                            "ALTER TABLE {} ADD COLUMN {} {}",
                            table,
                            col,
                            field.kind.sql_type()
                        ),
                        [],
                    )?;
                    debug!("Added column '{}' to '{}'", field.name, mapping.name);
                }
                Some(declared) if !declared.eq_ignore_ascii_case(field.kind.sql_type()) => {
                    return Err(StoreError::SchemaMismatch(
                        mapping.name.clone(),
                        format!(
                            "column '{}' is {} but mapping wants {}",
                            field.name,
                            declared,
                            field.kind.sql_type()
                        ),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Write a batch of parsed rows for one company in a single
    /// transaction. Primary tables upsert on guid; derived tables append.
    pub fn upsert_rows(
        &self,
        mapping: &TableMapping,
        company: &str,
        rows: &[ParsedRow],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let mut columns = vec![COMPANY_COLUMN.to_string()];
        for field in &mapping.fields {
            columns.push(quote_ident(&field.name, &mapping.name)?);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let verb = if mapping.is_primary() {
            "INSERT OR REPLACE"
        } else {
            "INSERT"
        };
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            table,
            columns.join(", "),
            placeholders
        );

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let mut values = vec![SqlValue::Text(company.to_string())];
                for field in &mapping.fields {
                    let value = row
                        .get(&field.name)
                        .map(to_sql_value)
                        .unwrap_or(SqlValue::Null);
                    values.push(value);
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Current guid -> alterid map for one company's slice of a primary
    /// table. This is the local half of the incremental diff.
    pub fn current_keys(&self, mapping: &TableMapping, company: &str) -> Result<HashMap<String, i64>> {
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {} WHERE {} = ?",
            GUID_COLUMN, ALTER_ID_COLUMN, table, COMPANY_COLUMN
        ))?;
        let rows = stmt.query_map([company], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Full row as JSON, keyed by column name. `_company` is dropped; the
    /// caller already knows it.
    pub fn read_row(
        &self,
        mapping: &TableMapping,
        company: &str,
        guid: &str,
    ) -> Result<Option<Map<String, Value>>> {
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? AND {} = ?",
            table, COMPANY_COLUMN, GUID_COLUMN
        ))?;
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let mut rows = stmt.query([company, guid])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut object = Map::new();
        for (i, name) in names.iter().enumerate() {
            if name == COMPANY_COLUMN {
                continue;
            }
            object.insert(name.clone(), sql_to_json_value(row.get_ref(i)?));
        }
        Ok(Some(object))
    }

    /// Delete the given guids from a primary table and cascade into the
    /// child tables its mapping names, all in one transaction.
    pub fn delete_rows(
        &self,
        mapping: &TableMapping,
        company: &str,
        guids: &[String],
    ) -> Result<usize> {
        if guids.is_empty() {
            return Ok(0);
        }
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let placeholders = vec!["?"; guids.len()].join(", ");

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for rule in &mapping.cascade {
            let child = quote_ident(&rule.table, &rule.table)?;
            let child_field = quote_ident(&rule.field, &rule.table)?;
            let params: Vec<SqlValue> = std::iter::once(SqlValue::Text(company.to_string()))
                .chain(guids.iter().map(|g| SqlValue::Text(g.clone())))
                .collect();
            let cascaded = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ? AND {} IN ({})",
                    child, COMPANY_COLUMN, child_field, placeholders
                ),
                params_from_iter(params),
            )?;
            debug!(
                "Cascade delete removed {} rows from '{}'",
                cascaded, rule.table
            );
        }
        let params: Vec<SqlValue> = std::iter::once(SqlValue::Text(company.to_string()))
            .chain(guids.iter().map(|g| SqlValue::Text(g.clone())))
            .collect();
        let deleted = tx.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ? AND {} IN ({})",
                table, COMPANY_COLUMN, GUID_COLUMN, placeholders
            ),
            params_from_iter(params),
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Remove one company's entire slice of a table.
    pub fn truncate(&self, mapping: &TableMapping, company: &str) -> Result<usize> {
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?", table, COMPANY_COLUMN),
            [company],
        )?)
    }

    /// Re-insert a previously captured JSON snapshot, used by restore.
    /// Columns missing from the live table are added as TEXT so old
    /// snapshots survive later mapping changes.
    pub fn insert_json_row(
        &self,
        table_name: &str,
        company: &str,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let table = quote_ident(table_name, table_name)?;
        let conn = self.conn.lock().unwrap();

        let existing: Vec<String> = {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        if existing.is_empty() {
            return Err(StoreError::NotFound(format!(
                "table '{}' does not exist",
                table_name
            )));
        }
        for name in data.keys() {
            if !existing.iter().any(|c| c == name) {
                let col = quote_ident(name, table_name)?;
                conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, col),
                    [],
                )?;
            }
        }

        let mut columns = vec![COMPANY_COLUMN.to_string()];
        let mut values = vec![SqlValue::Text(company.to_string())];
        for (name, value) in data {
            columns.push(quote_ident(name, table_name)?);
            values.push(json_to_sql_value(value));
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            ),
            params_from_iter(values),
        )?;
        Ok(())
    }

    pub fn count(&self, mapping: &TableMapping, company: &str) -> Result<i64> {
        let table = quote_ident(&mapping.name, &mapping.name)?;
        let conn = self.conn.lock().unwrap();
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {} = ?", table, COMPANY_COLUMN),
            [company],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingSet;

    fn mappings() -> MappingSet {
        MappingSet::from_json(
            r#"{
                "master": [{
                    "name": "mst_ledger", "collection": "Ledger", "nature": "Primary",
                    "fields": [
                        {"name": "guid", "field": "Guid"},
                        {"name": "alterid", "field": "AlterId", "type": "number"},
                        {"name": "name", "field": "Name"},
                        {"name": "balance", "field": "OpeningBalance", "type": "amount"}
                    ],
                    "cascade_delete": [{"table": "trn_accounting", "field": "ledger_guid"}]
                }],
                "transaction": [{
                    "name": "trn_accounting", "collection": "Voucher.AllLedgerEntries",
                    "fields": [
                        {"name": "ledger_guid", "field": "..Guid"},
                        {"name": "amount", "field": "Amount", "type": "amount"}
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    fn ledger_row(guid: &str, alter_id: i64, name: &str) -> ParsedRow {
        ParsedRow::from_pairs(vec![
            ("guid".into(), FieldValue::Text(guid.into())),
            ("alterid".into(), FieldValue::Integer(alter_id)),
            ("name".into(), FieldValue::Text(name.into())),
            (
                "balance".into(),
                FieldValue::Decimal("100.50".parse().unwrap()),
            ),
        ])
    }

    fn entry_row(ledger_guid: &str) -> ParsedRow {
        ParsedRow::from_pairs(vec![
            ("ledger_guid".into(), FieldValue::Text(ledger_guid.into())),
            (
                "amount".into(),
                FieldValue::Decimal("10".parse().unwrap()),
            ),
        ])
    }

    fn store_with_schema(set: &MappingSet) -> MirrorStore {
        let store = MirrorStore::open_in_memory().unwrap();
        for table in set.all() {
            store.ensure_schema(table).unwrap();
        }
        store
    }

    #[test]
    fn upsert_replaces_on_guid() {
        let set = mappings();
        let store = store_with_schema(&set);
        let ledger = &set.master[0];

        store
            .upsert_rows(ledger, "Acme", &[ledger_row("g-1", 1, "Cash")])
            .unwrap();
        store
            .upsert_rows(ledger, "Acme", &[ledger_row("g-1", 2, "Cash Renamed")])
            .unwrap();

        assert_eq!(store.count(ledger, "Acme").unwrap(), 1);
        let keys = store.current_keys(ledger, "Acme").unwrap();
        assert_eq!(keys.get("g-1"), Some(&2));
    }

    #[test]
    fn companies_are_isolated() {
        let set = mappings();
        let store = store_with_schema(&set);
        let ledger = &set.master[0];

        store
            .upsert_rows(ledger, "Acme", &[ledger_row("g-1", 1, "Cash")])
            .unwrap();
        store
            .upsert_rows(ledger, "Globex", &[ledger_row("g-2", 1, "Bank")])
            .unwrap();

        store.truncate(ledger, "Acme").unwrap();
        assert_eq!(store.count(ledger, "Acme").unwrap(), 0);
        assert_eq!(store.count(ledger, "Globex").unwrap(), 1);
    }

    #[test]
    fn delete_cascades_into_child_tables() {
        let set = mappings();
        let store = store_with_schema(&set);
        let ledger = &set.master[0];
        let entries = &set.transaction[0];

        store
            .upsert_rows(ledger, "Acme", &[ledger_row("g-1", 1, "Cash")])
            .unwrap();
        store
            .upsert_rows(entries, "Acme", &[entry_row("g-1"), entry_row("g-1")])
            .unwrap();

        let deleted = store
            .delete_rows(ledger, "Acme", &["g-1".to_string()])
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count(entries, "Acme").unwrap(), 0);
    }

    #[test]
    fn schema_grows_additively() {
        let set = mappings();
        let store = store_with_schema(&set);

        let mut wider = set.master[0].clone();
        wider.fields.push(crate::mapping::FieldMapping {
            name: "parent".into(),
            field: "Parent".into(),
            kind: crate::mapping::ValueKind::Text,
        });
        store.ensure_schema(&wider).unwrap();

        store
            .upsert_rows(
                &wider,
                "Acme",
                &[ParsedRow::from_pairs(vec![
                    ("guid".into(), FieldValue::Text("g-9".into())),
                    ("alterid".into(), FieldValue::Integer(1)),
                    ("name".into(), FieldValue::Text("X".into())),
                    ("balance".into(), FieldValue::Decimal(Default::default())),
                    ("parent".into(), FieldValue::Text("Primary".into())),
                ])],
            )
            .unwrap();
        assert_eq!(store.count(&wider, "Acme").unwrap(), 1);
    }

    #[test]
    fn type_change_is_a_schema_mismatch() {
        let set = mappings();
        let store = store_with_schema(&set);

        let mut changed = set.master[0].clone();
        changed.fields[2].kind = crate::mapping::ValueKind::Amount;
        assert!(matches!(
            store.ensure_schema(&changed),
            Err(StoreError::SchemaMismatch(_, _))
        ));
    }

    #[test]
    fn snapshot_round_trip() {
        let set = mappings();
        let store = store_with_schema(&set);
        let ledger = &set.master[0];

        store
            .upsert_rows(ledger, "Acme", &[ledger_row("g-1", 3, "Cash")])
            .unwrap();
        let snapshot = store.read_row(ledger, "Acme", "g-1").unwrap().unwrap();
        assert_eq!(snapshot.get("name"), Some(&Value::String("Cash".into())));
        assert!(!snapshot.contains_key(COMPANY_COLUMN));

        store
            .delete_rows(ledger, "Acme", &["g-1".to_string()])
            .unwrap();
        store.insert_json_row("mst_ledger", "Acme", &snapshot).unwrap();
        let keys = store.current_keys(ledger, "Acme").unwrap();
        assert_eq!(keys.get("g-1"), Some(&3));
    }

    #[test]
    fn rejects_hostile_identifiers() {
        let store = MirrorStore::open_in_memory().unwrap();
        let doc = r#"{"master": [{"name": "t; DROP TABLE x", "collection": "C",
            "fields": [{"name": "a", "field": "A"}]}]}"#;
        let set = MappingSet::from_json(doc).unwrap();
        assert!(matches!(
            store.ensure_schema(&set.master[0]),
            Err(StoreError::SchemaMismatch(_, _))
        ));
    }
}
