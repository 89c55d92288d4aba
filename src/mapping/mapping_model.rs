use serde::{Deserialize, Serialize};

use super::mapping_errors::{MappingError, Result};
use crate::constants::{ALTER_ID_COLUMN, GUID_COLUMN};

/// How a field value coming back from Tally is coerced before storage.
///
/// The numeric kinds (`Amount`, `Quantity`, `Rate`) share one coercion path;
/// they exist as distinct kinds because the TDL request builder emits a
/// different `$$`-formula for each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Logical,
    Number,
    Amount,
    Quantity,
    Rate,
    Date,
}

impl Default for ValueKind {
    fn default() -> Self {
        ValueKind::Text
    }
}

impl ValueKind {
    /// SQLite column type used when the schema is created from the mapping.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ValueKind::Text | ValueKind::Date => "TEXT",
            ValueKind::Logical | ValueKind::Number => "INTEGER",
            ValueKind::Amount | ValueKind::Quantity | ValueKind::Rate => "REAL",
        }
    }
}

/// Whether a table carries independent guid + alter-id identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableNature {
    /// Has a guid primary key and a per-record alter id; participates in
    /// the incremental diff.
    Primary,
    /// Child rows keyed only by their owning Primary guid; always rewritten
    /// alongside the parent.
    Derived,
}

impl Default for TableNature {
    fn default() -> Self {
        TableNature::Derived
    }
}

/// One target column and the remote field or formula feeding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub field: String,
    #[serde(rename = "type", default)]
    pub kind: ValueKind,
}

/// Child table wiped whenever an owning Primary record is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeRule {
    pub table: String,
    pub field: String,
}

/// Declarative description of one mirrored table: where its rows come from
/// in Tally and how they land in SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    pub name: String,
    /// Tally collection, possibly dotted for nested walks
    /// (e.g. "Voucher.AllLedgerEntries").
    pub collection: String,
    #[serde(default)]
    pub nature: TableNature,
    pub fields: Vec<FieldMapping>,
    #[serde(default)]
    pub fetch: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, rename = "cascade_delete")]
    pub cascade: Vec<CascadeRule>,
}

impl TableMapping {
    pub fn is_primary(&self) -> bool {
        self.nature == TableNature::Primary
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Minimal projection used by the diff phase: guid + alterid only,
    /// same collection and filters as the full mapping.
    pub fn key_projection(&self) -> TableMapping {
        TableMapping {
            name: format!("{}_keys", self.name),
            collection: self.collection.clone(),
            nature: self.nature,
            fields: vec![
                FieldMapping {
                    name: GUID_COLUMN.to_string(),
                    field: "Guid".to_string(),
                    kind: ValueKind::Text,
                },
                FieldMapping {
                    name: ALTER_ID_COLUMN.to_string(),
                    field: "AlterId".to_string(),
                    kind: ValueKind::Number,
                },
            ],
            fetch: vec!["AlterId".to_string()],
            filters: self.filters.clone(),
            cascade: Vec::new(),
        }
    }
}

/// Which watermark a table set is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncScope {
    Master,
    Transaction,
}

impl SyncScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::Master => "master",
            SyncScope::Transaction => "transaction",
        }
    }
}

/// The full mapping document: master tables synced against the master
/// alter-id watermark, transaction tables against the transaction one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingSet {
    #[serde(default)]
    pub master: Vec<TableMapping>,
    #[serde(default)]
    pub transaction: Vec<TableMapping>,
}

impl MappingSet {
    /// Parse and validate a mapping document. Unknown value kinds or
    /// natures fail here, at load time, not per-row during a sync.
    pub fn from_json(document: &str) -> Result<Self> {
        let set: MappingSet = serde_json::from_str(document)?;
        set.validate()?;
        Ok(set)
    }

    pub fn tables(&self, scope: SyncScope) -> &[TableMapping] {
        match scope {
            SyncScope::Master => &self.master,
            SyncScope::Transaction => &self.transaction,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &TableMapping> {
        self.master.iter().chain(self.transaction.iter())
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for table in self.all() {
            if !seen.insert(table.name.as_str()) {
                return Err(MappingError::DuplicateTable(table.name.clone()));
            }
            if table.fields.is_empty() {
                return Err(MappingError::EmptyFields(table.name.clone()));
            }
            if table.is_primary() {
                for key in [GUID_COLUMN, ALTER_ID_COLUMN] {
                    if table.field(key).is_none() {
                        return Err(MappingError::MissingKeyField(
                            table.name.clone(),
                            key.to_string(),
                        ));
                    }
                }
            }
        }
        for table in self.all() {
            for rule in &table.cascade {
                if !self.all().any(|t| t.name == rule.table) {
                    return Err(MappingError::UnknownCascadeTarget(
                        table.name.clone(),
                        rule.table.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> &'static str {
        r#"{
            "master": [
                {
                    "name": "mst_ledger",
                    "collection": "Ledger",
                    "nature": "Primary",
                    "fields": [
                        {"name": "guid", "field": "Guid"},
                        {"name": "alterid", "field": "AlterId", "type": "number"},
                        {"name": "name", "field": "Name"},
                        {"name": "opening_balance", "field": "OpeningBalance", "type": "amount"}
                    ],
                    "fetch": ["AlterId"],
                    "cascade_delete": [
                        {"table": "trn_accounting", "field": "ledger_guid"}
                    ]
                }
            ],
            "transaction": [
                {
                    "name": "trn_accounting",
                    "collection": "Voucher.AllLedgerEntries",
                    "fields": [
                        {"name": "ledger_guid", "field": "..Guid"},
                        {"name": "amount", "field": "Amount", "type": "amount"}
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn loads_and_validates_sample_document() {
        let set = MappingSet::from_json(sample_document()).unwrap();
        assert_eq!(set.master.len(), 1);
        assert_eq!(set.transaction.len(), 1);
        assert!(set.master[0].is_primary());
        assert!(!set.transaction[0].is_primary());
        assert_eq!(set.master[0].fields[3].kind, ValueKind::Amount);
    }

    #[test]
    fn rejects_unknown_value_kind() {
        let doc = r#"{"master": [{"name": "t", "collection": "C",
            "fields": [{"name": "x", "field": "X", "type": "blob"}]}]}"#;
        assert!(matches!(
            MappingSet::from_json(doc),
            Err(MappingError::InvalidDocument(_))
        ));
    }

    #[test]
    fn rejects_primary_table_without_alterid() {
        let doc = r#"{"master": [{"name": "t", "collection": "C", "nature": "Primary",
            "fields": [{"name": "guid", "field": "Guid"}]}]}"#;
        assert!(matches!(
            MappingSet::from_json(doc),
            Err(MappingError::MissingKeyField(_, _))
        ));
    }

    #[test]
    fn rejects_cascade_to_unknown_table() {
        let doc = r#"{"master": [{"name": "t", "collection": "C", "nature": "Primary",
            "fields": [
                {"name": "guid", "field": "Guid"},
                {"name": "alterid", "field": "AlterId", "type": "number"}
            ],
            "cascade_delete": [{"table": "nope", "field": "guid"}]}]}"#;
        assert!(matches!(
            MappingSet::from_json(doc),
            Err(MappingError::UnknownCascadeTarget(_, _))
        ));
    }

    #[test]
    fn key_projection_keeps_collection_and_filters() {
        let set = MappingSet::from_json(sample_document()).unwrap();
        let proj = set.master[0].key_projection();
        assert_eq!(proj.collection, "Ledger");
        assert_eq!(proj.fields.len(), 2);
        assert_eq!(proj.fields[0].name, "guid");
        assert_eq!(proj.fields[1].kind, ValueKind::Number);
    }
}
