use async_trait::async_trait;
use chrono::NaiveDate;

use super::remote_errors::Result;
use crate::mapping::TableMapping;
use crate::protocol::{ParsedRow, Period};

/// Identity of one company as reported by Tally itself.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyProfile {
    pub name: String,
    pub guid: String,
    pub books_from: Option<NaiveDate>,
    pub last_voucher_date: Option<NaiveDate>,
}

/// Company-wide alter-id counters: the highest master and transaction
/// alter id Tally has handed out. Comparing these against stored
/// watermarks decides whether a sync has anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlterIds {
    pub master: i64,
    pub transaction: i64,
}

/// Everything the sync engine needs from the remote side. [`TallyClient`]
/// is the production implementation; tests drive the engine with a mock.
///
/// [`TallyClient`]: super::TallyClient
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_rows(
        &self,
        mapping: &TableMapping,
        company: &str,
        period: Period,
        alter_id_threshold: Option<i64>,
    ) -> Result<Vec<ParsedRow>>;

    async fn company_profile(&self, company: &str) -> Result<CompanyProfile>;

    async fn alter_ids(&self, company: &str) -> Result<AlterIds>;
}

#[cfg(test)]
pub mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::constants::ALTER_ID_COLUMN;
    use crate::remote::RemoteError;

    /// In-memory stand-in for Tally. Rows are keyed by (company,
    /// collection); the alter-id threshold filter is applied the same way
    /// the real server would apply it.
    #[derive(Default)]
    pub struct MockRemote {
        rows: Mutex<HashMap<(String, String), Vec<ParsedRow>>>,
        alter_ids: Mutex<HashMap<String, AlterIds>>,
        unreachable: Mutex<HashSet<String>>,
        latency: Mutex<Duration>,
        pub fetch_calls: AtomicU32,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Stall the alter-id probe, keeping runs in flight long enough
        /// for overlap and cancellation tests to observe them.
        pub fn set_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = latency;
        }

        async fn simulate_latency(&self) {
            let latency = *self.latency.lock().unwrap();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
        }

        pub fn set_rows(&self, company: &str, collection: &str, rows: Vec<ParsedRow>) {
            self.rows
                .lock()
                .unwrap()
                .insert((company.to_string(), collection.to_string()), rows);
        }

        pub fn set_alter_ids(&self, company: &str, master: i64, transaction: i64) {
            self.alter_ids
                .lock()
                .unwrap()
                .insert(company.to_string(), AlterIds { master, transaction });
        }

        /// Make every call for this company fail with `Unreachable`.
        pub fn set_unreachable(&self, company: &str) {
            self.unreachable.lock().unwrap().insert(company.to_string());
        }

        fn check_reachable(&self, company: &str) -> Result<()> {
            if self.unreachable.lock().unwrap().contains(company) {
                return Err(RemoteError::Unreachable(format!(
                    "no route to company '{}'",
                    company
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteSource for MockRemote {
        async fn fetch_rows(
            &self,
            mapping: &TableMapping,
            company: &str,
            _period: Period,
            alter_id_threshold: Option<i64>,
        ) -> Result<Vec<ParsedRow>> {
            self.check_reachable(company)?;
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let rows = self
                .rows
                .lock()
                .unwrap()
                .get(&(company.to_string(), mapping.collection.clone()))
                .cloned()
                .unwrap_or_default();
            Ok(match alter_id_threshold {
                None => rows,
                Some(threshold) => rows
                    .into_iter()
                    .filter(|row| {
                        row.integer(ALTER_ID_COLUMN)
                            .map(|id| id > threshold)
                            .unwrap_or(true)
                    })
                    .collect(),
            })
        }

        async fn company_profile(&self, company: &str) -> Result<CompanyProfile> {
            self.check_reachable(company)?;
            Ok(CompanyProfile {
                name: company.to_string(),
                guid: format!("guid-{}", company),
                books_from: None,
                last_voucher_date: None,
            })
        }

        async fn alter_ids(&self, company: &str) -> Result<AlterIds> {
            self.simulate_latency().await;
            self.check_reachable(company)?;
            Ok(self
                .alter_ids
                .lock()
                .unwrap()
                .get(company)
                .copied()
                .unwrap_or_default())
        }
    }
}
