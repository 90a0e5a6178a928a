use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use research_types::{BudgetPeriod, CostEntry, CostKind, Money};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    schema_version: u32,
    entries: Vec<CostEntry>,
}

/// Append-only record of estimated and realized spend (C1), durable across
/// restarts for the same reason `JobQueue` is: a process restart must not
/// silently zero out spend a budget cap was already counting against.
/// Entries are never mutated or removed; period aggregation is a linear
/// scan, which is adequate at the entry volumes a single engine namespace
/// produces.
pub struct CostLedger {
    path: PathBuf,
    entries: RwLock<Vec<CostEntry>>,
}

impl CostLedger {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: LedgerFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing ledger file {}", path.display()))?;
                migrate(file)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("reading ledger file"),
        };
        Ok(CostLedger {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &[CostEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let file = LedgerFile {
            schema_version: LEDGER_SCHEMA_VERSION,
            entries: entries.to_vec(),
        };
        let body = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, body)
            .await
            .with_context(|| format!("writing ledger file {}", self.path.display()))
    }

    pub async fn append(&self, entry: CostEntry) {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        if let Err(err) = self.flush(&entries).await {
            tracing::error!(?err, "failed to flush cost ledger");
        }
    }

    /// Aggregate REALIZED spend in `[period_start, now]`. ESTIMATEs never
    /// count against caps; they exist for pre-flight reasoning only.
    pub async fn sum_realized_since(&self, period_start: DateTime<Utc>) -> Money {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == CostKind::Realized && e.occurred_at >= period_start)
            .fold(Money::ZERO, |acc, e| acc + e.amount)
    }

    /// Aggregate ESTIMATE spend in `[period_start, now]`, for cost-summary
    /// reporting; estimates never gate budget decisions (see `check_submit`).
    pub async fn sum_estimate_since(&self, period_start: DateTime<Utc>) -> Money {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == CostKind::Estimate && e.occurred_at >= period_start)
            .fold(Money::ZERO, |acc, e| acc + e.amount)
    }

    pub async fn sum_for_period(&self, period: BudgetPeriod, now: DateTime<Utc>) -> Money {
        self.sum_realized_since(period_start(period, now)).await
    }

    pub async fn sum_estimate_for_period(&self, period: BudgetPeriod, now: DateTime<Utc>) -> Money {
        self.sum_estimate_since(period_start(period, now)).await
    }

    pub async fn entries_for_job(&self, job_id: uuid::Uuid) -> Vec<CostEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }
}

fn period_start(period: BudgetPeriod, now: DateTime<Utc>) -> DateTime<Utc> {
    match period {
        BudgetPeriod::Day => now - Duration::days(1),
        BudgetPeriod::Month => now - Duration::days(30),
    }
}

fn migrate(file: LedgerFile) -> Vec<CostEntry> {
    match file.schema_version {
        LEDGER_SCHEMA_VERSION => file.entries,
        other => {
            tracing::warn!(found = other, expected = LEDGER_SCHEMA_VERSION, "unknown ledger schema version, loading as-is");
            file.entries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_types::CostEntry;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("research-engine-ledger-test-{}.json", Uuid::new_v4()))
    }

    fn entry(kind: CostKind, amount: f64, occurred_at: DateTime<Utc>) -> CostEntry {
        CostEntry {
            job_id: Uuid::new_v4(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            kind,
            amount: Money::from_dollars(amount),
            tokens_in: 100,
            tokens_out: 50,
            occurred_at,
        }
    }

    #[tokio::test]
    async fn only_realized_entries_count_toward_period_sum() {
        let ledger = CostLedger::open(temp_path()).await.unwrap();
        let now = Utc::now();
        ledger.append(entry(CostKind::Estimate, 5.0, now)).await;
        ledger.append(entry(CostKind::Realized, 1.25, now)).await;
        ledger.append(entry(CostKind::Realized, 0.75, now)).await;

        let sum = ledger.sum_for_period(BudgetPeriod::Day, now).await;
        assert_eq!(sum, Money::from_dollars(2.0));
    }

    #[tokio::test]
    async fn estimate_sum_only_counts_estimate_entries() {
        let ledger = CostLedger::open(temp_path()).await.unwrap();
        let now = Utc::now();
        ledger.append(entry(CostKind::Estimate, 3.0, now)).await;
        ledger.append(entry(CostKind::Estimate, 2.0, now)).await;
        ledger.append(entry(CostKind::Realized, 1.0, now)).await;

        let sum = ledger.sum_estimate_for_period(BudgetPeriod::Day, now).await;
        assert_eq!(sum, Money::from_dollars(5.0));
    }

    #[tokio::test]
    async fn entries_outside_period_are_excluded() {
        let ledger = CostLedger::open(temp_path()).await.unwrap();
        let now = Utc::now();
        ledger
            .append(entry(CostKind::Realized, 3.0, now - Duration::days(2)))
            .await;
        let sum = ledger.sum_for_period(BudgetPeriod::Day, now).await;
        assert_eq!(sum, Money::ZERO);
    }

    #[tokio::test]
    async fn reopening_the_ledger_file_recovers_prior_entries() {
        let path = temp_path();
        {
            let ledger = CostLedger::open(&path).await.unwrap();
            ledger
                .append(entry(CostKind::Realized, 4.0, Utc::now()))
                .await;
        }
        let reopened = CostLedger::open(&path).await.unwrap();
        let now = Utc::now();
        let sum = reopened.sum_for_period(BudgetPeriod::Day, now).await;
        assert_eq!(sum, Money::from_dollars(4.0));
    }
}
</content>
