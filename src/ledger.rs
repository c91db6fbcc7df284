// src/ledger.rs
// Writes are issued concurrently and joined, not run as one transaction. Increments
// that landed before a failure stay applied.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::model::ScanStatus;
use crate::scans::{ProcessedFields, ScanRepository, ScanUpdate};

/// Atomic counter adjustments. Implementations must increment in place, never
/// read-modify-write.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Wallet `points` and `scanCount`; a zero `points` delta leaves the wallet untouched.
    async fn adjust_clerk(&self, user_id: &str, points: i64, scans: i64) -> Result<(), StoreError>;

    /// `scanCount` by `scans`, `monthlyPoints` and `lifetimePoints` by `points`.
    async fn adjust_pharmacy(&self, pharmacy_id: &str, points: i64, scans: i64) -> Result<(), StoreError>;

    /// Rep `points` and `monthlySales`, both by the same amount.
    async fn credit_rep(&self, rep_id: &str, points: i64) -> Result<(), StoreError>;
}

pub struct LedgerUpdater {
    scans: Arc<dyn ScanRepository>,
    ledger: Arc<dyn LedgerStore>,
}

impl LedgerUpdater {
    pub fn new(scans: Arc<dyn ScanRepository>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { scans, ledger }
    }

    /// Records a processed scan and credits the clerk, pharmacy and reps.
    pub async fn apply(
        &self,
        scan_id: &str,
        user_id: &str,
        ai_response: serde_json::Value,
        fields: ProcessedFields,
    ) -> PipelineResult<()> {
        let total = fields.points_earned;
        let pharmacy_id = fields.pharmacy_id.clone();
        let rep_rewards: BTreeMap<String, i64> = fields.sales_rep_rewards.clone();

        let update = ScanUpdate {
            processed: Some(fields),
            ..ScanUpdate::status(ScanStatus::Processed).with_ai_response(ai_response)
        };

        let mut writes = JoinSet::new();
        {
            let scans = Arc::clone(&self.scans);
            let scan_id = scan_id.to_string();
            writes.spawn(async move { scans.write_scan(&scan_id, &update).await });
        }
        {
            let ledger = Arc::clone(&self.ledger);
            let user_id = user_id.to_string();
            writes.spawn(async move { ledger.adjust_clerk(&user_id, total, 1).await });
        }
        {
            let ledger = Arc::clone(&self.ledger);
            let pharmacy_id = pharmacy_id.clone();
            writes.spawn(async move { ledger.adjust_pharmacy(&pharmacy_id, total, 1).await });
        }
        for (rep_id, points) in rep_rewards.iter().filter(|(_, p)| **p != 0) {
            let ledger = Arc::clone(&self.ledger);
            let rep_id = rep_id.clone();
            let points = *points;
            writes.spawn(async move { ledger.credit_rep(&rep_id, points).await });
        }

        join_writes(writes).await?;
        info!(
            points = total,
            pharmacy_id = %pharmacy_id,
            reps = rep_rewards.len(),
            "Ledger updated"
        );
        Ok(())
    }

    /// Turns a processed scan into a rejected one and takes back exactly the stored
    /// `pointsEarned` from the clerk and the pharmacy. Counters are not clamped.
    pub async fn reverse_scan(&self, scan_id: &str, reason: &str) -> PipelineResult<()> {
        let scan = self
            .scans
            .scan(scan_id)
            .await?
            .ok_or_else(|| StoreError::ScanNotFound(scan_id.to_string()))?;
        if scan.status != ScanStatus::Processed {
            return Err(PipelineError::NotReversible {
                scan_id: scan_id.to_string(),
                status: scan.status.to_string(),
            });
        }

        let points = scan.points_earned;
        let update = ScanUpdate::status(ScanStatus::Rejected).with_reason(reason);

        let mut writes = JoinSet::new();
        {
            let scans = Arc::clone(&self.scans);
            let scan_id = scan_id.to_string();
            writes.spawn(async move { scans.write_scan(&scan_id, &update).await });
        }
        {
            let ledger = Arc::clone(&self.ledger);
            let user_id = scan.user_id.clone();
            writes.spawn(async move { ledger.adjust_clerk(&user_id, -points, -1).await });
        }
        match scan.pharmacy_id.clone() {
            Some(pharmacy_id) => {
                let ledger = Arc::clone(&self.ledger);
                writes.spawn(async move { ledger.adjust_pharmacy(&pharmacy_id, -points, -1).await });
            }
            None => warn!("Processed scan has no pharmacy id; pharmacy stats not reversed"),
        }

        join_writes(writes).await?;
        info!(points, reason, "Scan reversed");
        Ok(())
    }
}

/// Waits for every write and reports the first failure.
async fn join_writes(mut writes: JoinSet<Result<(), StoreError>>) -> PipelineResult<()> {
    let mut first_error = None;
    while let Some(joined) = writes.join_next().await {
        let failure = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => PipelineError::LedgerWrite(e.to_string()),
            Err(e) => PipelineError::Task(e.to_string()),
        };
        warn!(error = %failure, "Ledger write failed");
        first_error.get_or_insert(failure);
    }
    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProductFound, Role};
    use crate::store::SqliteStore;

    fn seeded() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user("clerk-1", Role::Clerk, None, &["ph1"]).unwrap();
        store.insert_user("repA", Role::SalesRep, None, &["ph1"]).unwrap();
        store.insert_pharmacy("ph1", "Farmacia Uno", &[("repA", &["OTC"])]).unwrap();
        store.insert_scan("scan-1", "clerk-1", Some("scans/1.jpg")).unwrap();
        Arc::new(store)
    }

    fn fields(points: i64) -> ProcessedFields {
        ProcessedFields {
            points_earned: points,
            products_found: vec![ProductFound {
                name: "Aspirina".into(),
                quantity: 2.0,
                unit_price: 50.0,
                commission_pct: 10.0,
                points,
                line: "OTC".into(),
            }],
            ncf: "B0100000001".into(),
            invoice_date: Some("2026-10-13".into()),
            pharmacy_id: "ph1".into(),
            sales_rep_rewards: BTreeMap::from([("repA".to_string(), points)]),
            expires_at: "2027-10-14T10:00:00-04:00".into(),
        }
    }

    fn updater(store: &Arc<SqliteStore>) -> LedgerUpdater {
        LedgerUpdater::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn apply_credits_every_party() {
        let store = seeded();
        updater(&store)
            .apply("scan-1", "clerk-1", serde_json::json!({}), fields(10))
            .await
            .unwrap();

        let scan = store.scan("scan-1").await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Processed);
        assert_eq!(scan.points_earned, 10);
        assert_eq!(scan.ncf.as_deref(), Some("B0100000001"));
        assert_eq!(scan.sales_rep_rewards["repA"], 10);

        assert_eq!(store.user_counters("clerk-1").unwrap(), (10, 1, 0));
        assert_eq!(store.user_counters("repA").unwrap(), (10, 0, 10));
        assert_eq!(store.pharmacy_counters("ph1").unwrap(), (1, 10, 10));
    }

    #[tokio::test]
    async fn zero_point_scan_still_counts_as_activity() {
        let store = seeded();
        updater(&store)
            .apply("scan-1", "clerk-1", serde_json::json!({}), fields(0))
            .await
            .unwrap();
        assert_eq!(store.user_counters("clerk-1").unwrap(), (0, 1, 0));
        assert_eq!(store.pharmacy_counters("ph1").unwrap(), (1, 0, 0));
        assert_eq!(store.user_counters("repA").unwrap(), (0, 0, 0));
    }

    #[tokio::test]
    async fn reversal_takes_back_exactly_what_was_credited() {
        let store = seeded();
        let ledger = updater(&store);
        ledger
            .apply("scan-1", "clerk-1", serde_json::json!({}), fields(25))
            .await
            .unwrap();
        ledger.reverse_scan("scan-1", "Forged invoice").await.unwrap();

        let scan = store.scan("scan-1").await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Rejected);
        assert_eq!(scan.rejection_reason.as_deref(), Some("Forged invoice"));
        assert_eq!(store.user_counters("clerk-1").unwrap(), (0, 0, 0));
        assert_eq!(store.pharmacy_counters("ph1").unwrap(), (0, 0, 0));
        // reps keep their credit
        assert_eq!(store.user_counters("repA").unwrap(), (25, 0, 25));
    }

    #[tokio::test]
    async fn only_processed_scans_can_be_reversed() {
        let store = seeded();
        let err = updater(&store).reverse_scan("scan-1", "x").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotReversible { .. }));

        let err = updater(&store).reverse_scan("missing", "x").await.unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::ScanNotFound(_))));
    }
}
