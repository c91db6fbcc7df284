use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::model::{IdCardData, InvoiceScan, ProductFound, ScanStatus};

/// Fields written only when a scan is processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFields {
    pub points_earned: i64,
    pub products_found: Vec<ProductFound>,
    pub ncf: String,
    pub invoice_date: Option<String>,
    pub pharmacy_id: String,
    pub sales_rep_rewards: BTreeMap<String, i64>,
    pub expires_at: String,
}

/// One write of a scan's outcome. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanUpdate {
    pub status: ScanStatus,
    pub rejection_reason: Option<String>,
    pub error_message: Option<String>,
    pub ai_response: Option<serde_json::Value>,
    pub processed: Option<ProcessedFields>,
}

impl ScanUpdate {
    pub fn status(status: ScanStatus) -> Self {
        Self {
            status,
            rejection_reason: None,
            error_message: None,
            ai_response: None,
            processed: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::status(ScanStatus::Error)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }

    pub fn with_ai_response(mut self, raw: serde_json::Value) -> Self {
        self.ai_response = Some(raw);
        self
    }
}

#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn scan(&self, scan_id: &str) -> Result<Option<InvoiceScan>, StoreError>;

    /// Marks an `uploaded`, unclaimed scan as taken. False when another run already owns it.
    async fn claim_scan(&self, scan_id: &str) -> Result<bool, StoreError>;

    /// Stores `ncf` on the scan unless any other scan system-wide already carries it.
    /// The check and the write happen in one statement. False means the NCF is taken.
    async fn reserve_ncf(&self, scan_id: &str, ncf: &str) -> Result<bool, StoreError>;

    async fn write_scan(&self, scan_id: &str, update: &ScanUpdate) -> Result<(), StoreError>;
}

#[async_trait]
pub trait IdScanRepository: Send + Sync {
    async fn claim_id_scan(&self, scan_id: &str) -> Result<bool, StoreError>;

    /// Stored image path of the ID scan, if the record has one.
    async fn id_scan_image(&self, scan_id: &str) -> Result<Option<String>, StoreError>;

    async fn complete_id_scan(&self, scan_id: &str, data: &IdCardData) -> Result<(), StoreError>;

    async fn fail_id_scan(&self, scan_id: &str, message: &str) -> Result<(), StoreError>;
}
