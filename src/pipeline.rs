// src/pipeline.rs

use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

use crate::attribution::resolve_rep_rewards;
use crate::clock::{Clock, add_months, local_offset};
use crate::config::Rules;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{Extractor, VisionModel};
use crate::ledger::{LedgerStore, LedgerUpdater};
use crate::model::{ScanStatus, StatusChangeEvent};
use crate::points;
use crate::reference::{ReferenceData, ReferenceSnapshot};
use crate::scans::{ProcessedFields, ScanRepository, ScanUpdate};
use crate::validation::{ValidationChain, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event was not a fresh `uploaded` transition.
    Ignored,
    /// Another invocation already owns this scan.
    AlreadyClaimed,
    Processed { points: i64 },
    Rejected(String),
    PendingReview(String),
    /// The scan was marked `error` with this message.
    Failed(String),
}

pub struct InvoicePipeline {
    vision: Arc<dyn VisionModel>,
    reference: Arc<dyn ReferenceData>,
    scans: Arc<dyn ScanRepository>,
    ledger: LedgerUpdater,
    rules: Rules,
    clock: Arc<dyn Clock>,
}

impl InvoicePipeline {
    pub fn new(
        vision: Arc<dyn VisionModel>,
        reference: Arc<dyn ReferenceData>,
        scans: Arc<dyn ScanRepository>,
        ledger: Arc<dyn LedgerStore>,
        rules: Rules,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            vision,
            reference,
            ledger: LedgerUpdater::new(Arc::clone(&scans), ledger),
            scans,
            rules,
            clock,
        }
    }

    /// Handles one status-change event. Once the scan is claimed, every exit path
    /// leaves it in a terminal status; `Err` is returned only when the claim itself
    /// could not be attempted.
    pub async fn handle(&self, event: &StatusChangeEvent) -> PipelineResult<Outcome> {
        let span = info_span!("invoice_scan", scan_id = %event.scan_id);
        async {
            if !event.is_upload_transition() {
                info!(before = ?event.before.as_ref().and_then(|b| b.status.as_deref()),
                      after = ?event.after.status, "Not an upload transition; ignoring");
                return Ok(Outcome::Ignored);
            }
            if !self.scans.claim_scan(&event.scan_id).await? {
                info!("Scan already claimed or no longer uploaded; skipping");
                return Ok(Outcome::AlreadyClaimed);
            }

            let mut extracted = None;
            match self.process(event, &mut extracted).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    let message = e.to_string();
                    error!(error = %message, "Scan processing failed");
                    let mut update = ScanUpdate::error(message.clone());
                    if let Some(raw) = extracted {
                        update = update.with_ai_response(raw);
                    }
                    if let Err(write_err) = self.scans.write_scan(&event.scan_id, &update).await {
                        error!(error = %write_err, "Could not record error status");
                    }
                    Ok(Outcome::Failed(message))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// `extracted` receives the model's JSON as soon as extraction succeeds, so the
    /// error path can still store it.
    async fn process(
        &self,
        event: &StatusChangeEvent,
        extracted: &mut Option<serde_json::Value>,
    ) -> PipelineResult<Outcome> {
        let scan_id = event.scan_id.as_str();
        let stored = self.scans.scan(scan_id).await?;
        let user_id = event
            .after
            .user_id
            .clone()
            .or_else(|| stored.as_ref().map(|s| s.user_id.clone()))
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::MissingField("userId"))?;
        let image_ref = event
            .after
            .storage_path
            .clone()
            .or_else(|| stored.and_then(|s| s.storage_path));

        let reference = ReferenceSnapshot::load(self.reference.as_ref(), &user_id).await?;
        let extraction = Extractor::new(self.vision.as_ref())
            .invoice(
                image_ref.as_deref(),
                &reference.active_product_names(),
                &reference.pharmacy_names(),
            )
            .await?;
        *extracted = Some(extraction.raw.clone());

        let now = self
            .clock
            .now_utc()
            .to_offset(local_offset(self.rules.utc_offset_hours));
        let verdict = ValidationChain::new(&self.rules)
            .run(scan_id, &extraction.parsed, &reference, self.scans.as_ref(), now)
            .await?;

        let (pharmacy_id, ncf) = match verdict {
            Verdict::Rejected(reason) => {
                warn!(reason = %reason, "Scan rejected");
                self.scans
                    .write_scan(
                        scan_id,
                        &ScanUpdate::status(ScanStatus::Rejected)
                            .with_reason(reason.clone())
                            .with_ai_response(extraction.raw),
                    )
                    .await?;
                return Ok(Outcome::Rejected(reason));
            }
            Verdict::PendingReview(reason) => {
                info!(reason = %reason, "Scan flagged for review");
                self.scans
                    .write_scan(
                        scan_id,
                        &ScanUpdate::status(ScanStatus::PendingReview)
                            .with_reason(reason.clone())
                            .with_ai_response(extraction.raw),
                    )
                    .await?;
                return Ok(Outcome::PendingReview(reason));
            }
            Verdict::Approved { pharmacy_id, ncf } => (pharmacy_id, ncf),
        };

        let tally = points::tally(&extraction.parsed.products, &reference, &self.rules.default_line);
        let sales_rep_rewards = match reference.pharmacies.iter().find(|p| p.id == pharmacy_id) {
            Some(pharmacy) => {
                let reps = self.reference.sales_reps_for(&pharmacy_id).await?;
                resolve_rep_rewards(pharmacy, &reps, &tally.products_found)
            }
            None => Default::default(),
        };

        let expires_at = add_months(now, self.rules.expiry_months)
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| PipelineError::LedgerWrite(format!("could not format expiry: {e}")))?;

        let fields = ProcessedFields {
            points_earned: tally.total_points,
            products_found: tally.products_found,
            ncf,
            invoice_date: extraction.parsed.invoice_date.clone(),
            pharmacy_id,
            sales_rep_rewards,
            expires_at,
        };
        self.ledger
            .apply(scan_id, &user_id, extraction.raw, fields)
            .await?;

        info!(points = tally.total_points, "Scan processed");
        Ok(Outcome::Processed {
            points: tally.total_points,
        })
    }
}
