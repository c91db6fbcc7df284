// Identity-document scans: extract and copy, no validation.

use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

use crate::error::PipelineResult;
use crate::extract::{Extractor, VisionModel};
use crate::model::StatusChangeEvent;
use crate::pipeline::Outcome;
use crate::scans::IdScanRepository;

pub struct IdCardPipeline {
    vision: Arc<dyn VisionModel>,
    scans: Arc<dyn IdScanRepository>,
}

impl IdCardPipeline {
    pub fn new(vision: Arc<dyn VisionModel>, scans: Arc<dyn IdScanRepository>) -> Self {
        Self { vision, scans }
    }

    pub async fn handle(&self, event: &StatusChangeEvent) -> PipelineResult<Outcome> {
        let span = info_span!("id_scan", scan_id = %event.scan_id);
        async {
            if !event.is_upload_transition() {
                return Ok(Outcome::Ignored);
            }
            if !self.scans.claim_id_scan(&event.scan_id).await? {
                info!("ID scan already claimed; skipping");
                return Ok(Outcome::AlreadyClaimed);
            }

            let image_ref = match &event.after.storage_path {
                Some(path) => Ok(Some(path.clone())),
                None => self.scans.id_scan_image(&event.scan_id).await,
            };
            let written = match image_ref {
                Ok(image_ref) => self.extract_and_store(&event.scan_id, image_ref.as_deref()).await,
                Err(e) => Err(e.to_string()),
            };

            match written {
                Ok(outcome) => {
                    info!("ID scan processed");
                    Ok(outcome)
                }
                Err(message) => {
                    error!(error = %message, "ID scan failed");
                    if let Err(write_err) = self.scans.fail_id_scan(&event.scan_id, &message).await {
                        error!(error = %write_err, "Could not record error status");
                    }
                    Ok(Outcome::Failed(message))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn extract_and_store(&self, scan_id: &str, image_ref: Option<&str>) -> Result<Outcome, String> {
        let extraction = Extractor::new(self.vision.as_ref())
            .id_card(image_ref)
            .await
            .map_err(|e| e.to_string())?;
        self.scans
            .complete_id_scan(scan_id, &extraction.parsed)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Outcome::Processed { points: 0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::testing::CannedVision;
    use crate::model::ScanSnapshot;
    use crate::store::SqliteStore;

    fn event(path: Option<&str>) -> StatusChangeEvent {
        StatusChangeEvent {
            scan_id: "id-1".into(),
            before: None,
            after: ScanSnapshot {
                status: Some("uploaded".into()),
                user_id: Some("clerk-1".into()),
                storage_path: path.map(str::to_string),
            },
        }
    }

    #[tokio::test]
    async fn copies_extracted_fields_verbatim() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_id_scan("id-1", "clerk-1", Some("ids/1.jpg")).unwrap();
        let vision = Arc::new(CannedVision::replying(
            r#"```json
{"name": "Ana Perez", "idNumber": "001-1234567-8", "confidence": "medium"}
```"#,
        ));
        let pipeline = IdCardPipeline::new(vision, store.clone());

        let outcome = pipeline.handle(&event(Some("ids/1.jpg"))).await.unwrap();
        assert_eq!(outcome, Outcome::Processed { points: 0 });

        let (status, data, _) = store.id_scan_row("id-1").unwrap();
        assert_eq!(status, "processed");
        let data: serde_json::Value = serde_json::from_str(&data.unwrap()).unwrap();
        assert_eq!(data["idNumber"], "001-1234567-8");

        assert_eq!(pipeline.handle(&event(Some("ids/1.jpg"))).await.unwrap(), Outcome::AlreadyClaimed);
    }

    #[tokio::test]
    async fn image_falls_back_to_the_stored_record() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_id_scan("id-1", "clerk-1", Some("ids/1.jpg")).unwrap();
        let vision = Arc::new(CannedVision::replying(r#"{"name": "Ana Perez", "idNumber": "1"}"#));

        let outcome = IdCardPipeline::new(vision.clone(), store.clone())
            .handle(&event(None))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Processed { points: 0 });
        assert_eq!(vision.calls(), 1);
        assert_eq!(store.id_scan_row("id-1").unwrap().0, "processed");
    }

    #[tokio::test]
    async fn failures_mark_error() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_id_scan("id-1", "clerk-1", None).unwrap();
        let pipeline = IdCardPipeline::new(Arc::new(CannedVision::replying("{}")), store.clone());

        let outcome = pipeline.handle(&event(None)).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
        let (status, _, message) = store.id_scan_row("id-1").unwrap();
        assert_eq!(status, "error");
        assert_eq!(message.as_deref(), Some("scan has no image reference"));
    }
}
