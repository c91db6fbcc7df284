// src/extract/mod.rs

pub mod client;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ExtractionError;
use crate::model::{ExtractedInvoice, IdCardData};

/// Black-box vision model: image reference + prompt in, raw text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, image_ref: &str, prompt: &str) -> Result<Option<String>, ExtractionError>;
}

const INVOICE_INSTRUCTIONS: &str = r#"You are reading a photographed pharmacy purchase invoice from the Dominican Republic.
Extract the data below and return ONLY a JSON object with exactly this shape:
{
  "pharmacyName": "string or null",
  "rawPharmacyName": "string",
  "ncf": "string or null",
  "invoiceDate": "YYYY-MM-DD or null",
  "totalAmount": number,
  "products": [
    { "name": "string", "quantity": number, "unitPrice": number }
  ],
  "confidence": "high | medium | low"
}

Rules:
- "pharmacyName" MUST be copied exactly from the registered pharmacy list below, or be null when the invoice does not clearly belong to one of them. Never return a variant spelling.
- "rawPharmacyName" is the pharmacy or business name as printed on the invoice, even when it matches no registered pharmacy.
- "ncf" is the fiscal receipt number (Numero de Comprobante Fiscal), for example B0100000001 or E310000000001. Use null if it is not legible.
- "invoiceDate" is the issue date of the invoice in YYYY-MM-DD format.
- "totalAmount" is the invoice grand total as a plain number without currency symbols.
- Only include products whose name matches one of the registered products below; use the registered name exactly. Skip every other line.
- "quantity" is the number of units sold and "unitPrice" the price of one unit.
- Return ONLY the JSON object, no commentary."#;

const ID_CARD_PROMPT: &str = r#"You are reading a photographed identity document (Dominican cedula or similar).
Return ONLY a JSON object with exactly this shape:
{ "name": "full name as printed or null", "idNumber": "document number or null", "confidence": "high | medium | low" }
Return ONLY the JSON object, no commentary."#;

/// Composes the invoice prompt around the current registered name lists.
pub fn invoice_prompt(product_names: &[&str], pharmacy_names: &[&str]) -> String {
    format!(
        "{INVOICE_INSTRUCTIONS}\n\nRegistered products: {}\n\nRegistered pharmacies: {}",
        product_names.join(", "),
        pharmacy_names.join(", ")
    )
}

/// The model's output alongside its parsed form; `raw` is kept for the audit trail.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub parsed: T,
    pub raw: serde_json::Value,
}

pub struct Extractor<'a> {
    model: &'a dyn VisionModel,
}

impl<'a> Extractor<'a> {
    pub fn new(model: &'a dyn VisionModel) -> Self {
        Self { model }
    }

    pub async fn invoice(
        &self,
        image_ref: Option<&str>,
        product_names: &[&str],
        pharmacy_names: &[&str],
    ) -> Result<Extraction<ExtractedInvoice>, ExtractionError> {
        let prompt = invoice_prompt(product_names, pharmacy_names);
        let extraction: Extraction<ExtractedInvoice> = self.run(image_ref, &prompt).await?;
        info!(
            pharmacy = ?extraction.parsed.pharmacy_name,
            ncf = ?extraction.parsed.ncf,
            total_amount = ?extraction.parsed.total_amount,
            products = extraction.parsed.products.len(),
            confidence = ?extraction.parsed.confidence,
            "Invoice extraction result"
        );
        Ok(extraction)
    }

    pub async fn id_card(&self, image_ref: Option<&str>) -> Result<Extraction<IdCardData>, ExtractionError> {
        self.run(image_ref, ID_CARD_PROMPT).await
    }

    async fn run<T: DeserializeOwned>(
        &self,
        image_ref: Option<&str>,
        prompt: &str,
    ) -> Result<Extraction<T>, ExtractionError> {
        let image_ref = image_ref
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ExtractionError::MissingImageReference)?;

        let text = self
            .model
            .complete(image_ref, prompt)
            .await?
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExtractionError::EmptyResponse)?;
        debug!(chars = text.len(), "Vision model replied");

        parse_model_json(&text)
    }
}

/// Strips code fences and surrounding prose, then parses the JSON object.
pub fn parse_model_json<T: DeserializeOwned>(content: &str) -> Result<Extraction<T>, ExtractionError> {
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = extract_json_object(json_str).ok_or_else(|| ExtractionError::InvalidJson {
        reason: "no JSON object in response".to_string(),
        raw: content.to_string(),
    })?;

    let raw: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| ExtractionError::InvalidJson {
            reason: e.to_string(),
            raw: content.to_string(),
        })?;
    let parsed = T::deserialize(&raw).map_err(|e| ExtractionError::InvalidJson {
        reason: e.to_string(),
        raw: content.to_string(),
    })?;

    Ok(Extraction { parsed, raw })
}

/// Outermost `{ ... }` of a string that may carry leading reasoning text.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}


#[cfg(test)]
mod tests {
    use super::testing::CannedVision;
    use super::*;

    #[test]
    fn strips_fences_and_parses() {
        let reply = "```json\n{\"pharmacyName\": \"Farmacia Carol\", \"totalAmount\": 500}\n```";
        let out: Extraction<ExtractedInvoice> = parse_model_json(reply).unwrap();
        assert_eq!(out.parsed.pharmacy_name.as_deref(), Some("Farmacia Carol"));
        assert_eq!(out.raw["totalAmount"], 500);
    }

    #[test]
    fn leading_prose_is_discarded() {
        let reply = "Sure! Here is the data:\n{\"ncf\": \"B0100000001\"}\nLet me know.";
        let out: Extraction<ExtractedInvoice> = parse_model_json(reply).unwrap();
        assert_eq!(out.parsed.ncf.as_deref(), Some("B0100000001"));
    }

    #[test]
    fn non_json_reply_is_invalid() {
        let err = parse_model_json::<ExtractedInvoice>("I cannot read this image.").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson { .. }));

        let err = parse_model_json::<ExtractedInvoice>("{ not json }").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson { .. }));
    }

    #[test]
    fn prompt_embeds_name_lists() {
        let prompt = invoice_prompt(&["Aspirina", "Ibuprofeno"], &["Farmacia Carol"]);
        assert!(prompt.contains("Registered products: Aspirina, Ibuprofeno"));
        assert!(prompt.contains("Registered pharmacies: Farmacia Carol"));
    }

    #[tokio::test]
    async fn missing_image_reference_fails_without_calling_model() {
        let model = CannedVision::replying("{}");
        let err = Extractor::new(&model).invoice(Some("  "), &[], &[]).await.unwrap_err();
        assert!(matches!(err, ExtractionError::MissingImageReference));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn empty_model_reply_fails() {
        let model = CannedVision::silent();
        let err = Extractor::new(&model).invoice(Some("scans/a.jpg"), &[], &[]).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResponse));

        let model = CannedVision::replying("   ");
        let err = Extractor::new(&model).id_card(Some("ids/a.jpg")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyResponse));
    }

    #[tokio::test]
    async fn id_card_reply_is_parsed() {
        let model = CannedVision::replying(r#"{"name": "Ana Perez", "idNumber": "001-0000000-1", "confidence": "high"}"#);
        let out = Extractor::new(&model).id_card(Some("ids/a.jpg")).await.unwrap();
        assert_eq!(out.parsed.name.as_deref(), Some("Ana Perez"));
        assert_eq!(out.parsed.id_number.as_deref(), Some("001-0000000-1"));
    }
}
