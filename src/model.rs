use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Uploading,
    Uploaded,
    Processed,
    Rejected,
    PendingReview,
    Error,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Processed => "processed",
            Self::Rejected => "rejected",
            Self::PendingReview => "pending_review",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "uploaded" => Some(Self::Uploaded),
            "processed" => Some(Self::Processed),
            "rejected" => Some(Self::Rejected),
            "pending_review" => Some(Self::PendingReview),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted invoice scan.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceScan {
    pub id: String,
    pub user_id: String,
    pub storage_path: Option<String>,
    pub status: ScanStatus,
    pub pharmacy_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub error_message: Option<String>,
    pub ai_response: Option<serde_json::Value>,
    pub points_earned: i64,
    pub products_found: Vec<ProductFound>,
    pub ncf: Option<String>,
    pub invoice_date: Option<String>,
    pub expires_at: Option<String>,
    pub sales_rep_rewards: BTreeMap<String, i64>,
}

/// One priced line item credited on a processed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFound {
    pub name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub commission_pct: f64,
    pub points: i64,
    pub line: String,
}

/// Structured invoice data as returned by the vision model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedInvoice {
    pub pharmacy_name: Option<String>,
    pub raw_pharmacy_name: Option<String>,
    pub ncf: Option<String>,
    pub invoice_date: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub total_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_products")]
    pub products: Vec<ExtractedProduct>,
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedProduct {
    pub name: String,
    #[serde(deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
}

/// Data read off an identity document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdCardData {
    pub name: Option<String>,
    pub id_number: Option<String>,
    pub confidence: Option<String>,
}

/// Accepts a JSON number or a numeric string ("1,250.00"); anything else reads as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite()))
}

/// `null` or a non-array reads as an empty list.
fn lenient_products<'de, D>(deserializer: D) -> Result<Vec<ExtractedProduct>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
}

impl ProductStatus {
    #[cfg(test)]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Unknown values are treated as active.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inactive") {
            Self::Inactive
        } else {
            Self::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub line: Option<String>,
    /// Percent of the sale value, 0 to 100.
    pub commission: f64,
    /// Legacy flat points per unit, used only when `commission == 0`.
    pub points: i64,
    pub status: ProductStatus,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pharmacy {
    pub id: String,
    pub name: String,
    /// repId -> product lines that rep is credited for here.
    pub rep_assignments: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Clerk,
    SalesRep,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clerk => "clerk",
            Self::SalesRep => "salesRep",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "salesRep" => Self::SalesRep,
            "admin" => Self::Admin,
            _ => Self::Clerk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserProfile {
    pub id: String,
    pub role: Role,
    /// Legacy single-pharmacy registration.
    pub pharmacy_id: Option<String>,
    pub assigned_pharmacies: Vec<String>,
}

impl UserProfile {
    /// `assignedPharmacies` merged with the legacy `pharmacyId`.
    pub fn allowed_pharmacies(&self) -> Vec<&str> {
        let mut allowed: Vec<&str> = self.assigned_pharmacies.iter().map(String::as_str).collect();
        if let Some(legacy) = self.pharmacy_id.as_deref() {
            if !legacy.is_empty() && !allowed.contains(&legacy) {
                allowed.push(legacy);
            }
        }
        allowed
    }
}

/// Before/after snapshot of a scan record, as delivered by the upload layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub status: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub storage_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChangeEvent {
    pub scan_id: String,
    #[serde(default)]
    pub before: Option<ScanSnapshot>,
    pub after: ScanSnapshot,
}

impl StatusChangeEvent {
    /// True only for a fresh transition into `uploaded`.
    pub fn is_upload_transition(&self) -> bool {
        let uploaded = ScanStatus::Uploaded.as_str();
        let became_uploaded = self.after.status.as_deref() == Some(uploaded);
        let was_uploaded = self
            .before
            .as_ref()
            .and_then(|b| b.status.as_deref())
            .is_some_and(|s| s == uploaded);
        became_uploaded && !was_uploaded
    }
}
