// src/validation.rs
// Order: pharmacy named, products present, NCF format, NCF unique, date, amount,
// review gate, authorization. Date and amount only flag; the rest reject.

use regex::Regex;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::debug;

use crate::config::Rules;
use crate::error::StoreError;
use crate::model::ExtractedInvoice;
use crate::reference::ReferenceSnapshot;
use crate::scans::ScanRepository;

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    ReviewFlagged(String),
    Rejected(String),
}

/// Final classification of the invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Rejected(String),
    PendingReview(String),
    Approved { pharmacy_id: String, ncf: String },
}

/// Folds review-level outcomes left to right: the first rejection wins outright,
/// otherwise the first review reason is kept and later ones are dropped.
pub fn fold_outcomes(outcomes: impl IntoIterator<Item = CheckOutcome>) -> CheckOutcome {
    let mut folded = CheckOutcome::Passed;
    for outcome in outcomes {
        match outcome {
            CheckOutcome::Rejected(_) => return outcome,
            CheckOutcome::ReviewFlagged(_) if folded == CheckOutcome::Passed => folded = outcome,
            _ => {}
        }
    }
    folded
}

pub struct ValidationChain<'r> {
    rules: &'r Rules,
    ncf_pattern: Option<Regex>,
}

impl<'r> ValidationChain<'r> {
    pub fn new(rules: &'r Rules) -> Self {
        let alternatives: Vec<String> = rules
            .valid_ncf_prefixes
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(p))
            .collect();
        let ncf_pattern = (!alternatives.is_empty())
            .then(|| Regex::new(&format!("(?i)^(?:{})", alternatives.join("|"))).ok())
            .flatten();
        Self { rules, ncf_pattern }
    }

    pub async fn run(
        &self,
        scan_id: &str,
        invoice: &ExtractedInvoice,
        reference: &ReferenceSnapshot,
        scans: &dyn ScanRepository,
        now: OffsetDateTime,
    ) -> Result<Verdict, StoreError> {
        if let CheckOutcome::Rejected(reason) = check_pharmacy_named(invoice) {
            return Ok(Verdict::Rejected(reason));
        }
        if let CheckOutcome::Rejected(reason) = check_products_present(invoice) {
            return Ok(Verdict::Rejected(reason));
        }
        let ncf = match self.check_ncf_format(invoice.ncf.as_deref()) {
            Ok(ncf) => ncf,
            Err(reason) => return Ok(Verdict::Rejected(reason)),
        };
        if let CheckOutcome::Rejected(reason) = check_ncf_unique(scan_id, &ncf, scans).await? {
            return Ok(Verdict::Rejected(reason));
        }

        let review = fold_outcomes([
            check_invoice_date(invoice.invoice_date.as_deref(), now.date()),
            check_total_amount(invoice.total_amount, self.rules.min_total_amount),
        ]);
        if let CheckOutcome::ReviewFlagged(reason) = review {
            return Ok(Verdict::PendingReview(reason));
        }

        // Step 1 guarantees a non-empty name.
        let pharmacy_name = invoice.pharmacy_name.as_deref().unwrap_or_default().trim();
        match check_authorized(pharmacy_name, reference) {
            Ok(pharmacy_id) => {
                debug!(pharmacy_id = %pharmacy_id, ncf = %ncf, "Validation passed");
                Ok(Verdict::Approved { pharmacy_id, ncf })
            }
            Err(reason) => Ok(Verdict::Rejected(reason)),
        }
    }

    /// Returns the normalized (trimmed, upper-cased) NCF when its prefix is valid.
    pub fn check_ncf_format(&self, ncf: Option<&str>) -> Result<String, String> {
        let Some(ncf) = ncf.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err("Invoice has no legible NCF".to_string());
        };
        match &self.ncf_pattern {
            Some(re) if re.is_match(ncf) => Ok(ncf.to_uppercase()),
            _ => Err(format!("Invalid NCF format: {ncf}")),
        }
    }
}

pub fn check_pharmacy_named(invoice: &ExtractedInvoice) -> CheckOutcome {
    let named = invoice
        .pharmacy_name
        .as_deref()
        .is_some_and(|n| !n.trim().is_empty());
    if named {
        return CheckOutcome::Passed;
    }
    let guess = invoice
        .raw_pharmacy_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unidentified");
    CheckOutcome::Rejected(format!("Pharmacy not registered in the program: {guess}"))
}

pub fn check_products_present(invoice: &ExtractedInvoice) -> CheckOutcome {
    if invoice.products.is_empty() {
        CheckOutcome::Rejected("No participating products found on the invoice".to_string())
    } else {
        CheckOutcome::Passed
    }
}

/// Reserves the NCF for this scan when no other scan holds it.
pub async fn check_ncf_unique(
    scan_id: &str,
    ncf: &str,
    scans: &dyn ScanRepository,
) -> Result<CheckOutcome, StoreError> {
    if scans.reserve_ncf(scan_id, ncf).await? {
        Ok(CheckOutcome::Passed)
    } else {
        Ok(CheckOutcome::Rejected(format!(
            "Duplicate invoice: NCF {ncf} was already submitted"
        )))
    }
}

/// Parses `YYYY-MM-DD`, ignoring any time part after a `T`.
pub fn parse_invoice_date(raw: &str) -> Option<Date> {
    let day = raw.trim().split('T').next()?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

pub fn check_invoice_date(raw: Option<&str>, today: Date) -> CheckOutcome {
    match raw.and_then(parse_invoice_date) {
        None => CheckOutcome::ReviewFlagged(format!(
            "Invoice date could not be read: {}",
            raw.unwrap_or("missing")
        )),
        Some(date) if date > today => {
            CheckOutcome::ReviewFlagged(format!("Invoice date {date} is in the future"))
        }
        Some(_) => CheckOutcome::Passed,
    }
}

pub fn check_total_amount(total: Option<f64>, minimum: f64) -> CheckOutcome {
    match total {
        Some(amount) if amount != 0.0 && amount >= minimum => CheckOutcome::Passed,
        Some(amount) => CheckOutcome::ReviewFlagged(format!(
            "Invoice total {amount:.2} is below the minimum of {minimum:.2}"
        )),
        None => CheckOutcome::ReviewFlagged("Invoice total could not be read".to_string()),
    }
}

/// Resolves the pharmacy id and checks the clerk is registered there.
pub fn check_authorized(pharmacy_name: &str, reference: &ReferenceSnapshot) -> Result<String, String> {
    let Some(pharmacy) = reference.pharmacy_named(pharmacy_name) else {
        return Err(format!("Pharmacy not registered in the program: {pharmacy_name}"));
    };
    let allowed = reference
        .user
        .as_ref()
        .map(|u| u.allowed_pharmacies())
        .unwrap_or_default();
    if allowed.contains(&pharmacy.id.as_str()) {
        Ok(pharmacy.id.clone())
    } else {
        Err(format!(
            "You are not registered at {}; invoices from this pharmacy cannot earn you points",
            pharmacy.name
        ))
    }
}
