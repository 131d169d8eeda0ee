use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::BoundingBox;
use crate::invoice::InvoiceState;
use crate::receipt::{Category, PaymentMethod, TaxRate};

/// Which scan produced a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPass {
    Whole,
    Tile(u8),
    Rescan,
}

impl fmt::Display for ScanPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPass::Whole => write!(f, "whole"),
            ScanPass::Tile(i) => write!(f, "tile_{i}"),
            ScanPass::Rescan => write!(f, "rescan"),
        }
    }
}

/// A required field that is absent from a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    Date,
    Vendor,
    TotalAmount,
    TaxRate,
    PaymentMethod,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::Date => write!(f, "date"),
            MissingField::Vendor => write!(f, "vendor"),
            MissingField::TotalAmount => write!(f, "total_amount"),
            MissingField::TaxRate => write!(f, "tax_rate"),
            MissingField::PaymentMethod => write!(f, "payment_method"),
        }
    }
}

/// A low-confidence extraction that needs a human look even when every
/// required field is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewFlag {
    DateYearOutOfRange,
    InvoiceNoCandidate,
}

impl fmt::Display for ReviewFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewFlag::DateYearOutOfRange => write!(f, "date_year_out_of_range"),
            ReviewFlag::InvoiceNoCandidate => write!(f, "invoice_no_candidate"),
        }
    }
}

/// Backends write `"?"` when they cannot read the vendor name.
pub fn vendor_is_known(vendor: &str) -> bool {
    let v = vendor.trim();
    !v.is_empty() && v != "?"
}

/// Required fields absent from the given values, in a fixed order.
pub fn required_missing(
    date: &str,
    vendor: &str,
    total_amount: i64,
    tax_rate: TaxRate,
    payment_method: PaymentMethod,
) -> Vec<MissingField> {
    let mut missing = Vec::new();
    if date.trim().is_empty() {
        missing.push(MissingField::Date);
    }
    if !vendor_is_known(vendor) {
        missing.push(MissingField::Vendor);
    }
    if total_amount <= 0 {
        missing.push(MissingField::TotalAmount);
    }
    if !tax_rate.is_known() {
        missing.push(MissingField::TaxRate);
    }
    if !payment_method.is_known() {
        missing.push(MissingField::PaymentMethod);
    }
    missing
}

/// One backend's claim about one receipt in one image or tile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRecord {
    pub date: String,
    pub vendor: String,
    pub subject: String,
    /// Tax-inclusive total in yen.
    pub total_amount: i64,
    pub invoice_no_raw: String,
    pub tax_rate: TaxRate,
    pub payment_method: PaymentMethod,
    pub ocr_full_text: String,
    /// Detection box in the coordinate space of the scanned tile.
    pub box_2d: Option<BoundingBox>,
    /// `box_2d` re-expressed against the whole source image.
    pub global_box: Option<BoundingBox>,
    pub backend: String,
    pub segment_id: String,
    pub pass: ScanPass,
    pub invoice: InvoiceState,
    pub review_flags: Vec<ReviewFlag>,
}

impl DraftRecord {
    pub fn missing_fields(&self) -> Vec<MissingField> {
        required_missing(
            &self.date,
            &self.vendor,
            self.total_amount,
            self.tax_rate,
            self.payment_method,
        )
    }

    pub fn needs_review(&self) -> bool {
        !self.review_flags.is_empty() || !self.missing_fields().is_empty()
    }

    pub fn flag(&mut self, flag: ReviewFlag) {
        if !self.review_flags.contains(&flag) {
            self.review_flags.push(flag);
        }
    }
}

/// Audit snapshot of one draft that went into a reconciled record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub date: String,
    pub vendor: String,
    pub total_amount: i64,
    pub invoice: InvoiceState,
    pub needs_review: bool,
    pub pass: ScanPass,
    pub segment_id: String,
    pub backend: String,
}

impl From<&DraftRecord> for Provenance {
    fn from(d: &DraftRecord) -> Self {
        Provenance {
            date: d.date.clone(),
            vendor: d.vendor.clone(),
            total_amount: d.total_amount,
            invoice: d.invoice.clone(),
            needs_review: d.needs_review(),
            pass: d.pass,
            segment_id: d.segment_id.clone(),
            backend: d.backend.clone(),
        }
    }
}

/// The deduplicated, validated output unit handed to review and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub date: String,
    pub vendor: String,
    pub subject: String,
    pub total_amount: i64,
    pub invoice: InvoiceState,
    pub tax_rate: TaxRate,
    pub payment_method: PaymentMethod,
    pub category: Category,
    pub needs_review: bool,
    pub missing_fields: Vec<MissingField>,
    pub review_flags: Vec<ReviewFlag>,
    pub group_id: String,
    pub group_size: usize,
    pub merge_reason: String,
    pub merge_candidates: Vec<Provenance>,
    /// Detection box against the whole source image.
    pub region: Option<BoundingBox>,
    pub ocr_full_text: String,
    pub backend_used: String,
    pub segment_id: String,
}

impl ReconciledRecord {
    /// Promote a draft to a reconciled record carrying the given group metadata.
    pub fn from_draft(
        draft: DraftRecord,
        group_id: String,
        merge_reason: String,
        merge_candidates: Vec<Provenance>,
    ) -> Self {
        let mut record = ReconciledRecord {
            date: draft.date,
            vendor: draft.vendor,
            subject: draft.subject,
            total_amount: draft.total_amount,
            invoice: draft.invoice,
            tax_rate: draft.tax_rate,
            payment_method: draft.payment_method,
            category: Category::Unknown,
            needs_review: false,
            missing_fields: Vec::new(),
            review_flags: draft.review_flags,
            group_id,
            group_size: merge_candidates.len().max(1),
            merge_reason,
            merge_candidates,
            region: draft.global_box,
            ocr_full_text: draft.ocr_full_text,
            backend_used: draft.backend,
            segment_id: draft.segment_id,
        };
        record.refresh_validation();
        record
    }

    /// Recompute `missing_fields` and `needs_review` from the current values.
    /// Call after any field mutation.
    pub fn refresh_validation(&mut self) {
        if self.invoice.candidate().is_none() {
            self.review_flags.retain(|f| *f != ReviewFlag::InvoiceNoCandidate);
        } else if !self.review_flags.contains(&ReviewFlag::InvoiceNoCandidate) {
            self.review_flags.push(ReviewFlag::InvoiceNoCandidate);
        }
        self.missing_fields = required_missing(
            &self.date,
            &self.vendor,
            self.total_amount,
            self.tax_rate,
            self.payment_method,
        );
        self.needs_review = !self.missing_fields.is_empty() || !self.review_flags.is_empty();
    }

    /// Whether a confirmed invoice number is present (the `○` column on export).
    pub fn is_qualified(&self) -> bool {
        self.invoice.confirmed().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::InvoiceNumber;

    fn draft() -> DraftRecord {
        DraftRecord {
            date: "2026/02/08".into(),
            vendor: "ローソン".into(),
            subject: "昼食代".into(),
            total_amount: 980,
            invoice_no_raw: String::new(),
            tax_rate: TaxRate::Rate8Reduced,
            payment_method: PaymentMethod::Cash,
            ocr_full_text: String::new(),
            box_2d: None,
            global_box: None,
            backend: "mock".into(),
            segment_id: "whole_0".into(),
            pass: ScanPass::Whole,
            invoice: InvoiceState::None,
            review_flags: vec![],
        }
    }

    #[test]
    fn complete_draft_needs_no_review() {
        let d = draft();
        assert!(d.missing_fields().is_empty());
        assert!(!d.needs_review());
    }

    #[test]
    fn missing_fields_in_fixed_order() {
        let d = DraftRecord {
            date: String::new(),
            vendor: "?".into(),
            total_amount: 0,
            tax_rate: TaxRate::Unknown,
            payment_method: PaymentMethod::Unknown,
            ..draft()
        };
        assert_eq!(
            d.missing_fields(),
            vec![
                MissingField::Date,
                MissingField::Vendor,
                MissingField::TotalAmount,
                MissingField::TaxRate,
                MissingField::PaymentMethod,
            ]
        );
        assert!(d.needs_review());
    }

    #[test]
    fn review_flag_alone_forces_review() {
        let mut d = draft();
        d.flag(ReviewFlag::DateYearOutOfRange);
        d.flag(ReviewFlag::DateYearOutOfRange);
        assert_eq!(d.review_flags.len(), 1);
        assert!(d.needs_review());
    }

    #[test]
    fn refresh_validation_tracks_invoice_state() {
        let n = InvoiceNumber::parse("T1234567890123").unwrap();
        let mut d = draft();
        d.invoice = InvoiceState::Candidate(n.clone());
        let mut r = ReconciledRecord::from_draft(d, "single_0".into(), String::new(), vec![]);
        assert!(r.needs_review);
        assert!(r.review_flags.contains(&ReviewFlag::InvoiceNoCandidate));
        assert!(!r.is_qualified());

        r.invoice = InvoiceState::Confirmed(n);
        r.refresh_validation();
        assert!(!r.needs_review);
        assert!(r.review_flags.is_empty());
        assert!(r.is_qualified());

        r.vendor = String::new();
        r.refresh_validation();
        assert_eq!(r.missing_fields, vec![MissingField::Vendor]);
        assert!(r.needs_review);
    }

    #[test]
    fn scan_pass_display() {
        assert_eq!(ScanPass::Whole.to_string(), "whole");
        assert_eq!(ScanPass::Tile(3).to_string(), "tile_3");
    }
}
