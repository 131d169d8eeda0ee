//! Deterministic post-OCR field normalizers.
//!
//! The backend returns a suggested value for each field alongside the full
//! recognized text. These normalizers re-derive the two fields that matter
//! most for bookkeeping from that text and decide how far to trust them.

pub mod date;
pub mod invoice;

use ryoshu_core::{DraftRecord, InvoiceState, ReviewFlag};
use tracing::debug;

pub use date::{current_year, extract_best_date, DateCandidate, DateExtraction};
pub use invoice::{extract_invoice, normalize_invoice_candidate, InvoiceExtraction, InvoiceSource};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static ::regex::Regex {
            static R: ::std::sync::OnceLock<::regex::Regex> = ::std::sync::OnceLock::new();
            R.get_or_init(|| ::regex::Regex::new($pat).expect("invalid regex"))
        }
    };
}
pub(crate) use re;

/// Run both normalizers over a freshly created draft.
pub fn normalize_draft(draft: &mut DraftRecord, current_year: i32) {
    let invoice = extract_invoice(&draft.ocr_full_text, &draft.invoice_no_raw);
    debug!(segment = %draft.segment_id, vendor = %draft.vendor, "invoice: {}", invoice.trace);
    draft.invoice = invoice.state();
    if matches!(draft.invoice, InvoiceState::Candidate(_)) {
        draft.flag(ReviewFlag::InvoiceNoCandidate);
    }

    let date = extract_best_date(&draft.ocr_full_text, &draft.date, current_year);
    if date.date != draft.date {
        debug!(segment = %draft.segment_id, vendor = %draft.vendor, "date: {}", date.trace);
    }
    // An empty date is already reported as a missing field.
    if date.needs_review && !date.date.is_empty() {
        draft.flag(ReviewFlag::DateYearOutOfRange);
    }
    draft.date = date.date;
}

// ── Character-offset helpers ──────────────────────────────────────────────────
//
// Window sizes and label distances count characters, not bytes, so that
// Japanese text behaves the same as ASCII.

/// Slice of `text` spanning `radius` characters either side of `start..end`.
pub(crate) fn char_window(text: &str, start: usize, end: usize, radius: usize) -> &str {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(radius)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    &text[from..to]
}

/// Character index of byte offset `byte` in `text`.
pub(crate) fn char_pos(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ryoshu_core::{PaymentMethod, ScanPass, TaxRate};

    fn draft(text: &str, date: &str, hint: &str) -> DraftRecord {
        DraftRecord {
            date: date.into(),
            vendor: "タクシー".into(),
            subject: String::new(),
            total_amount: 1200,
            invoice_no_raw: hint.into(),
            tax_rate: TaxRate::Rate10,
            payment_method: PaymentMethod::Cash,
            ocr_full_text: text.into(),
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
    fn char_window_counts_characters() {
        let text = "あいうえおKEYかきくけこ";
        let start = text.find("KEY").unwrap();
        let w = char_window(text, start, start + 3, 2);
        assert_eq!(w, "えおKEYかき");
        assert_eq!(char_window(text, start, start + 3, 50), text);
    }

    #[test]
    fn char_pos_counts_multibyte() {
        let text = "日付 2026";
        assert_eq!(char_pos(text, text.find('2').unwrap()), 3);
    }

    #[test]
    fn normalize_draft_confirms_and_rescores() {
        let mut d = draft("登録番号 T1234567890123\n日付 2026/02/08", "2025/01/01", "");
        normalize_draft(&mut d, 2026);
        assert_eq!(d.invoice.confirmed().map(|n| n.as_str()), Some("T1234567890123"));
        assert_eq!(d.date, "2026/02/08");
        assert!(d.review_flags.is_empty());
        assert!(!d.needs_review());
    }

    #[test]
    fn normalize_draft_flags_low_confidence() {
        let mut d = draft("T123456789012。2015/03/03", "", "");
        normalize_draft(&mut d, 2026);
        assert_eq!(d.invoice.candidate().map(|n| n.as_str()), Some("T0123456789012"));
        assert_eq!(d.date, "2015/03/03");
        assert!(d.review_flags.contains(&ReviewFlag::InvoiceNoCandidate));
        assert!(d.review_flags.contains(&ReviewFlag::DateYearOutOfRange));
    }

    #[test]
    fn normalize_draft_without_any_date_reports_missing_field() {
        let mut d = draft("", "", "");
        normalize_draft(&mut d, 2026);
        assert!(d.review_flags.is_empty());
        assert!(d.needs_review());
    }
}
