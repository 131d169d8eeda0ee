//! Qualified-invoice registration number (`T` + 13 digits) recovery.
//!
//! Search order: the backend's own suggestion, then the neighbourhood of a
//! registration label in the OCR text, then the whole text. Anything not
//! taken verbatim from a clean 13-digit hit is returned at low confidence.

use ryoshu_core::{Confidence, InvoiceNumber, InvoiceState};
use unicode_normalization::UnicodeNormalization;

use super::{char_window, re};

/// Labels printed next to the registration number on Japanese receipts.
const INVOICE_LABELS: &[&str] = &["登録番号", "適格請求書発行事業者", "適格請求書", "インボイス"];

/// Characters either side of a label that are searched.
const LABEL_WINDOW: usize = 60;

/// Tokens after a `T` that the block merge will try to join.
const MERGE_LOOKAHEAD: usize = 7;

re!(re_invoice_loose, r"[TＴ][0-9０-９\-ー－−–—‐\s]{10,}");
re!(re_invoice_token, r"[TＴ]|[0-9０-９]+");
re!(re_invoice_noise, r"[\-−ー–—‐‑‒―⁃₋﹣－\s\u{3000}]");

/// Which search stage produced the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceSource {
    Hint,
    LabelWindow,
    TokenMerge,
    FullText,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct InvoiceExtraction {
    pub number: Option<InvoiceNumber>,
    pub confidence: Confidence,
    pub source: InvoiceSource,
    /// Human-readable account of each stage, for debug logs.
    pub trace: String,
}

impl InvoiceExtraction {
    pub fn state(&self) -> InvoiceState {
        InvoiceState::from_extraction(self.number.clone(), self.confidence)
    }

    fn found(number: InvoiceNumber, confidence: Confidence, source: InvoiceSource, trace: String) -> Self {
        InvoiceExtraction { number: Some(number), confidence, source, trace }
    }
}

/// Canonicalize a raw candidate such as `"Ｔ１２３４－５６７８－９０１２３"`.
///
/// Width is folded, dashes and whitespace are dropped, and the digit run
/// after the leading `T` must be 13 long. A 12-digit run is left-padded with
/// `0` and a 14-digit run starting with `0` loses it; both come back as
/// [`Confidence::Low`].
pub fn normalize_invoice_candidate(raw: &str) -> Option<(InvoiceNumber, Confidence)> {
    if raw.is_empty() {
        return None;
    }
    let folded: String = raw.nfkc().collect();
    let compact = re_invoice_noise().replace_all(&folded, "");
    let rest = compact.strip_prefix('T')?;
    let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();

    let (canonical, confidence) = match digits.len() {
        13 => (format!("T{digits}"), Confidence::High),
        12 => (format!("T0{digits}"), Confidence::Low),
        14 if digits.starts_with('0') => (format!("T{}", &digits[1..]), Confidence::Low),
        _ => return None,
    };
    InvoiceNumber::parse(&canonical).ok().map(|n| (n, confidence))
}

/// Recover the registration number from OCR text, preferring `hint`.
pub fn extract_invoice(ocr_text: &str, hint: &str) -> InvoiceExtraction {
    let mut trace = String::new();

    if !hint.is_empty() {
        if let Some((n, conf)) = normalize_invoice_candidate(hint) {
            trace.push_str(&format!("accepted backend value {hint:?} as {n}"));
            return InvoiceExtraction::found(n, conf, InvoiceSource::Hint, trace);
        }
        trace.push_str(&format!("backend value {hint:?} rejected; "));
    }

    if ocr_text.is_empty() {
        trace.push_str("no OCR text");
        return not_found(trace);
    }

    let mut windows = Vec::new();
    for label in INVOICE_LABELS {
        for (start, _) in ocr_text.match_indices(*label) {
            windows.push((*label, char_window(ocr_text, start, start + label.len(), LABEL_WINDOW)));
        }
    }
    if !windows.is_empty() {
        trace.push_str(&format!("{} label window(s); ", windows.len()));
    }

    for (label, window) in windows {
        for m in re_invoice_loose().find_iter(window) {
            if let Some((n, conf)) = normalize_invoice_candidate(m.as_str()) {
                trace.push_str(&format!("near {label}: {:?} -> {n}", m.as_str().trim()));
                return InvoiceExtraction::found(n, conf, InvoiceSource::LabelWindow, trace);
            }
        }
        if let Some((n, joined)) = merge_token_blocks(window) {
            trace.push_str(&format!("near {label}: merged blocks {joined:?} -> {n}"));
            return InvoiceExtraction::found(n, Confidence::Low, InvoiceSource::TokenMerge, trace);
        }
    }

    for m in re_invoice_loose().find_iter(ocr_text) {
        if let Some((n, _)) = normalize_invoice_candidate(m.as_str()) {
            trace.push_str(&format!("full-text hit {:?} -> {n}", m.as_str().trim()));
            return InvoiceExtraction::found(n, Confidence::Low, InvoiceSource::FullText, trace);
        }
    }

    trace.push_str("no candidate");
    not_found(trace)
}

fn not_found(trace: String) -> InvoiceExtraction {
    InvoiceExtraction {
        number: None,
        confidence: Confidence::Low,
        source: InvoiceSource::NotFound,
        trace,
    }
}

/// Join a `T` token with the digit blocks that follow it when OCR has broken
/// the number apart with stray separators.
fn merge_token_blocks(window: &str) -> Option<(InvoiceNumber, String)> {
    let tokens: Vec<&str> = re_invoice_token().find_iter(window).map(|m| m.as_str()).collect();

    for (i, token) in tokens.iter().enumerate() {
        if !matches!(token.chars().next(), Some('T' | 'Ｔ')) {
            continue;
        }
        let mut joined = token.to_string();
        let mut digit_count = 0;
        for next in tokens.iter().skip(i + 1).take(MERGE_LOOKAHEAD) {
            joined.push_str(next);
            digit_count += next.chars().filter(|c| is_any_digit(*c)).count();
            if (12..=14).contains(&digit_count) {
                if let Some((n, _)) = normalize_invoice_candidate(&joined) {
                    return Some((n, joined));
                }
            }
            if digit_count > 14 {
                break;
            }
        }
    }
    None
}

fn is_any_digit(c: char) -> bool {
    c.is_ascii_digit() || ('０'..='９').contains(&c)
}
