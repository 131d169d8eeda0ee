//! Tolerant decoding of backend replies.
//!
//! Models are asked for a bare JSON array but routinely wrap it in a code
//! fence, return a single object, drop fields or emit numbers as strings.
//! All of that is accepted; a reply that is not JSON at all yields nothing.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use ryoshu_core::{
    BoundingBox, DraftRecord, InvoiceState, PaymentMethod, ScanPass, TaxRate,
};

/// One receipt as described by a backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResponseItem {
    #[serde(deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub vendor: String,
    #[serde(deserialize_with = "lenient_string")]
    pub subject: String,
    #[serde(deserialize_with = "lenient_amount")]
    pub total_amount: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub invoice_no_raw: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tax_rate: String,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_clues: String,
    #[serde(deserialize_with = "lenient_string")]
    pub ocr_full_text: String,
    #[serde(deserialize_with = "lenient_box")]
    pub box_2d: Option<BoundingBox>,
}

impl ResponseItem {
    /// Turn the item into a draft. `global_box` is left for the caller, which
    /// knows where the scanned image sits in the source.
    pub fn into_draft(self, backend: &str, segment_id: String, pass: ScanPass) -> DraftRecord {
        DraftRecord {
            date: self.date.trim().to_string(),
            vendor: self.vendor.trim().to_string(),
            subject: self.subject.trim().to_string(),
            total_amount: self.total_amount,
            invoice_no_raw: self.invoice_no_raw.trim().to_string(),
            tax_rate: TaxRate::from_clue(&self.tax_rate),
            payment_method: PaymentMethod::from_clue(&self.payment_clues),
            ocr_full_text: self.ocr_full_text,
            box_2d: self.box_2d,
            global_box: None,
            backend: backend.to_string(),
            segment_id,
            pass,
            invoice: InvoiceState::None,
            review_flags: Vec::new(),
        }
    }
}

/// Decode a raw reply into items. Malformed items are skipped.
pub fn parse_response(raw: &str) -> Vec<ResponseItem> {
    let body = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "backend reply is not JSON");
            return Vec::new();
        }
    };

    let elements = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            warn!(kind = %json_kind(&other), "backend reply is neither array nor object");
            return Vec::new();
        }
    };

    elements
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| {
            if !v.is_object() {
                warn!(index = i, "skipping non-object item");
                return None;
            }
            serde_json::from_value::<ResponseItem>(v)
                .map_err(|e| warn!(index = i, error = %e, "skipping malformed item"))
                .ok()
        })
        .collect()
}

/// Drop a surrounding ```` ``` ```` / ```` ```json ```` fence if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (`json`) on the opening line. Single-line fences
    // put the body right after it.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

/// Whole yen. Accepts integers, floats (rounded) and strings such as
/// `"¥1,200"`; anything else or a negative value is 0.
fn lenient_amount<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let amount = match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Value::String(s) => parse_amount_text(&s).unwrap_or(0),
        _ => 0,
    };
    Ok(amount.max(0))
}

fn parse_amount_text(s: &str) -> Option<i64> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | '¥' | '￥' | '円') && !c.is_whitespace())
        .collect();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|f| f.round() as i64))
}

fn lenient_box<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BoundingBox>, D::Error> {
    let Value::Array(coords) = Value::deserialize(d)? else {
        return Ok(None);
    };
    if coords.len() != 4 {
        return Ok(None);
    }
    let mut raw = [0i64; 4];
    for (slot, v) in raw.iter_mut().zip(&coords) {
        *slot = match v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)) {
            Some(n) => n,
            None => return Ok(None),
        };
    }
    Ok(Some(BoundingBox::from_raw(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAXI: &str = r#"{
        "date": "2026/02/08",
        "vendor": "日本交通",
        "subject": "タクシー代",
        "total_amount": 1200,
        "invoice_no_raw": "T1234567890123",
        "tax_rate": "10",
        "payment_clues": "cash",
        "ocr_full_text": "日本交通\n領収書",
        "box_2d": [10, 20, 500, 480]
    }"#;

    #[test]
    fn array_reply() {
        let items = parse_response(&format!("[{TAXI}]"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].vendor, "日本交通");
        assert_eq!(items[0].total_amount, 1200);
        assert_eq!(items[0].box_2d.map(|b| b.to_array()), Some([10, 20, 500, 480]));
    }

    #[test]
    fn fenced_reply() {
        let items = parse_response(&format!("```json\n[{TAXI}]\n```"));
        assert_eq!(items.len(), 1);
        let items = parse_response(&format!("```\n{TAXI}\n```\n"));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn single_line_fence() {
        assert_eq!(strip_code_fence("```json [1]```"), "[1]");
        assert_eq!(strip_code_fence("```[1]```"), "[1]");
        let taxi = TAXI.replace('\n', "");
        assert_eq!(parse_response(&format!("```json [{taxi}]```")).len(), 1);
        assert_eq!(parse_response(&format!("```{taxi}```")).len(), 1);
    }

    #[test]
    fn bare_object_is_one_item() {
        assert_eq!(parse_response(TAXI).len(), 1);
    }

    #[test]
    fn garbage_reply_is_empty() {
        assert!(parse_response("I could not find a receipt.").is_empty());
        assert!(parse_response("").is_empty());
        assert!(parse_response("42").is_empty());
    }

    #[test]
    fn missing_and_null_fields_default() {
        let items = parse_response(r#"[{"vendor": null, "total_amount": "¥1,980"}]"#);
        assert_eq!(items[0].vendor, "");
        assert_eq!(items[0].date, "");
        assert_eq!(items[0].total_amount, 1980);
        assert_eq!(items[0].box_2d, None);
    }

    #[test]
    fn numeric_variants_of_amount() {
        let items = parse_response(
            r#"[{"total_amount": 1200.4}, {"total_amount": "850円"}, {"total_amount": -3}, {"total_amount": "n/a"}]"#,
        );
        let amounts: Vec<i64> = items.iter().map(|i| i.total_amount).collect();
        assert_eq!(amounts, vec![1200, 850, 0, 0]);
    }

    #[test]
    fn malformed_items_are_skipped() {
        let items = parse_response(&format!(r#"["oops", 7, {TAXI}]"#));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn bad_box_is_dropped() {
        let items = parse_response(r#"[{"box_2d": [1, 2, 3]}, {"box_2d": "top"}, {"box_2d": [0, 0, 1500, 999.6]}]"#);
        assert_eq!(items[0].box_2d, None);
        assert_eq!(items[1].box_2d, None);
        assert_eq!(items[2].box_2d.map(|b| b.to_array()), Some([0, 0, 1000, 1000]));
    }

    #[test]
    fn into_draft_maps_enums() {
        let item = parse_response(TAXI).remove(0);
        let d = item.into_draft("gemini", "whole_0".into(), ScanPass::Whole);
        assert_eq!(d.tax_rate, TaxRate::Rate10);
        assert_eq!(d.payment_method, PaymentMethod::Cash);
        assert_eq!(d.backend, "gemini");
        assert_eq!(d.invoice_no_raw, "T1234567890123");
        assert!(d.invoice.is_none());

        let item = ResponseItem { tax_rate: "maybe".into(), payment_clues: "barter".into(), ..Default::default() };
        let d = item.into_draft("gemini", "whole_1".into(), ScanPass::Whole);
        assert_eq!(d.tax_rate, TaxRate::Unknown);
        assert_eq!(d.payment_method, PaymentMethod::Unknown);
    }
}
