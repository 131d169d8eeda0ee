use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected reply shape: {0}")]
    Malformed(String),
    #[error("{0}")]
    Other(String),
}

/// Request URLs are dropped from the message; they may carry credentials.
impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        match e.status() {
            Some(status) => BackendError::Http { status: status.as_u16(), body: e.to_string() },
            None => BackendError::Transport(e.to_string()),
        }
    }
}

/// Substrings that mark a failure as quota or rate-limit related.
const RETRYABLE_MARKERS: &[&str] = &[
    "429",
    "resource_exhausted",
    "resource exhausted",
    "quota",
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
];

/// Whether an error message describes a transient rate-limit condition.
/// Matching is case-insensitive.
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Instruction sent with every image. Asks for a JSON array with one object
/// per receipt in the image.
pub const EXTRACTION_PROMPT: &str = r#"あなたはレシート・領収書の情報を正確に抽出するOCRエキスパートです。

この画像に含まれる**すべてのレシート/領収書**を検出し、それぞれについて
以下の情報をJSON配列で返してください。

各レシートに対して以下のフィールドを抽出：
{
  "date": "YYYY/MM/DD形式の日付",
  "vendor": "支払先/店名",
  "subject": "件名・品目の要約（例: タクシー代、昼食代、会費など）",
  "total_amount": 税込総額（整数）,
  "invoice_no_raw": "T番号（インボイス登録番号）があればそのまま記載。なければ空文字",
  "tax_rate": "10" or "8" or "8_reduced" or "unknown",
  "payment_clues": "支払方法の手がかり（お預り/お釣り→cash, PayPay→paypay, カード→credit, 不明→unknown）",
  "ocr_full_text": "レシート全文テキスト（改行は\nで区切る）",
  "box_2d": [ymin, xmin, ymax, xmax]
}

抽出ルール:
1. invoice_no_raw: 「登録番号」「適格請求書発行事業者」の近くにある T+数字列をそのまま記載
2. total_amount: 「計/合計/領収金額/乗車料金/お支払い」の近くの金額を優先
3. tax_rate: 「10%/8%/8.0%/10.0%」表記を探す。軽減税率(※)マークがあれば "8_reduced"
4. payment_clues: 「お預り/お釣り/釣銭」→cash、「PayPay」→paypay、「VISA/Master/JCB/カード」→credit
5. ocr_full_text: レシート全文を省略せずすべて記載すること（T番号抽出の後処理に使用）
6. box_2d: レシートの位置を画像全体に対する0〜1000の正規化座標で記載

**必ずJSON配列のみを返してください。マークダウンのコードブロックは不要です。**
レシートが1枚でも配列 [...] で返してください。
"#;

/// MIME type of an encoded image, PNG when it cannot be told.
pub fn mime_type_of(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png")
}

/// A hosted vision model that reads receipts out of an image.
///
/// Implementations return the model's raw reply text; parsing is shared.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Short identifier recorded on every draft the backend produces.
    fn name(&self) -> &str;

    async fn extract(&self, image: &[u8]) -> Result<String, BackendError>;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Replays a scripted sequence of replies. Once the script runs out every
/// further call gets the fallback reply, or an error when there is none.
pub struct MockBackend {
    name: String,
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<Result<String, String>>,
    calls: AtomicUsize,
}

impl MockBackend {
    /// Always answers with `reply`.
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::build(name.into(), Vec::new(), Some(Ok(reply.into())))
    }

    /// Answers with each entry in turn; `Err` entries become backend errors.
    pub fn scripted(name: impl Into<String>, script: Vec<Result<String, String>>) -> Self {
        Self::build(name.into(), script, None)
    }

    /// Always fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(name.into(), Vec::new(), Some(Err(message.into())))
    }

    fn build(
        name: String,
        script: Vec<Result<String, String>>,
        fallback: Option<Result<String, String>>,
    ) -> Self {
        Self {
            name,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self, _image: &[u8]) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next.or_else(|| self.fallback.clone()) {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(BackendError::Other(msg)),
            None => Err(BackendError::Other("mock script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_markers_match_case_insensitively() {
        assert!(is_retryable("HTTP 429: Too Many Requests"));
        assert!(is_retryable("RESOURCE_EXHAUSTED: quota exceeded"));
        assert!(is_retryable("Rate limit reached for gpt-4o"));
        assert!(is_retryable("ratelimit"));
        assert!(!is_retryable("HTTP 400: invalid image"));
        assert!(!is_retryable("Transport error: connection reset"));
    }

    #[test]
    fn http_error_display_carries_status() {
        let e = BackendError::Http { status: 429, body: "slow down".into() };
        assert!(is_retryable(&e.to_string()));
        let e = BackendError::Http { status: 401, body: "bad key".into() };
        assert!(!is_retryable(&e.to_string()));
    }

    #[test]
    fn mime_detection() {
        assert_eq!(mime_type_of(b"\x89PNG\r\n\x1a\n0000"), "image/png");
        assert_eq!(mime_type_of(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(mime_type_of(b"??"), "image/png");
    }

    #[tokio::test]
    async fn mock_replays_script_then_errors() {
        let m = MockBackend::scripted("mock", vec![Err("429".into()), Ok("[]".into())]);
        assert!(m.extract(b"").await.is_err());
        assert_eq!(m.extract(b"").await.unwrap(), "[]");
        assert!(m.extract(b"").await.is_err());
        assert_eq!(m.calls(), 3);
    }

    #[tokio::test]
    async fn mock_failing_always_errors() {
        let m = MockBackend::failing("mock", "HTTP 500: boom");
        for _ in 0..3 {
            assert!(m.extract(b"").await.is_err());
        }
        assert_eq!(m.calls(), 3);
    }

    #[tokio::test]
    async fn mock_fixed_reply() {
        let m = MockBackend::new("mock", "[{}]");
        assert_eq!(m.extract(b"a").await.unwrap(), "[{}]");
        assert_eq!(m.extract(b"b").await.unwrap(), "[{}]");
        assert_eq!(m.name(), "mock");
    }
}
