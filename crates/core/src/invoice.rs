use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A qualified-invoice registration number: `T` followed by exactly 13 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber(String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid invoice number: '{0}' (expected T + 13 digits)")]
pub struct InvalidInvoiceNumber(pub String);

impl InvoiceNumber {
    pub fn parse(s: &str) -> Result<Self, InvalidInvoiceNumber> {
        let valid = s.len() == 14
            && s.starts_with('T')
            && s[1..].bytes().all(|b| b.is_ascii_digit());
        if valid {
            Ok(InvoiceNumber(s.to_string()))
        } else {
            Err(InvalidInvoiceNumber(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = InvalidInvoiceNumber;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        InvoiceNumber::parse(&s)
    }
}

impl From<InvoiceNumber> for String {
    fn from(n: InvoiceNumber) -> Self {
        n.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

/// Where an invoice number stands after extraction.
///
/// A number is either accepted outright or held for human confirmation,
/// never both, so the two states share one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum InvoiceState {
    #[default]
    None,
    Confirmed(InvoiceNumber),
    Candidate(InvoiceNumber),
}

impl InvoiceState {
    pub fn from_extraction(number: Option<InvoiceNumber>, confidence: Confidence) -> Self {
        match (number, confidence) {
            (None, _) => InvoiceState::None,
            (Some(n), Confidence::High) => InvoiceState::Confirmed(n),
            (Some(n), Confidence::Low) => InvoiceState::Candidate(n),
        }
    }

    pub fn confirmed(&self) -> Option<&InvoiceNumber> {
        match self {
            InvoiceState::Confirmed(n) => Some(n),
            _ => None,
        }
    }

    pub fn candidate(&self) -> Option<&InvoiceNumber> {
        match self {
            InvoiceState::Candidate(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, InvoiceState::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_t_plus_13_digits() {
        assert!(InvoiceNumber::parse("T1234567890123").is_ok());
        assert!(InvoiceNumber::parse("T123456789012").is_err());
        assert!(InvoiceNumber::parse("1234567890123X").is_err());
        assert!(InvoiceNumber::parse("T12345678901２3").is_err());
    }

    #[test]
    fn state_from_extraction() {
        let n = InvoiceNumber::parse("T1234567890123").unwrap();
        let confirmed = InvoiceState::from_extraction(Some(n.clone()), Confidence::High);
        assert_eq!(confirmed.confirmed(), Some(&n));
        assert_eq!(confirmed.candidate(), None);

        let held = InvoiceState::from_extraction(Some(n.clone()), Confidence::Low);
        assert_eq!(held.confirmed(), None);
        assert_eq!(held.candidate(), Some(&n));

        assert!(InvoiceState::from_extraction(None, Confidence::High).is_none());
    }

    #[test]
    fn deserialize_rejects_malformed_number() {
        let err = serde_json::from_str::<InvoiceState>(r#"{"state":"confirmed","value":"T12"}"#);
        assert!(err.is_err());
    }
}
