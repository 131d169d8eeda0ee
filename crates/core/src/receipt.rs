use serde::{Deserialize, Serialize};
use std::fmt;

/// Consumption-tax rate printed on the receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaxRate {
    #[serde(rename = "10")]
    Rate10,
    #[serde(rename = "8")]
    Rate8,
    /// Reduced 8% rate (food and beverages, marked with ※ on receipts).
    #[serde(rename = "8_reduced")]
    Rate8Reduced,
    #[serde(rename = "exempt")]
    Exempt,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl TaxRate {
    /// Map a backend clue string onto a rate. Anything unrecognised is `Unknown`.
    pub fn from_clue(clue: &str) -> Self {
        clue.parse().unwrap_or(TaxRate::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != TaxRate::Unknown
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxRate::Rate10 => write!(f, "10"),
            TaxRate::Rate8 => write!(f, "8"),
            TaxRate::Rate8Reduced => write!(f, "8_reduced"),
            TaxRate::Exempt => write!(f, "exempt"),
            TaxRate::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for TaxRate {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "10" | "10%" => Ok(TaxRate::Rate10),
            "8" | "8%" => Ok(TaxRate::Rate8),
            "8_reduced" | "8%_reduced" => Ok(TaxRate::Rate8Reduced),
            "exempt" => Ok(TaxRate::Exempt),
            "unknown" => Ok(TaxRate::Unknown),
            other => Err(format!("Unknown tax rate: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    #[serde(rename = "paypay")]
    PayPay,
    Credit,
    #[default]
    Unknown,
}

impl PaymentMethod {
    pub fn from_clue(clue: &str) -> Self {
        clue.parse().unwrap_or(PaymentMethod::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != PaymentMethod::Unknown
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::PayPay => write!(f, "paypay"),
            PaymentMethod::Credit => write!(f, "credit"),
            PaymentMethod::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "paypay" => Ok(PaymentMethod::PayPay),
            "credit" => Ok(PaymentMethod::Credit),
            "unknown" => Ok(PaymentMethod::Unknown),
            other => Err(format!("Unknown payment method: '{other}'")),
        }
    }
}

/// Expense category. Assigned by the reviewer; extraction always leaves it `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Travel,
    Parking,
    Toll,
    Meeting,
    Entertainment,
    Supplies,
    Dues,
    Other,
    #[default]
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Travel => "travel",
            Category::Parking => "parking",
            Category::Toll => "toll",
            Category::Meeting => "meeting",
            Category::Entertainment => "entertainment",
            Category::Supplies => "supplies",
            Category::Dues => "dues",
            Category::Other => "other",
            Category::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "travel" => Ok(Category::Travel),
            "parking" => Ok(Category::Parking),
            "toll" => Ok(Category::Toll),
            "meeting" => Ok(Category::Meeting),
            "entertainment" => Ok(Category::Entertainment),
            "supplies" => Ok(Category::Supplies),
            "dues" => Ok(Category::Dues),
            "other" => Ok(Category::Other),
            "unknown" => Ok(Category::Unknown),
            other => Err(format!("Unknown category: '{other}'")),
        }
    }
}
