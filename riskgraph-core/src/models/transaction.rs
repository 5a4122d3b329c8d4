use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw transaction row as delivered by the ingestion collaborator.
///
/// Every field is optional; missing required fields are reported as a
/// [`MalformedRow`] by the scorer instead of failing the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Hour offset used by simulated datasets when no absolute timestamp exists.
    #[serde(default)]
    pub step: Option<i64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default, alias = "nameOrig")]
    pub name_orig: Option<String>,
    #[serde(default, alias = "nameDest")]
    pub name_dest: Option<String>,
    #[serde(default, alias = "oldbalanceOrg")]
    pub oldbalance_org: Option<f64>,
    #[serde(default, alias = "newbalanceOrig")]
    pub newbalance_orig: Option<f64>,
    #[serde(default, alias = "oldbalanceDest")]
    pub oldbalance_dest: Option<f64>,
    #[serde(default, alias = "newbalanceDest")]
    pub newbalance_dest: Option<f64>,
    #[serde(default, alias = "isFraud", deserialize_with = "flag::deserialize")]
    pub is_fraud: Option<bool>,
}

mod flag {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    /// Accepts `true`/`false` as well as the `0`/`1` encoding of labelled datasets.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Flag>::deserialize(deserializer)?.map(|f| match f {
            Flag::Bool(b) => b,
            Flag::Int(i) => i != 0,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    CashIn,
    CashOut,
    Debit,
    Payment,
    Transfer,
    Other,
}

impl TransactionKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CASH_IN" => Self::CashIn,
            "CASH_OUT" => Self::CashOut,
            "DEBIT" => Self::Debit,
            "PAYMENT" => Self::Payment,
            "TRANSFER" => Self::Transfer,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CashIn => "CASH_IN",
            Self::CashOut => "CASH_OUT",
            Self::Debit => "DEBIT",
            Self::Payment => "PAYMENT",
            Self::Transfer => "TRANSFER",
            Self::Other => "OTHER",
        }
    }

    /// Kinds that move funds out to another party and can start a pass-through chain.
    pub fn is_outbound_transfer(self) -> bool {
        matches!(self, Self::Transfer | Self::CashOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Normal,
    Suspicious,
    MoneyLaundering,
    IdentityTheft,
    LargeTransaction,
}

impl RiskType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Suspicious => "suspicious",
            Self::MoneyLaundering => "money laundering",
            Self::IdentityTheft => "identity theft",
            Self::LargeTransaction => "large transaction",
        }
    }
}

/// A scored transaction. Immutable once produced by the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: DateTime<Utc>,
    pub kind: TransactionKind,
    pub amount: f64,
    pub source: String,
    pub destination: String,
    pub oldbalance_org: f64,
    pub newbalance_orig: f64,
    pub oldbalance_dest: f64,
    pub newbalance_dest: f64,
    pub is_fraud: Option<bool>,
    pub risk_score: f64,
    pub risk_type: RiskType,
}

/// An input row the scorer could not interpret. Its risk score is 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub destination: String,
    pub amount: f64,
    pub risk_score: f64,
    pub risk_type: RiskType,
    pub level: AlertLevel,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accepts_paysim_column_names() {
        let json = r#"{
            "step": 3, "type": "TRANSFER", "amount": 181.0,
            "nameOrig": "C1305486145", "oldbalanceOrg": 181.0, "newbalanceOrig": 0.0,
            "nameDest": "C553264065", "oldbalanceDest": 0.0, "newbalanceDest": 0.0,
            "isFraud": 1
        }"#;

        let record: TransactionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.step, Some(3));
        assert_eq!(record.kind.as_deref(), Some("TRANSFER"));
        assert_eq!(record.name_orig.as_deref(), Some("C1305486145"));
        assert_eq!(record.is_fraud, Some(true));
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn test_record_missing_fields_default_to_none() {
        let record: TransactionRecord = serde_json::from_str(r#"{"amount": 5.0}"#).unwrap();
        assert_eq!(record.amount, Some(5.0));
        assert!(record.kind.is_none());
        assert!(record.is_fraud.is_none());
    }

    #[test]
    fn test_kind_parse_is_case_insensitive() {
        assert_eq!(TransactionKind::parse("cash_out"), TransactionKind::CashOut);
        assert_eq!(TransactionKind::parse("PAYMENT"), TransactionKind::Payment);
        assert_eq!(TransactionKind::parse("wire"), TransactionKind::Other);
        assert!(TransactionKind::Transfer.is_outbound_transfer());
        assert!(!TransactionKind::Payment.is_outbound_transfer());
    }

    #[test]
    fn test_risk_type_serializes_snake_case() {
        let s = serde_json::to_string(&RiskType::MoneyLaundering).unwrap();
        assert_eq!(s, "\"money_laundering\"");
    }
}
