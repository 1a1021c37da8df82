use super::money::{Currency, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A payment from payer to payee against one split. Confirmation lives on the payer's
/// participant row (`is_settled`), not here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub id: Uuid,
    pub split_id: Uuid,
    pub payer_id: Uuid,
    pub payee_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
    pub idempotency_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSettlement {
    pub split_id: Uuid,
    pub payer_id: Uuid,
    pub payee_id: Uuid,
    pub amount: Money,
    pub idempotency_key: Option<String>,
}

/// A settlement together with whether its payer's share has been confirmed as settled.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementRecord {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub is_confirmed: bool,
}
