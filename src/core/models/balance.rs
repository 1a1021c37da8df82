use super::money::Currency;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directed pairwise net amount: what `other_user_id` owes `user_id` (negative: what
/// `user_id` owes). Mirrors the (other, user) row with opposite sign.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub other_user_id: Uuid,
    pub net_amount: i64,
    pub currency: Currency,
}

impl UserBalance {
    pub fn zero(user_id: Uuid, other_user_id: Uuid, currency: Currency) -> Self {
        UserBalance {
            user_id,
            other_user_id,
            net_amount: 0,
            currency,
        }
    }
}

/// A user's net position inside one group, one currency.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct GroupBalance {
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub net_amount: i64,
    pub currency: Currency,
}

impl GroupBalance {
    pub fn zero(user_id: Uuid, group_id: Uuid, currency: Currency) -> Self {
        GroupBalance {
            user_id,
            group_id,
            net_amount: 0,
            currency,
        }
    }
}

/// One suggested settling transfer. Computed on demand, never stored.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimplifiedDebt {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: i64,
    pub currency: Currency,
}
