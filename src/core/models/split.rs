use super::money::{Currency, Money};
use crate::core::errors::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SplitType {
    Group,
    Direct,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SplitDivisionType {
    Equal,
    Custom,
}

/// One user's share of a split. Shares are negative only on reversal splits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitParticipant {
    pub split_id: Uuid,
    pub user_id: Uuid,
    pub share_amount: i64,
    pub currency: Currency,
    pub is_settled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Split {
    pub id: Uuid,
    pub split_type: SplitType,
    pub division_type: SplitDivisionType,
    pub total_amount: i64,
    pub currency: Currency,
    pub description: String,
    pub group_id: Option<Uuid>,
    /// Payer of record; the party the participants owe.
    pub created_by: Uuid,
    pub is_finalized: bool,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    pub participants: Vec<SplitParticipant>,
}

impl Split {
    pub fn participant(&self, user_id: Uuid) -> Option<&SplitParticipant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// Adds a participant to an unfinalized split; the total follows the shares.
    pub fn add_participant(&mut self, user_id: Uuid, share_amount: i64) -> Result<&SplitParticipant, LedgerError> {
        self.ensure_editable()?;
        if self.participant(user_id).is_some() {
            return Err(LedgerError::ParticipantAlreadyExists(self.id.to_string(), user_id.to_string()));
        }
        check_share(share_amount)?;
        let total = checked_sum(self.participants.iter().map(|p| p.share_amount).chain([share_amount]))?;
        self.participants.push(SplitParticipant {
            split_id: self.id,
            user_id,
            share_amount,
            currency: self.currency,
            is_settled: false,
        });
        self.total_amount = total;
        Ok(&self.participants[self.participants.len() - 1])
    }

    /// Changes one participant's share on an unfinalized split; the total follows the shares.
    pub fn update_participant(&mut self, user_id: Uuid, share_amount: i64) -> Result<&SplitParticipant, LedgerError> {
        self.ensure_editable()?;
        check_share(share_amount)?;
        let idx = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or_else(|| LedgerError::ParticipantNotFound(self.id.to_string(), user_id.to_string()))?;
        let total = checked_sum(
            self.participants
                .iter()
                .enumerate()
                .map(|(i, p)| if i == idx { share_amount } else { p.share_amount }),
        )?;
        if total <= 0 {
            return Err(LedgerError::InvalidAmount(
                "total".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        self.participants[idx].share_amount = share_amount;
        self.total_amount = total;
        Ok(&self.participants[idx])
    }

    fn ensure_editable(&self) -> Result<(), LedgerError> {
        if self.is_finalized {
            return Err(LedgerError::SplitAlreadyFinalized(self.id.to_string()));
        }
        Ok(())
    }

    /// Builds the negating split for a reversal. The result is unfinalized; shares are unsettled.
    pub fn reversal(&self, reversal_id: Uuid, created_by: Uuid, now: DateTime<Utc>) -> Split {
        Split {
            id: reversal_id,
            split_type: self.split_type,
            division_type: self.division_type,
            total_amount: -self.total_amount,
            currency: self.currency,
            description: format!("Reversal: {}", self.description),
            group_id: self.group_id,
            created_by,
            is_finalized: false,
            created_at: now,
            participants: self
                .participants
                .iter()
                .map(|p| SplitParticipant {
                    split_id: reversal_id,
                    user_id: p.user_id,
                    share_amount: -p.share_amount,
                    currency: p.currency,
                    is_settled: false,
                })
                .collect(),
        }
    }
}

/// Marks `original_split_id` as reversed by `reversal_split_id`. At most one per original.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReversalSplit {
    pub id: Uuid,
    pub original_split_id: Uuid,
    pub reversal_split_id: Uuid,
    pub reason: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

/// A requested share. `share_amount` may be omitted only for EQUAL division.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewShare {
    pub user_id: Uuid,
    pub share_amount: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSplit {
    pub split_type: SplitType,
    pub division_type: SplitDivisionType,
    pub total: Money,
    pub description: String,
    pub group_id: Option<Uuid>,
    pub created_by: Uuid,
    pub shares: Vec<NewShare>,
}

impl NewSplit {
    /// Validates the request and resolves every share. The returned split is not finalized.
    pub fn into_split(self, id: Uuid, now: DateTime<Utc>) -> Result<Split, LedgerError> {
        if !self.total.is_positive() {
            return Err(LedgerError::InvalidAmount(
                "total".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        match (self.split_type, self.group_id) {
            (SplitType::Group, None) => {
                return Err(LedgerError::InvalidSplit("group split requires a group".to_string()));
            }
            (SplitType::Direct, Some(_)) => {
                return Err(LedgerError::InvalidSplit("direct split cannot belong to a group".to_string()));
            }
            _ => {}
        }
        if self.shares.is_empty() {
            return Err(LedgerError::InvalidSplit("at least one participant is required".to_string()));
        }

        let mut seen = HashSet::new();
        for share in &self.shares {
            if !seen.insert(share.user_id) {
                return Err(LedgerError::InvalidSplit(format!(
                    "user {} appears more than once",
                    share.user_id
                )));
            }
        }

        let amounts = match self.division_type {
            SplitDivisionType::Equal if self.shares.iter().all(|s| s.share_amount.is_none()) => {
                equal_shares(self.total.amount, self.shares.len())
            }
            _ => self
                .shares
                .iter()
                .map(|s| {
                    s.share_amount.ok_or_else(|| {
                        LedgerError::InvalidSplit(format!("missing share amount for user {}", s.user_id))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        for amount in &amounts {
            check_share(*amount)?;
        }
        let share_sum = checked_sum(amounts.iter().copied())?;
        if share_sum != self.total.amount {
            return Err(LedgerError::InvalidSplit(format!(
                "shares sum to {} but total is {}",
                share_sum, self.total.amount
            )));
        }

        let currency = self.total.currency;
        let participants = self
            .shares
            .iter()
            .zip(amounts)
            .map(|(share, share_amount)| SplitParticipant {
                split_id: id,
                user_id: share.user_id,
                share_amount,
                currency,
                is_settled: false,
            })
            .collect();

        Ok(Split {
            id,
            split_type: self.split_type,
            division_type: self.division_type,
            total_amount: self.total.amount,
            currency,
            description: self.description,
            group_id: self.group_id,
            created_by: self.created_by,
            is_finalized: false,
            created_at: now,
            participants,
        })
    }
}

fn check_share(share_amount: i64) -> Result<(), LedgerError> {
    if share_amount < 0 {
        return Err(LedgerError::InvalidAmount(
            "share_amount".to_string(),
            format!("{} is negative", share_amount),
        ));
    }
    Ok(())
}

/// Sum of share amounts, rejecting overflow.
pub fn checked_sum(amounts: impl IntoIterator<Item = i64>) -> Result<i64, LedgerError> {
    amounts.into_iter().try_fold(0i64, |acc, amount| {
        acc.checked_add(amount).ok_or_else(|| {
            LedgerError::InvalidAmount("share_amount".to_string(), "shares overflow the total".to_string())
        })
    })
}

/// Divides `total` into `count` shares; remainder units go to the earliest shares.
fn equal_shares(total: i64, count: usize) -> Vec<i64> {
    let count_i64 = count as i64;
    let base = total / count_i64;
    let remainder = total % count_i64;
    (0..count_i64)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(division_type: SplitDivisionType, shares: Vec<NewShare>) -> NewSplit {
        NewSplit {
            split_type: SplitType::Group,
            division_type,
            total: Money::new(100, Currency::Usd),
            description: "Dinner".to_string(),
            group_id: Some(Uuid::new_v4()),
            created_by: Uuid::new_v4(),
            shares,
        }
    }

    #[test]
    fn equal_division_spreads_remainder() {
        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let shares = users
            .iter()
            .map(|u| NewShare { user_id: *u, share_amount: None })
            .collect();
        let split = request(SplitDivisionType::Equal, shares)
            .into_split(Uuid::new_v4(), Utc::now())
            .unwrap();
        let amounts: Vec<i64> = split.participants.iter().map(|p| p.share_amount).collect();
        assert_eq!(amounts, vec![34, 33, 33]);
        assert!(!split.is_finalized);
    }

    #[test]
    fn custom_shares_must_sum_to_total() {
        let shares = vec![
            NewShare { user_id: Uuid::new_v4(), share_amount: Some(60) },
            NewShare { user_id: Uuid::new_v4(), share_amount: Some(30) },
        ];
        let result = request(SplitDivisionType::Custom, shares).into_split(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(LedgerError::InvalidSplit(_))));
    }

    #[test]
    fn rejects_duplicate_users_and_group_mismatch() {
        let user = Uuid::new_v4();
        let shares = vec![
            NewShare { user_id: user, share_amount: Some(50) },
            NewShare { user_id: user, share_amount: Some(50) },
        ];
        let result = request(SplitDivisionType::Custom, shares).into_split(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(LedgerError::InvalidSplit(_))));

        let mut direct = request(
            SplitDivisionType::Custom,
            vec![NewShare { user_id: user, share_amount: Some(100) }],
        );
        direct.split_type = SplitType::Direct;
        let result = direct.into_split(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(LedgerError::InvalidSplit(_))));
    }

    #[test]
    fn reversal_negates_amounts() {
        let creator = Uuid::new_v4();
        let mut req = request(
            SplitDivisionType::Custom,
            vec![NewShare { user_id: creator, share_amount: Some(100) }],
        );
        req.created_by = creator;
        let mut split = req.into_split(Uuid::new_v4(), Utc::now()).unwrap();
        split.is_finalized = true;
        split.participants[0].is_settled = true;

        let reversal_id = Uuid::new_v4();
        let reversal = split.reversal(reversal_id, creator, Utc::now());
        assert_eq!(reversal.total_amount, -100);
        assert_eq!(reversal.participants[0].share_amount, -100);
        assert_eq!(reversal.participants[0].split_id, reversal_id);
        assert!(!reversal.participants[0].is_settled);
        assert!(!reversal.is_finalized);
        assert_eq!(reversal.group_id, split.group_id);
    }

    #[test]
    fn overflowing_shares_are_rejected() {
        let mut req = request(
            SplitDivisionType::Custom,
            vec![
                NewShare { user_id: Uuid::new_v4(), share_amount: Some(i64::MAX) },
                NewShare { user_id: Uuid::new_v4(), share_amount: Some(1) },
            ],
        );
        req.total = Money::new(i64::MAX, Currency::Usd);
        let result = req.into_split(Uuid::new_v4(), Utc::now());
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_, _))));
    }

    #[test]
    fn editing_participants_moves_the_total() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut split = request(
            SplitDivisionType::Custom,
            vec![NewShare { user_id: a, share_amount: Some(100) }],
        )
        .into_split(Uuid::new_v4(), Utc::now())
        .unwrap();

        split.add_participant(b, 50).unwrap();
        assert_eq!(split.total_amount, 150);
        assert!(matches!(
            split.add_participant(b, 10),
            Err(LedgerError::ParticipantAlreadyExists(_, _))
        ));

        split.update_participant(a, 30).unwrap();
        assert_eq!(split.total_amount, 80);
        assert!(matches!(split.update_participant(a, -1), Err(LedgerError::InvalidAmount(_, _))));
        assert!(matches!(
            split.update_participant(Uuid::new_v4(), 5),
            Err(LedgerError::ParticipantNotFound(_, _))
        ));
        assert!(matches!(split.add_participant(Uuid::new_v4(), i64::MAX), Err(LedgerError::InvalidAmount(_, _))));

        split.is_finalized = true;
        assert!(matches!(split.update_participant(a, 10), Err(LedgerError::SplitAlreadyFinalized(_))));
    }
}
