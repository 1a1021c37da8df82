//! Incremental balance updates for a single finalized split.
//!
//! The pairwise ledger moves each non-creator participant's share from the participant to
//! the creator. The group ledger credits the creator with `total - own share` (only when the
//! creator is a participant) and debits every other participant by their share.

use crate::core::errors::LedgerError;
use crate::core::models::{Currency, Split, SplitParticipant};
use crate::infrastructure::storage::LedgerTransaction;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserBalanceDelta {
    pub user_id: Uuid,
    pub other_user_id: Uuid,
    pub currency: Currency,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupBalanceDelta {
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub currency: Currency,
    pub amount: i64,
}

/// Row counts touched by one application.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppliedSplit {
    pub user_balance_rows: usize,
    pub group_balance_rows: usize,
}

/// Rejects participant rows that belong to another split or carry another currency.
pub fn validate_participants(split: &Split, participants: &[SplitParticipant]) -> Result<(), LedgerError> {
    for p in participants {
        if p.split_id != split.id {
            return Err(LedgerError::InvariantViolation(format!(
                "participant {} references split {} while applying split {}",
                p.user_id, p.split_id, split.id
            )));
        }
        if p.currency != split.currency {
            return Err(LedgerError::InvariantViolation(format!(
                "participant {} of split {} is in {} but the split is in {}",
                p.user_id, split.id, p.currency, split.currency
            )));
        }
    }
    Ok(())
}

pub fn user_balance_deltas(split: &Split, participants: &[SplitParticipant]) -> Result<Vec<UserBalanceDelta>, LedgerError> {
    let creator = split.created_by;
    let mut deltas = Vec::with_capacity(participants.len() * 2);
    for p in participants.iter().filter(|p| p.user_id != creator) {
        deltas.push(UserBalanceDelta {
            user_id: p.user_id,
            other_user_id: creator,
            currency: split.currency,
            amount: negate(p.share_amount, split)?,
        });
        deltas.push(UserBalanceDelta {
            user_id: creator,
            other_user_id: p.user_id,
            currency: split.currency,
            amount: p.share_amount,
        });
    }
    Ok(deltas)
}

/// Empty for splits outside any group.
pub fn group_balance_deltas(split: &Split, participants: &[SplitParticipant]) -> Result<Vec<GroupBalanceDelta>, LedgerError> {
    let Some(group_id) = split.group_id else {
        return Ok(Vec::new());
    };
    participants
        .iter()
        .map(|p| {
            let amount = if p.user_id == split.created_by {
                split
                    .total_amount
                    .checked_sub(p.share_amount)
                    .ok_or_else(|| overflow(split))?
            } else {
                negate(p.share_amount, split)?
            };
            Ok(GroupBalanceDelta {
                user_id: p.user_id,
                group_id,
                currency: split.currency,
                amount,
            })
        })
        .collect()
}

fn negate(amount: i64, split: &Split) -> Result<i64, LedgerError> {
    amount.checked_neg().ok_or_else(|| overflow(split))
}

fn overflow(split: &Split) -> LedgerError {
    LedgerError::InvariantViolation(format!("balance arithmetic overflows while applying split {}", split.id))
}

/// Applies a finalized split to both ledgers inside `tx`. The caller commits.
///
/// Every delta is computed and validated before the first write, so an invariant failure
/// leaves the transaction untouched. A store failure or row overflow part way through leaves staged writes
/// that the caller must discard by dropping the transaction.
pub async fn apply_finalized_split(
    tx: &mut dyn LedgerTransaction,
    split: &Split,
    participants: &[SplitParticipant],
) -> Result<AppliedSplit, LedgerError> {
    if !split.is_finalized {
        return Err(LedgerError::SplitNotFinalized(split.id.to_string()));
    }
    validate_participants(split, participants)?;

    let user_deltas = user_balance_deltas(split, participants)?;
    let group_deltas = group_balance_deltas(split, participants)?;

    for delta in &user_deltas {
        let mut row = tx
            .get_or_create_user_balance(delta.user_id, delta.other_user_id, delta.currency)
            .await?;
        row.net_amount = row.net_amount.checked_add(delta.amount).ok_or_else(|| overflow(split))?;
        tx.save_user_balance(row).await?;
    }

    for delta in &group_deltas {
        let mut row = tx
            .get_or_create_group_balance(delta.user_id, delta.group_id, delta.currency)
            .await?;
        row.net_amount = row.net_amount.checked_add(delta.amount).ok_or_else(|| overflow(split))?;
        tx.save_group_balance(row).await?;
    }

    debug!(
        split_id = %split.id,
        currency = %split.currency,
        user_rows = user_deltas.len(),
        group_rows = group_deltas.len(),
        "Applied split to ledger"
    );

    Ok(AppliedSplit {
        user_balance_rows: user_deltas.len(),
        group_balance_rows: group_deltas.len(),
    })
}
