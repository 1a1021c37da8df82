//! Rebuilds a group's balances from finalized splits and confirmed settlements.

use crate::core::errors::LedgerError;
use crate::core::models::{Currency, GroupBalance, Settlement, Split};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Per-user, per-currency signed totals. Ordered so flattening is deterministic.
type Accumulator = BTreeMap<Uuid, BTreeMap<Currency, i64>>;

/// Computes the replacement balance set for `group_id`.
///
/// `confirmed` holds the `(split_id, payer_id)` pairs whose participant row is settled.
/// Unsettled participants contribute their split share; settled ones contribute nothing
/// here and are represented by their confirmed settlements instead. Zero totals are
/// dropped. Output is sorted by user, then currency.
pub fn calculate_group_balances(
    group_id: Uuid,
    splits: &[Split],
    settlements: &[Settlement],
    confirmed: &HashSet<(Uuid, Uuid)>,
) -> Result<Vec<GroupBalance>, LedgerError> {
    let split_currency: HashMap<Uuid, Currency> = splits.iter().map(|s| (s.id, s.currency)).collect();
    let mut acc = Accumulator::new();

    for split in splits {
        check_split(group_id, split)?;
        for participant in split.participants.iter().filter(|p| !p.is_settled) {
            let delta = if participant.user_id == split.created_by {
                split.total_amount.checked_sub(participant.share_amount)
            } else {
                participant.share_amount.checked_neg()
            }
            .ok_or_else(|| overflow(group_id))?;
            add(&mut acc, group_id, participant.user_id, split.currency, delta)?;
        }
    }

    for settlement in settlements {
        let Some(currency) = split_currency.get(&settlement.split_id) else {
            return Err(LedgerError::InvariantViolation(format!(
                "settlement {} references split {} outside group {}",
                settlement.id, settlement.split_id, group_id
            )));
        };
        if settlement.currency != *currency {
            return Err(LedgerError::InvariantViolation(format!(
                "settlement {} is in {} but split {} is in {}",
                settlement.id, settlement.currency, settlement.split_id, currency
            )));
        }
        if !confirmed.contains(&(settlement.split_id, settlement.payer_id)) {
            continue;
        }
        let refund = settlement.amount.checked_neg().ok_or_else(|| overflow(group_id))?;
        add(&mut acc, group_id, settlement.payer_id, settlement.currency, settlement.amount)?;
        add(&mut acc, group_id, settlement.payee_id, settlement.currency, refund)?;
    }

    Ok(acc
        .into_iter()
        .flat_map(|(user_id, currencies)| {
            currencies
                .into_iter()
                .filter(|(_, amount)| *amount != 0)
                .map(move |(currency, net_amount)| GroupBalance {
                    user_id,
                    group_id,
                    net_amount,
                    currency,
                })
        })
        .collect())
}

fn check_split(group_id: Uuid, split: &Split) -> Result<(), LedgerError> {
    if split.group_id != Some(group_id) || !split.is_finalized {
        return Err(LedgerError::InvariantViolation(format!(
            "split {} is not a finalized split of group {}",
            split.id, group_id
        )));
    }
    for p in &split.participants {
        if p.split_id != split.id || p.currency != split.currency {
            return Err(LedgerError::InvariantViolation(format!(
                "participant {} does not match split {} ({})",
                p.user_id, split.id, split.currency
            )));
        }
    }
    Ok(())
}

fn add(acc: &mut Accumulator, group_id: Uuid, user_id: Uuid, currency: Currency, amount: i64) -> Result<(), LedgerError> {
    let total = acc.entry(user_id).or_default().entry(currency).or_insert(0);
    *total = total.checked_add(amount).ok_or_else(|| overflow(group_id))?;
    Ok(())
}

fn overflow(group_id: Uuid) -> LedgerError {
    LedgerError::InvariantViolation(format!("balance of group {} overflows", group_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{SplitDivisionType, SplitParticipant, SplitType};
    use chrono::Utc;

    fn finalized(group_id: Uuid, creator: Uuid, total: i64, currency: Currency, shares: &[(Uuid, i64, bool)]) -> Split {
        let id = Uuid::new_v4();
        Split {
            id,
            split_type: SplitType::Group,
            division_type: SplitDivisionType::Custom,
            total_amount: total,
            currency,
            description: "Cab".to_string(),
            group_id: Some(group_id),
            created_by: creator,
            is_finalized: true,
            created_at: Utc::now(),
            participants: shares
                .iter()
                .map(|(user_id, share_amount, is_settled)| SplitParticipant {
                    split_id: id,
                    user_id: *user_id,
                    share_amount: *share_amount,
                    currency,
                    is_settled: *is_settled,
                })
                .collect(),
        }
    }

    fn amount(balances: &[GroupBalance], user: Uuid, currency: Currency) -> Option<i64> {
        balances
            .iter()
            .find(|b| b.user_id == user && b.currency == currency)
            .map(|b| b.net_amount)
    }

    #[test]
    fn empty_history_yields_no_rows() {
        let result = calculate_group_balances(Uuid::new_v4(), &[], &[], &HashSet::new()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn currencies_accumulate_independently() {
        let (g, c, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let splits = vec![
            finalized(g, c, 300, Currency::Inr, &[(c, 100, false), (x, 200, false)]),
            finalized(g, x, 40, Currency::Usd, &[(c, 40, false)]),
        ];
        let result = calculate_group_balances(g, &splits, &[], &HashSet::new()).unwrap();
        assert_eq!(amount(&result, c, Currency::Inr), Some(200));
        assert_eq!(amount(&result, x, Currency::Inr), Some(-200));
        assert_eq!(amount(&result, c, Currency::Usd), Some(-40));
        // x is the creator of the USD split but not a participant, so has no USD row.
        assert_eq!(amount(&result, x, Currency::Usd), None);
    }

    #[test]
    fn settled_participants_are_excluded_and_confirmed_settlements_counted() {
        let (g, c, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let split = finalized(g, c, 100, Currency::Usd, &[(x, 100, true)]);
        let settlement = Settlement {
            id: Uuid::new_v4(),
            split_id: split.id,
            payer_id: x,
            payee_id: c,
            amount: 100,
            currency: Currency::Usd,
            date: Utc::now(),
            idempotency_key: None,
        };
        let confirmed = HashSet::from([(split.id, x)]);
        let result = calculate_group_balances(g, &[split], &[settlement], &confirmed).unwrap();
        assert_eq!(amount(&result, x, Currency::Usd), Some(100));
        assert_eq!(amount(&result, c, Currency::Usd), Some(-100));
    }

    #[test]
    fn unconfirmed_settlements_are_ignored() {
        let (g, c, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let split = finalized(g, c, 100, Currency::Usd, &[(c, 50, false), (x, 50, false)]);
        let settlement = Settlement {
            id: Uuid::new_v4(),
            split_id: split.id,
            payer_id: x,
            payee_id: c,
            amount: 50,
            currency: Currency::Usd,
            date: Utc::now(),
            idempotency_key: None,
        };
        let result = calculate_group_balances(g, &[split], &[settlement], &HashSet::new()).unwrap();
        assert_eq!(amount(&result, c, Currency::Usd), Some(50));
        assert_eq!(amount(&result, x, Currency::Usd), Some(-50));
    }

    #[test]
    fn zero_totals_are_dropped() {
        let (g, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let splits = vec![
            finalized(g, a, 80, Currency::Eur, &[(b, 80, false)]),
            finalized(g, b, 80, Currency::Eur, &[(a, 80, false)]),
        ];
        // Each creator is not a participant, so only debits land: a -80, b -80.
        let result = calculate_group_balances(g, &splits, &[], &HashSet::new()).unwrap();
        assert_eq!(result.len(), 2);

        let splits = vec![
            finalized(g, a, 80, Currency::Eur, &[(a, 0, false), (b, 80, false)]),
            finalized(g, b, 80, Currency::Eur, &[(b, 0, false), (a, 80, false)]),
        ];
        let result = calculate_group_balances(g, &splits, &[], &HashSet::new()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn malformed_participant_currency_aborts() {
        let (g, c, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut split = finalized(g, c, 100, Currency::Inr, &[(x, 100, false)]);
        split.participants[0].currency = Currency::Eur;
        let result = calculate_group_balances(g, &[split], &[], &HashSet::new());
        assert!(matches!(result, Err(LedgerError::InvariantViolation(_))));
    }

    #[test]
    fn output_is_deterministic() {
        let g = Uuid::new_v4();
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let shares: Vec<(Uuid, i64, bool)> = users.iter().map(|u| (*u, 20, false)).collect();
        let splits = vec![finalized(g, users[0], 100, Currency::Inr, &shares)];
        let first = calculate_group_balances(g, &splits, &[], &HashSet::new()).unwrap();
        let second = calculate_group_balances(g, &splits, &[], &HashSet::new()).unwrap();
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_by_key(|b| (b.user_id, b.currency));
        assert_eq!(first, sorted);
    }

    #[test]
    fn overflowing_total_aborts() {
        let (g, c, x) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let splits = vec![
            finalized(g, c, i64::MAX, Currency::Usd, &[(x, i64::MAX, false)]),
            finalized(g, c, 1, Currency::Usd, &[(x, 1, false)]),
            finalized(g, c, 1, Currency::Usd, &[(x, 1, false)]),
        ];
        let result = calculate_group_balances(g, &splits, &[], &HashSet::new());
        assert!(matches!(result, Err(LedgerError::InvariantViolation(_))));
    }
}
