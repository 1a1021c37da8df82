//! Greedy two-pointer debt simplification, one currency at a time.

use crate::core::errors::LedgerError;
use crate::core::models::{Currency, GroupBalance, SimplifiedDebt};
use uuid::Uuid;

/// Transfers for every currency, plus whatever the greedy walk could not match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Simplification {
    pub debts: Vec<SimplifiedDebt>,
    /// Remaining signed positions after matching. Empty whenever each currency nets to zero.
    pub unmatched: Vec<GroupBalance>,
}

struct Position {
    user_id: Uuid,
    group_id: Uuid,
    remaining: i64,
}

struct CurrencyBook {
    currency: Currency,
    // Net per user, first-encounter order.
    net: Vec<Position>,
}

/// Partitions `balances` by currency in first-encounter order, merging rows of the same
/// user, then within each currency matches debtors to creditors in input order.
/// Never emits a zero or self transfer.
pub fn simplify_debts(balances: &[GroupBalance]) -> Result<Simplification, LedgerError> {
    let mut books: Vec<CurrencyBook> = Vec::new();
    for balance in balances {
        let idx = match books.iter().position(|b| b.currency == balance.currency) {
            Some(idx) => idx,
            None => {
                books.push(CurrencyBook {
                    currency: balance.currency,
                    net: Vec::new(),
                });
                books.len() - 1
            }
        };
        let book = &mut books[idx];
        match book.net.iter_mut().find(|p| p.user_id == balance.user_id) {
            Some(position) => {
                position.remaining = position
                    .remaining
                    .checked_add(balance.net_amount)
                    .ok_or_else(|| overflow(balance))?;
            }
            None => book.net.push(Position {
                user_id: balance.user_id,
                group_id: balance.group_id,
                remaining: balance.net_amount,
            }),
        }
    }

    let mut result = Simplification::default();
    for book in books {
        let mut creditors = Vec::new();
        let mut debtors = Vec::new();
        for mut position in book.net {
            if position.remaining > 0 {
                creditors.push(position);
            } else if position.remaining < 0 {
                position.remaining = position.remaining.checked_neg().ok_or_else(|| {
                    LedgerError::InvariantViolation(format!(
                        "{} balance of user {} is out of range",
                        book.currency, position.user_id
                    ))
                })?;
                debtors.push(position);
            }
        }
        match_positions(book.currency, &mut debtors, &mut creditors, &mut result.debts);
        collect_unmatched(book.currency, &creditors, &debtors, &mut result.unmatched);
    }
    Ok(result)
}

fn overflow(balance: &GroupBalance) -> LedgerError {
    LedgerError::InvariantViolation(format!(
        "{} balance of user {} overflows",
        balance.currency, balance.user_id
    ))
}

fn match_positions(
    currency: Currency,
    debtors: &mut [Position],
    creditors: &mut [Position],
    out: &mut Vec<SimplifiedDebt>,
) {
    let (mut i, mut j) = (0, 0);
    while i < debtors.len() && j < creditors.len() {
        let debtor = &mut debtors[i];
        let creditor = &mut creditors[j];
        let settle = debtor.remaining.min(creditor.remaining);

        out.push(SimplifiedDebt {
            from_user_id: debtor.user_id,
            to_user_id: creditor.user_id,
            amount: settle,
            currency,
        });

        debtor.remaining -= settle;
        creditor.remaining -= settle;

        if debtor.remaining == 0 {
            i += 1;
        }
        if creditor.remaining == 0 {
            j += 1;
        }
    }
}

fn collect_unmatched(currency: Currency, creditors: &[Position], debtors: &[Position], out: &mut Vec<GroupBalance>) {
    let leftovers = creditors
        .iter()
        .map(|p| (p, p.remaining))
        .chain(debtors.iter().map(|p| (p, -p.remaining)));
    for (position, net_amount) in leftovers {
        if net_amount != 0 {
            out.push(GroupBalance {
                user_id: position.user_id,
                group_id: position.group_id,
                net_amount,
                currency,
            });
        }
    }
}
