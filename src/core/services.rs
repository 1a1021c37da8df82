use crate::config::CONFIG;
use crate::constants::{
    GROUP_BALANCES_RECALCULATED, PARTICIPANT_ADDED, PARTICIPANT_UPDATED, SETTLEMENT_CONFIRMED, SETTLEMENT_CREATED,
    SETTLEMENT_DELETED, SIMPLIFIED_DEBTS_QUERIED, SPLIT_CREATED, SPLIT_DELETED, SPLIT_FINALIZED, SPLIT_REVERSED,
};
use crate::core::errors::LedgerError;
use crate::core::ledger::{self, AppliedSplit};
use crate::core::models::audit::AppLog;
use crate::core::models::{
    GroupBalance, NewSettlement, NewSplit, ReversalSplit, Settlement, SettlementRecord, SimplifiedDebt, Split,
    SplitParticipant, UserBalance,
};
use crate::infrastructure::logging::LoggingService;
use crate::infrastructure::storage::{LedgerStore, LedgerTransaction};
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Application-facing ledger operations.
///
/// Every mutating operation is one store transaction: it either commits in full or leaves
/// no trace. Each runs under the configured deadline; dropping the returned future (timeout,
/// `select!`, task abort) drops the open transaction and rolls it back. Nothing is retried
/// internally: on [`LedgerError::Conflict`] or [`LedgerError::Timeout`] the caller reruns
/// the whole operation.
pub struct LedgerService<L: LoggingService, S: LedgerStore> {
    store: S,
    logging: L,
    op_timeout: Duration,
}

impl<L: LoggingService, S: LedgerStore> LedgerService<L, S> {
    pub fn new(store: S, logging: L) -> Self {
        Self::with_timeout(store, logging, CONFIG.op_timeout)
    }

    pub fn with_timeout(store: S, logging: L, op_timeout: Duration) -> Self {
        LedgerService {
            store,
            logging,
            op_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn bounded<T, F>(&self, unit: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.op_timeout, unit).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }

    /// Audit entries are written after the ledger commit, so a failing sink is reported
    /// and swallowed: the caller must still see the committed result.
    async fn log_action(&self, action: &str, details: serde_json::Value, user_id: Option<Uuid>) {
        let user_id = user_id.map(|u| u.to_string());
        if let Err(e) = self.logging.log_action(action, details, user_id.as_deref()).await {
            warn!(action, error = %e, "Failed to write audit entry");
        }
    }

    pub async fn create_split(&self, new_split: NewSplit) -> Result<Split, LedgerError> {
        let split = new_split.into_split(Uuid::new_v4(), Utc::now())?;
        self.bounded(async {
            let mut tx = self.store.begin().await?;
            tx.save_split(split.clone()).await?;
            tx.commit().await
        })
        .await?;

        self.log_action(
            SPLIT_CREATED,
            json!({
                "split_id": split.id,
                "group_id": split.group_id,
                "total_amount": split.total_amount,
                "currency": split.currency,
                "participants": split.participants.len(),
            }),
            Some(split.created_by),
        )
        .await;

        Ok(split)
    }

    /// Marks a stored split finalized and applies it to the ledgers in the same transaction.
    #[instrument(skip(self))]
    pub async fn finalize_split(&self, split_id: Uuid, requested_by: Uuid) -> Result<Split, LedgerError> {
        let split = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let split = tx
                    .get_split(split_id)
                    .await?
                    .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?;
                if split.created_by != requested_by {
                    return Err(LedgerError::NotSplitCreator(requested_by.to_string()));
                }
                let (split, _) = finalize_in(tx.as_mut(), split).await?;
                tx.commit().await?;
                Ok(split)
            })
            .await?;

        info!(split_id = %split.id, group_id = ?split.group_id, "Split finalized");
        self.log_action(
            SPLIT_FINALIZED,
            json!({ "split_id": split.id, "group_id": split.group_id, "currency": split.currency }),
            Some(requested_by),
        )
        .await;

        Ok(split)
    }

    /// Applies `split` with `participants` to the pairwise and group ledgers.
    ///
    /// `split` must carry `is_finalized`. The finalized flag is persisted in the same
    /// transaction as the balance updates, so a split already finalized in the store is
    /// rejected instead of being applied twice.
    #[instrument(skip(self, split, participants), fields(split_id = %split.id))]
    pub async fn apply_finalized_split(
        &self,
        split: &Split,
        participants: &[SplitParticipant],
    ) -> Result<AppliedSplit, LedgerError> {
        if !split.is_finalized {
            return Err(LedgerError::SplitNotFinalized(split.id.to_string()));
        }
        ledger::updater::validate_participants(split, participants)?;

        let applied = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let applied = match tx.get_split(split.id).await? {
                    Some(stored) if stored.is_finalized => {
                        return Err(LedgerError::SplitAlreadyFinalized(split.id.to_string()));
                    }
                    // History is what recomputation reads, so the stored split wins.
                    Some(stored) => {
                        ensure_matches_stored(&stored, split, participants)?;
                        finalize_in(tx.as_mut(), stored).await?.1
                    }
                    None => {
                        tx.save_split(Split {
                            participants: participants.to_vec(),
                            ..split.clone()
                        })
                        .await?;
                        ledger::apply_finalized_split(tx.as_mut(), split, participants).await?
                    }
                };
                tx.commit().await?;
                Ok(applied)
            })
            .await?;

        self.log_action(
            SPLIT_FINALIZED,
            json!({ "split_id": split.id, "group_id": split.group_id, "currency": split.currency }),
            Some(split.created_by),
        )
        .await;

        Ok(applied)
    }

    /// Creates, links and applies the negating split of a finalized split.
    #[instrument(skip(self))]
    pub async fn reverse_split(&self, split_id: Uuid, requested_by: Uuid) -> Result<Split, LedgerError> {
        let reversal = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let original = tx
                    .get_split(split_id)
                    .await?
                    .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?;
                if original.created_by != requested_by {
                    return Err(LedgerError::NotSplitCreator(requested_by.to_string()));
                }
                if !original.is_finalized {
                    return Err(LedgerError::SplitNotFinalized(split_id.to_string()));
                }
                if tx.is_split_reversed(split_id).await? {
                    return Err(LedgerError::SplitAlreadyReversed(split_id.to_string()));
                }

                let now = Utc::now();
                let reversal = original.reversal(Uuid::new_v4(), requested_by, now);
                tx.save_split(reversal.clone()).await?;
                tx.save_reversal(ReversalSplit {
                    id: Uuid::new_v4(),
                    original_split_id: original.id,
                    reversal_split_id: reversal.id,
                    reason: "Split reversal".to_string(),
                    created_at: now,
                })
                .await?;
                let (reversal, _) = finalize_in(tx.as_mut(), reversal).await?;
                tx.commit().await?;
                Ok(reversal)
            })
            .await?;

        info!(split_id = %split_id, reversal_id = %reversal.id, "Split reversed");
        self.log_action(
            SPLIT_REVERSED,
            json!({ "split_id": split_id, "reversal_id": reversal.id, "group_id": reversal.group_id }),
            Some(requested_by),
        )
        .await;

        Ok(reversal)
    }

    /// Deletes an unfinalized split together with any settlements recorded against it.
    #[instrument(skip(self))]
    pub async fn delete_split(&self, split_id: Uuid, requested_by: Uuid) -> Result<(), LedgerError> {
        let split = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let split = load_editable(tx.as_mut(), split_id, requested_by).await.map_err(|e| match e {
                    LedgerError::SplitAlreadyFinalized(id) => LedgerError::CannotDeleteFinalizedSplit(id),
                    other => other,
                })?;
                tx.delete_split(split_id).await?;
                tx.commit().await?;
                Ok(split)
            })
            .await?;

        info!(%split_id, group_id = ?split.group_id, "Split deleted");
        self.log_action(
            SPLIT_DELETED,
            json!({ "split_id": split_id, "group_id": split.group_id }),
            Some(requested_by),
        )
        .await;

        Ok(())
    }

    /// Adds a participant to an unfinalized split. The split total grows by the share.
    #[instrument(skip(self))]
    pub async fn add_participant(
        &self,
        split_id: Uuid,
        requested_by: Uuid,
        user_id: Uuid,
        share_amount: i64,
    ) -> Result<SplitParticipant, LedgerError> {
        self.edit_participant(PARTICIPANT_ADDED, split_id, requested_by, user_id, |split| {
            split.add_participant(user_id, share_amount).cloned()
        })
        .await
    }

    /// Changes a participant's share on an unfinalized split. The split total follows.
    #[instrument(skip(self))]
    pub async fn update_participant(
        &self,
        split_id: Uuid,
        requested_by: Uuid,
        user_id: Uuid,
        share_amount: i64,
    ) -> Result<SplitParticipant, LedgerError> {
        self.edit_participant(PARTICIPANT_UPDATED, split_id, requested_by, user_id, |split| {
            split.update_participant(user_id, share_amount).cloned()
        })
        .await
    }

    async fn edit_participant<F>(
        &self,
        action: &str,
        split_id: Uuid,
        requested_by: Uuid,
        user_id: Uuid,
        edit: F,
    ) -> Result<SplitParticipant, LedgerError>
    where
        F: FnOnce(&mut Split) -> Result<SplitParticipant, LedgerError> + Send,
    {
        let (participant, total_amount) = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let mut split = load_editable(tx.as_mut(), split_id, requested_by).await?;
                let participant = edit(&mut split)?;
                let total_amount = split.total_amount;
                tx.save_split(split).await?;
                tx.commit().await?;
                Ok((participant, total_amount))
            })
            .await?;

        self.log_action(
            action,
            json!({
                "split_id": split_id,
                "participant_id": user_id,
                "share_amount": participant.share_amount,
                "total_amount": total_amount,
            }),
            Some(requested_by),
        )
        .await;

        Ok(participant)
    }

    /// Rebuilds the group's balances from finalized splits and confirmed settlements and
    /// replaces the stored rows wholesale.
    #[instrument(skip(self))]
    pub async fn recompute_group_balances(&self, group_id: Uuid) -> Result<Vec<GroupBalance>, LedgerError> {
        let balances = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let splits = tx.get_finalized_splits_with_participants(group_id).await?;
                let split_ids: Vec<Uuid> = splits.iter().map(|s| s.id).collect();
                let settlements = tx.get_settlements_for_splits(&split_ids).await?;

                let mut confirmed = HashSet::new();
                for settlement in &settlements {
                    if tx.is_participant_settled(settlement.split_id, settlement.payer_id).await? {
                        confirmed.insert((settlement.split_id, settlement.payer_id));
                    }
                }

                let computed = ledger::calculate_group_balances(group_id, &splits, &settlements, &confirmed)?;
                let stored = tx.replace_group_balances(group_id, computed).await?;
                tx.commit().await?;
                Ok((stored, splits.len(), settlements.len()))
            })
            .await;
        let (balances, split_count, settlement_count) = balances?;

        info!(
            %group_id,
            splits = split_count,
            settlements = settlement_count,
            rows = balances.len(),
            "Group balances recalculated"
        );
        self.log_action(
            GROUP_BALANCES_RECALCULATED,
            json!({ "group_id": group_id, "rows": balances.len() }),
            None,
        )
        .await;

        Ok(balances)
    }

    /// Minimal settling transfers for the group's current balances, per currency.
    #[instrument(skip(self))]
    pub async fn get_simplified_debts(&self, group_id: Uuid) -> Result<Vec<SimplifiedDebt>, LedgerError> {
        let balances = self.bounded(self.store.get_group_balances(group_id)).await?;
        let simplification = ledger::simplify_debts(&balances)?;

        for leftover in &simplification.unmatched {
            warn!(
                %group_id,
                user_id = %leftover.user_id,
                currency = %leftover.currency,
                remaining = leftover.net_amount,
                "Group balances do not net to zero; position left unmatched"
            );
        }

        self.log_action(
            SIMPLIFIED_DEBTS_QUERIED,
            json!({ "group_id": group_id, "transfers": simplification.debts.len() }),
            None,
        )
        .await;

        Ok(simplification.debts)
    }

    pub async fn get_group_balances(&self, group_id: Uuid) -> Result<Vec<GroupBalance>, LedgerError> {
        self.bounded(self.store.get_group_balances(group_id)).await
    }

    pub async fn get_user_balances(&self, user_id: Uuid) -> Result<Vec<UserBalance>, LedgerError> {
        self.bounded(self.store.get_user_balances(user_id)).await
    }

    /// Records a payment against a split. A known idempotency key returns the stored settlement.
    #[instrument(skip(self, new_settlement), fields(split_id = %new_settlement.split_id))]
    pub async fn create_settlement(&self, new_settlement: NewSettlement) -> Result<Settlement, LedgerError> {
        if new_settlement.amount.amount <= 0 {
            return Err(LedgerError::InvalidAmount(
                "amount".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        if new_settlement.payer_id == new_settlement.payee_id {
            return Err(LedgerError::SelfSettlement);
        }

        let (settlement, created) = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                if let Some(key) = new_settlement.idempotency_key.as_deref() {
                    if let Some(existing) = tx.get_settlement_by_idempotency_key(key).await? {
                        return Ok((existing, false));
                    }
                }

                let split_id = new_settlement.split_id;
                let split = tx
                    .get_split(split_id)
                    .await?
                    .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?;
                if new_settlement.amount.currency != split.currency {
                    return Err(LedgerError::CurrencyMismatch(
                        new_settlement.amount.currency.to_string(),
                        split.currency.to_string(),
                    ));
                }
                if split.participant(new_settlement.payer_id).is_none() {
                    return Err(LedgerError::ParticipantNotFound(
                        split_id.to_string(),
                        new_settlement.payer_id.to_string(),
                    ));
                }
                if split.participant(new_settlement.payee_id).is_none() {
                    return Err(LedgerError::PayeeNotParticipant(new_settlement.payee_id.to_string()));
                }

                let settlement = Settlement {
                    id: Uuid::new_v4(),
                    split_id,
                    payer_id: new_settlement.payer_id,
                    payee_id: new_settlement.payee_id,
                    amount: new_settlement.amount.amount,
                    currency: new_settlement.amount.currency,
                    date: Utc::now(),
                    idempotency_key: new_settlement.idempotency_key.clone(),
                };
                tx.save_settlement(settlement.clone()).await?;
                tx.commit().await?;
                Ok((settlement, true))
            })
            .await?;

        if created {
            self.log_action(
                SETTLEMENT_CREATED,
                json!({
                    "settlement_id": settlement.id,
                    "split_id": settlement.split_id,
                    "payee_id": settlement.payee_id,
                    "amount": settlement.amount,
                    "currency": settlement.currency,
                }),
                Some(settlement.payer_id),
            )
            .await;
        }

        Ok(settlement)
    }

    /// Payee confirms receipt; marks the payer's share of the split as settled.
    #[instrument(skip(self))]
    pub async fn confirm_settlement(&self, settlement_id: Uuid, confirmed_by: Uuid) -> Result<(), LedgerError> {
        let settlement = self
            .bounded(async {
                let mut tx = self.store.begin().await?;
                let settlement = tx
                    .get_settlement(settlement_id)
                    .await?
                    .filter(|s| s.payee_id == confirmed_by)
                    .ok_or_else(|| LedgerError::SettlementNotFound(settlement_id.to_string()))?;
                if tx.is_participant_settled(settlement.split_id, settlement.payer_id).await? {
                    return Err(LedgerError::SettlementAlreadyConfirmed(settlement_id.to_string()));
                }
                tx.set_participant_settled(settlement.split_id, settlement.payer_id).await?;
                tx.commit().await?;
                Ok(settlement)
            })
            .await?;

        self.log_action(
            SETTLEMENT_CONFIRMED,
            json!({ "settlement_id": settlement.id, "split_id": settlement.split_id }),
            Some(confirmed_by),
        )
        .await;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_settlement(&self, settlement_id: Uuid, requested_by: Uuid) -> Result<(), LedgerError> {
        self.bounded(async {
            let mut tx = self.store.begin().await?;
            let settlement = tx
                .get_settlement(settlement_id)
                .await?
                .ok_or_else(|| LedgerError::SettlementNotFound(settlement_id.to_string()))?;
            if settlement.payer_id != requested_by {
                return Err(LedgerError::NotSettlementPayer(requested_by.to_string()));
            }
            if tx.is_participant_settled(settlement.split_id, settlement.payer_id).await? {
                return Err(LedgerError::CannotDeleteConfirmedSettlement(settlement_id.to_string()));
            }
            tx.delete_settlement(settlement_id).await?;
            tx.commit().await
        })
        .await?;

        self.log_action(
            SETTLEMENT_DELETED,
            json!({ "settlement_id": settlement_id }),
            Some(requested_by),
        )
        .await;

        Ok(())
    }

    /// Settlements involving `user_id` whose payer share is not yet confirmed, newest first.
    pub async fn get_pending_settlements(&self, user_id: Uuid) -> Result<Vec<Settlement>, LedgerError> {
        let history = self.get_settlement_history(user_id).await?;
        Ok(history
            .into_iter()
            .filter(|record| !record.is_confirmed)
            .map(|record| record.settlement)
            .collect())
    }

    /// Every settlement involving `user_id`, newest first, with its confirmation state.
    pub async fn get_settlement_history(&self, user_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        self.bounded(async {
            let mut tx = self.store.begin().await?;
            let settlements = tx.get_settlements_for_user(user_id).await?;
            let mut records = Vec::with_capacity(settlements.len());
            for settlement in settlements {
                let is_confirmed = tx.is_participant_settled(settlement.split_id, settlement.payer_id).await?;
                records.push(SettlementRecord { settlement, is_confirmed });
            }
            Ok(records)
        })
        .await
    }

    pub async fn get_app_logs(&self) -> Result<Vec<AppLog>, LedgerError> {
        self.logging.get_logs().await
    }
}

/// Flags `split` finalized in `tx` and applies its own participants. Returns the split as
/// now stored.
async fn finalize_in(tx: &mut dyn LedgerTransaction, mut split: Split) -> Result<(Split, AppliedSplit), LedgerError> {
    if split.is_finalized {
        return Err(LedgerError::SplitAlreadyFinalized(split.id.to_string()));
    }
    tx.mark_split_finalized(split.id).await?;
    split.is_finalized = true;
    let applied = ledger::apply_finalized_split(tx, &split, &split.participants).await?;
    Ok((split, applied))
}

/// Loads a split its creator may still change.
async fn load_editable(tx: &mut dyn LedgerTransaction, split_id: Uuid, requested_by: Uuid) -> Result<Split, LedgerError> {
    let split = tx
        .get_split(split_id)
        .await?
        .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?;
    if split.created_by != requested_by {
        return Err(LedgerError::NotSplitCreator(requested_by.to_string()));
    }
    if split.is_finalized {
        return Err(LedgerError::SplitAlreadyFinalized(split_id.to_string()));
    }
    Ok(split)
}

/// Rejects a caller-supplied split that disagrees with the stored, not yet finalized copy.
fn ensure_matches_stored(stored: &Split, split: &Split, participants: &[SplitParticipant]) -> Result<(), LedgerError> {
    let same_header = stored.total_amount == split.total_amount
        && stored.currency == split.currency
        && stored.group_id == split.group_id
        && stored.created_by == split.created_by
        && stored.split_type == split.split_type;

    let shares = |rows: &[SplitParticipant]| {
        let mut shares: Vec<(Uuid, i64, bool)> = rows.iter().map(|p| (p.user_id, p.share_amount, p.is_settled)).collect();
        shares.sort();
        shares
    };

    if !same_header || shares(&stored.participants) != shares(participants) {
        return Err(LedgerError::InvariantViolation(format!(
            "split {} differs from its stored copy",
            split.id
        )));
    }
    Ok(())
}
