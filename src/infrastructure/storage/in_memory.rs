use crate::core::errors::LedgerError;
use crate::core::models::{Currency, GroupBalance, ReversalSplit, Settlement, Split, SplitParticipant, UserBalance};
use crate::infrastructure::storage::{LedgerStore, LedgerTransaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Default)]
struct LedgerState {
    user_balances: HashMap<(Uuid, Uuid, Currency), UserBalance>,
    // Rows per group kept in insertion order; simplification depends on it.
    group_balances: HashMap<Uuid, Vec<GroupBalance>>,
    splits: HashMap<Uuid, Split>,
    split_order: Vec<Uuid>,
    reversals: HashMap<Uuid, ReversalSplit>,
    settlements: HashMap<Uuid, Settlement>,
    settlement_order: Vec<Uuid>,
    idempotency_keys: HashMap<String, Uuid>,
}

/// Transactional in-memory store. One transaction runs at a time; writes are staged on a
/// private copy of the state and published only by `commit`.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        InMemoryLedgerStore {
            state: Arc::new(Mutex::new(LedgerState::default())),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes the next commit fail with a storage error, discarding its staged writes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            staged,
            fail_commit: self.fail_next_commit.clone(),
        }))
    }

    async fn get_group_balances(&self, group_id: Uuid) -> Result<Vec<GroupBalance>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.group_balances.get(&group_id).cloned().unwrap_or_default())
    }

    async fn get_user_balances(&self, user_id: Uuid) -> Result<Vec<UserBalance>, LedgerError> {
        let state = self.state.lock().await;
        let mut balances: Vec<UserBalance> = state
            .user_balances
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        balances.sort_by(|a, b| (a.other_user_id, a.currency).cmp(&(b.other_user_id, b.currency)));
        Ok(balances)
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    fail_commit: Arc<AtomicBool>,
}

impl InMemoryTransaction {
    fn remove_settlement(&mut self, settlement_id: Uuid) -> Option<Settlement> {
        let removed = self.staged.settlements.remove(&settlement_id)?;
        self.staged.settlement_order.retain(|id| *id != settlement_id);
        if let Some(key) = &removed.idempotency_key {
            self.staged.idempotency_keys.remove(key);
        }
        Some(removed)
    }

    fn participant_mut(
        &mut self,
        split_id: Uuid,
        user_id: Uuid,
    ) -> Result<&mut SplitParticipant, LedgerError> {
        self.staged
            .splits
            .get_mut(&split_id)
            .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| LedgerError::ParticipantNotFound(split_id.to_string(), user_id.to_string()))
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn get_or_create_user_balance(
        &mut self,
        user_id: Uuid,
        other_user_id: Uuid,
        currency: Currency,
    ) -> Result<UserBalance, LedgerError> {
        Ok(self
            .staged
            .user_balances
            .entry((user_id, other_user_id, currency))
            .or_insert_with(|| UserBalance::zero(user_id, other_user_id, currency))
            .clone())
    }

    async fn save_user_balance(&mut self, balance: UserBalance) -> Result<(), LedgerError> {
        self.staged
            .user_balances
            .insert((balance.user_id, balance.other_user_id, balance.currency), balance);
        Ok(())
    }

    async fn get_or_create_group_balance(
        &mut self,
        user_id: Uuid,
        group_id: Uuid,
        currency: Currency,
    ) -> Result<GroupBalance, LedgerError> {
        let rows = self.staged.group_balances.entry(group_id).or_default();
        if let Some(existing) = rows.iter().find(|b| b.user_id == user_id && b.currency == currency) {
            return Ok(existing.clone());
        }
        let created = GroupBalance::zero(user_id, group_id, currency);
        rows.push(created.clone());
        Ok(created)
    }

    async fn save_group_balance(&mut self, balance: GroupBalance) -> Result<(), LedgerError> {
        let rows = self.staged.group_balances.entry(balance.group_id).or_default();
        match rows
            .iter_mut()
            .find(|b| b.user_id == balance.user_id && b.currency == balance.currency)
        {
            Some(existing) => *existing = balance,
            None => rows.push(balance),
        }
        Ok(())
    }

    async fn replace_group_balances(
        &mut self,
        group_id: Uuid,
        balances: Vec<GroupBalance>,
    ) -> Result<Vec<GroupBalance>, LedgerError> {
        if let Some(foreign) = balances.iter().find(|b| b.group_id != group_id) {
            return Err(LedgerError::InvariantViolation(format!(
                "balance for group {} passed to replacement of group {}",
                foreign.group_id, group_id
            )));
        }
        let removed = self
            .staged
            .group_balances
            .insert(group_id, balances.clone())
            .map(|rows| rows.len())
            .unwrap_or(0);
        debug!(%group_id, removed, inserted = balances.len(), "Staged group balance replacement");
        Ok(balances)
    }

    async fn save_split(&mut self, split: Split) -> Result<(), LedgerError> {
        if !self.staged.splits.contains_key(&split.id) {
            self.staged.split_order.push(split.id);
        }
        self.staged.splits.insert(split.id, split);
        Ok(())
    }

    async fn get_split(&mut self, split_id: Uuid) -> Result<Option<Split>, LedgerError> {
        Ok(self.staged.splits.get(&split_id).cloned())
    }

    async fn delete_split(&mut self, split_id: Uuid) -> Result<(), LedgerError> {
        if self.staged.splits.remove(&split_id).is_none() {
            return Err(LedgerError::SplitNotFound(split_id.to_string()));
        }
        self.staged.split_order.retain(|id| *id != split_id);
        self.staged
            .reversals
            .retain(|original, link| *original != split_id && link.reversal_split_id != split_id);

        let orphaned: Vec<Uuid> = self
            .staged
            .settlements
            .values()
            .filter(|s| s.split_id == split_id)
            .map(|s| s.id)
            .collect();
        for settlement_id in &orphaned {
            self.remove_settlement(*settlement_id);
        }
        debug!(%split_id, settlements = orphaned.len(), "Staged split deletion");
        Ok(())
    }

    async fn mark_split_finalized(&mut self, split_id: Uuid) -> Result<(), LedgerError> {
        let split = self
            .staged
            .splits
            .get_mut(&split_id)
            .ok_or_else(|| LedgerError::SplitNotFound(split_id.to_string()))?;
        if split.is_finalized {
            return Err(LedgerError::SplitAlreadyFinalized(split_id.to_string()));
        }
        split.is_finalized = true;
        Ok(())
    }

    async fn get_finalized_splits_with_participants(&mut self, group_id: Uuid) -> Result<Vec<Split>, LedgerError> {
        Ok(self
            .staged
            .split_order
            .iter()
            .filter_map(|id| self.staged.splits.get(id))
            .filter(|s| s.is_finalized && s.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn is_participant_settled(&mut self, split_id: Uuid, user_id: Uuid) -> Result<bool, LedgerError> {
        // A missing participant row reads as "not settled".
        Ok(self
            .staged
            .splits
            .get(&split_id)
            .and_then(|s| s.participant(user_id))
            .map(|p| p.is_settled)
            .unwrap_or(false))
    }

    async fn set_participant_settled(&mut self, split_id: Uuid, user_id: Uuid) -> Result<(), LedgerError> {
        self.participant_mut(split_id, user_id)?.is_settled = true;
        Ok(())
    }

    async fn save_reversal(&mut self, reversal: ReversalSplit) -> Result<(), LedgerError> {
        if self.staged.reversals.contains_key(&reversal.original_split_id) {
            return Err(LedgerError::SplitAlreadyReversed(reversal.original_split_id.to_string()));
        }
        self.staged.reversals.insert(reversal.original_split_id, reversal);
        Ok(())
    }

    async fn is_split_reversed(&mut self, split_id: Uuid) -> Result<bool, LedgerError> {
        Ok(self.staged.reversals.contains_key(&split_id))
    }

    async fn save_settlement(&mut self, settlement: Settlement) -> Result<(), LedgerError> {
        if let Some(key) = &settlement.idempotency_key {
            match self.staged.idempotency_keys.get(key) {
                Some(existing) if *existing != settlement.id => {
                    return Err(LedgerError::Conflict(format!("idempotency key {} already used", key)));
                }
                _ => {
                    self.staged.idempotency_keys.insert(key.clone(), settlement.id);
                }
            }
        }
        if !self.staged.settlements.contains_key(&settlement.id) {
            self.staged.settlement_order.push(settlement.id);
        }
        self.staged.settlements.insert(settlement.id, settlement);
        Ok(())
    }

    async fn get_settlement(&mut self, settlement_id: Uuid) -> Result<Option<Settlement>, LedgerError> {
        Ok(self.staged.settlements.get(&settlement_id).cloned())
    }

    async fn get_settlement_by_idempotency_key(&mut self, key: &str) -> Result<Option<Settlement>, LedgerError> {
        Ok(self
            .staged
            .idempotency_keys
            .get(key)
            .and_then(|id| self.staged.settlements.get(id))
            .cloned())
    }

    async fn get_settlements_for_splits(&mut self, split_ids: &[Uuid]) -> Result<Vec<Settlement>, LedgerError> {
        if split_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .staged
            .settlement_order
            .iter()
            .filter_map(|id| self.staged.settlements.get(id))
            .filter(|s| split_ids.contains(&s.split_id))
            .cloned()
            .collect())
    }

    async fn get_settlements_for_user(&mut self, user_id: Uuid) -> Result<Vec<Settlement>, LedgerError> {
        let mut settlements: Vec<Settlement> = self
            .staged
            .settlement_order
            .iter()
            .rev()
            .filter_map(|id| self.staged.settlements.get(id))
            .filter(|s| s.payer_id == user_id || s.payee_id == user_id)
            .cloned()
            .collect();
        // Stable: equal dates keep newest-recorded first.
        settlements.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(settlements)
    }

    async fn delete_settlement(&mut self, settlement_id: Uuid) -> Result<(), LedgerError> {
        self.remove_settlement(settlement_id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::SettlementNotFound(settlement_id.to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryTransaction {
            mut guard,
            staged,
            fail_commit,
        } = *self;
        if fail_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::StorageError("commit rejected by store".to_string()));
        }
        *guard = staged;
        Ok(())
    }
}
