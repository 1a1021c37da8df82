use crate::core::errors::LedgerError;
use crate::core::models::{Currency, GroupBalance, ReversalSplit, Settlement, Split, UserBalance};
use async_trait::async_trait;
use uuid::Uuid;

/// Entry point to the ledger store. Every mutation happens through a [`LedgerTransaction`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a unit of work. Dropping the transaction without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError>;

    /// Committed group balances, outside any transaction.
    async fn get_group_balances(&self, group_id: Uuid) -> Result<Vec<GroupBalance>, LedgerError>;

    /// Committed pairwise balances owned by `user_id`.
    async fn get_user_balances(&self, user_id: Uuid) -> Result<Vec<UserBalance>, LedgerError>;
}

/// Operations available inside one atomic unit of work.
#[async_trait]
pub trait LedgerTransaction: Send {
    // Pairwise ledger
    async fn get_or_create_user_balance(
        &mut self,
        user_id: Uuid,
        other_user_id: Uuid,
        currency: Currency,
    ) -> Result<UserBalance, LedgerError>;
    async fn save_user_balance(&mut self, balance: UserBalance) -> Result<(), LedgerError>;

    // Group ledger
    async fn get_or_create_group_balance(
        &mut self,
        user_id: Uuid,
        group_id: Uuid,
        currency: Currency,
    ) -> Result<GroupBalance, LedgerError>;
    async fn save_group_balance(&mut self, balance: GroupBalance) -> Result<(), LedgerError>;
    /// Deletes every balance row of the group and inserts `balances` in their place.
    async fn replace_group_balances(
        &mut self,
        group_id: Uuid,
        balances: Vec<GroupBalance>,
    ) -> Result<Vec<GroupBalance>, LedgerError>;

    // Source records
    async fn save_split(&mut self, split: Split) -> Result<(), LedgerError>;
    async fn get_split(&mut self, split_id: Uuid) -> Result<Option<Split>, LedgerError>;
    /// Removes the split with its participants, reversal links and settlements.
    async fn delete_split(&mut self, split_id: Uuid) -> Result<(), LedgerError>;
    /// Flips `is_finalized`; fails with `SplitAlreadyFinalized` if it was already set.
    async fn mark_split_finalized(&mut self, split_id: Uuid) -> Result<(), LedgerError>;
    async fn get_finalized_splits_with_participants(&mut self, group_id: Uuid) -> Result<Vec<Split>, LedgerError>;
    async fn is_participant_settled(&mut self, split_id: Uuid, user_id: Uuid) -> Result<bool, LedgerError>;
    async fn set_participant_settled(&mut self, split_id: Uuid, user_id: Uuid) -> Result<(), LedgerError>;
    async fn save_reversal(&mut self, reversal: ReversalSplit) -> Result<(), LedgerError>;
    async fn is_split_reversed(&mut self, split_id: Uuid) -> Result<bool, LedgerError>;

    async fn save_settlement(&mut self, settlement: Settlement) -> Result<(), LedgerError>;
    async fn get_settlement(&mut self, settlement_id: Uuid) -> Result<Option<Settlement>, LedgerError>;
    async fn get_settlement_by_idempotency_key(&mut self, key: &str) -> Result<Option<Settlement>, LedgerError>;
    async fn get_settlements_for_splits(&mut self, split_ids: &[Uuid]) -> Result<Vec<Settlement>, LedgerError>;
    /// Settlements where `user_id` is payer or payee, newest first.
    async fn get_settlements_for_user(&mut self, user_id: Uuid) -> Result<Vec<Settlement>, LedgerError>;
    async fn delete_settlement(&mut self, settlement_id: Uuid) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}

pub mod in_memory;
