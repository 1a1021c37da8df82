pub mod config;
pub mod constants;
pub mod core;
pub mod infrastructure;
pub mod observability;

pub use crate::core::errors::{ErrorKind, LedgerError};
pub use crate::core::models::{
    Currency, GroupBalance, Money, NewSettlement, NewShare, NewSplit, Settlement, SettlementRecord, SimplifiedDebt, Split,
    SplitDivisionType, SplitParticipant, SplitType, UserBalance,
};
pub use crate::core::services::LedgerService;
pub use crate::infrastructure::logging::in_memory::InMemoryLogging;
pub use crate::infrastructure::storage::in_memory::InMemoryLedgerStore;

#[cfg(test)]
mod tests;
