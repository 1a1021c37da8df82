
use crate::core::models::{Currency, Money, NewShare, NewSplit, Split, SplitDivisionType, SplitType};
use crate::core::services::LedgerService;
use crate::infrastructure::logging::in_memory::InMemoryLogging;
use crate::infrastructure::storage::in_memory::InMemoryLedgerStore;
use std::time::Duration;
use uuid::Uuid;

pub type TestService = LedgerService<InMemoryLogging, InMemoryLedgerStore>;

pub fn create_test_service() -> TestService {
    let storage = InMemoryLedgerStore::new();
    let logging = InMemoryLogging::new();
    LedgerService::with_timeout(storage, logging, Duration::from_secs(5))
}

pub fn group_split(group_id: Uuid, creator: Uuid, total: i64, currency: Currency, shares: &[(Uuid, i64)]) -> NewSplit {
    NewSplit {
        split_type: SplitType::Group,
        division_type: SplitDivisionType::Custom,
        total: Money::new(total, currency),
        description: "Shared expense".to_string(),
        group_id: Some(group_id),
        created_by: creator,
        shares: shares
            .iter()
            .map(|(user_id, amount)| NewShare {
                user_id: *user_id,
                share_amount: Some(*amount),
            })
            .collect(),
    }
}

/// Creates and finalizes a split in one go.
pub async fn finalized_split(service: &TestService, new_split: NewSplit) -> Split {
    let creator = new_split.created_by;
    let split = service.create_split(new_split).await.unwrap();
    service.finalize_split(split.id, creator).await.unwrap()
}

pub fn users<const N: usize>() -> [Uuid; N] {
    std::array::from_fn(|_| Uuid::new_v4())
}
