pub const SPLIT_CREATED: &str = "split_created";
pub const SPLIT_FINALIZED: &str = "split_finalized";
pub const SPLIT_REVERSED: &str = "split_reversed";
pub const SPLIT_DELETED: &str = "split_deleted";
pub const PARTICIPANT_ADDED: &str = "participant_added";
pub const PARTICIPANT_UPDATED: &str = "participant_updated";
pub const GROUP_BALANCES_RECALCULATED: &str = "group_balances_recalculated";
pub const SIMPLIFIED_DEBTS_QUERIED: &str = "simplified_debts_queried";
pub const SETTLEMENT_CREATED: &str = "settlement_created";
pub const SETTLEMENT_CONFIRMED: &str = "settlement_confirmed";
pub const SETTLEMENT_DELETED: &str = "settlement_deleted";
