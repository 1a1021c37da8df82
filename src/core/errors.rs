use serde::Serialize;
use thiserror::Error;

/// Coarse failure classes surfaced to the application layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Validation,
    ConflictOrRace,
    StoreFailure,
    InvariantViolation,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LedgerError {
    /// Split with given ID not found
    #[error("Split {0} not found")]
    SplitNotFound(String),

    /// Settlement with given ID not found
    #[error("Settlement {0} not found")]
    SettlementNotFound(String),

    /// No participant row for (split, user)
    #[error("User {1} is not a participant of split {0}")]
    ParticipantNotFound(String, String),

    #[error("User {1} is already a participant of split {0}")]
    ParticipantAlreadyExists(String, String),

    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),

    /// Amount is zero, negative, or otherwise unusable for the operation
    #[error("Invalid amount for field `{0}`: {1}")]
    InvalidAmount(String, String),

    /// Split definition rejected at creation
    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Split {0} already finalized")]
    SplitAlreadyFinalized(String),

    #[error("Split {0} is not finalized")]
    SplitNotFinalized(String),

    #[error("Split {0} already reversed")]
    SplitAlreadyReversed(String),

    #[error("Split {0} is finalized and cannot be deleted")]
    CannotDeleteFinalizedSplit(String),

    #[error("User {0} did not create this split")]
    NotSplitCreator(String),

    #[error("Currency {0} does not match split currency {1}")]
    CurrencyMismatch(String, String),

    #[error("Payee {0} is not a participant of the split")]
    PayeeNotParticipant(String),

    /// Cannot create a settlement from a user to themselves
    #[error("Cannot create settlement to self")]
    SelfSettlement,

    #[error("Settlement {0} already confirmed")]
    SettlementAlreadyConfirmed(String),

    #[error("Settlement {0} is confirmed and cannot be deleted")]
    CannotDeleteConfirmedSettlement(String),

    #[error("User {0} is not the payer of this settlement")]
    NotSettlementPayer(String),

    /// A concurrent writer invalidated this unit of work; retry from scratch
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Logging error: {0}")]
    LoggingError(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Malformed ledger data; the operation was abandoned without writing
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::SplitNotFound(_)
            | LedgerError::SettlementNotFound(_)
            | LedgerError::ParticipantNotFound(_, _) => ErrorKind::NotFound,
            LedgerError::InvalidCurrency(_)
            | LedgerError::InvalidAmount(_, _)
            | LedgerError::InvalidSplit(_)
            | LedgerError::SplitAlreadyFinalized(_)
            | LedgerError::SplitNotFinalized(_)
            | LedgerError::SplitAlreadyReversed(_)
            | LedgerError::ParticipantAlreadyExists(_, _)
            | LedgerError::CannotDeleteFinalizedSplit(_)
            | LedgerError::NotSplitCreator(_)
            | LedgerError::CurrencyMismatch(_, _)
            | LedgerError::PayeeNotParticipant(_)
            | LedgerError::SelfSettlement
            | LedgerError::SettlementAlreadyConfirmed(_)
            | LedgerError::CannotDeleteConfirmedSettlement(_)
            | LedgerError::NotSettlementPayer(_) => ErrorKind::Validation,
            LedgerError::Conflict(_) => ErrorKind::ConflictOrRace,
            LedgerError::StorageError(_) | LedgerError::LoggingError(_) | LedgerError::Timeout(_) => {
                ErrorKind::StoreFailure
            }
            LedgerError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// HTTP-equivalent status for the layer above the engine.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::ConflictOrRace => 409,
            ErrorKind::StoreFailure | ErrorKind::InvariantViolation => 500,
        }
    }

    /// Message safe to hand to clients. Server-side failures never leak store detail.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::StoreFailure | ErrorKind::InvariantViolation => "Internal server error".to_string(),
            ErrorKind::ConflictOrRace => "Conflicting update, please retry".to_string(),
            ErrorKind::NotFound | ErrorKind::Validation => self.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_) | LedgerError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(LedgerError::SplitNotFound("s".into()).kind(), ErrorKind::NotFound);
        assert_eq!(LedgerError::SelfSettlement.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::ParticipantAlreadyExists("s".into(), "u".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(LedgerError::Conflict("x".into()).kind(), ErrorKind::ConflictOrRace);
        assert_eq!(LedgerError::Timeout(10).kind(), ErrorKind::StoreFailure);
        assert_eq!(
            LedgerError::InvariantViolation("bad".into()).kind(),
            ErrorKind::InvariantViolation
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(LedgerError::SettlementNotFound("s".into()).status_code(), 404);
        assert_eq!(LedgerError::InvalidCurrency("GBP".into()).status_code(), 400);
        assert_eq!(LedgerError::Conflict("x".into()).status_code(), 409);
        assert_eq!(LedgerError::StorageError("x".into()).status_code(), 500);
    }

    #[test]
    fn public_message_hides_store_detail() {
        let err = LedgerError::StorageError("relation \"group_balances\" does not exist".into());
        assert_eq!(err.public_message(), "Internal server error");
        assert!(!err.public_message().contains("group_balances"));

        let err = LedgerError::SplitAlreadyFinalized("abc".into());
        assert_eq!(err.public_message(), "Split abc already finalized");
    }

    #[test]
    fn only_conflicts_and_timeouts_are_retryable() {
        assert!(LedgerError::Conflict("x".into()).is_retryable());
        assert!(LedgerError::Timeout(5).is_retryable());
        assert!(!LedgerError::StorageError("x".into()).is_retryable());
    }
}
