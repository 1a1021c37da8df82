pub mod audit;
pub mod balance;
pub mod money;
pub mod settlement;
pub mod split;

pub use balance::{GroupBalance, SimplifiedDebt, UserBalance};
pub use money::{Currency, Money};
pub use settlement::{NewSettlement, Settlement, SettlementRecord};
pub use split::{NewShare, NewSplit, ReversalSplit, Split, SplitDivisionType, SplitParticipant, SplitType};
