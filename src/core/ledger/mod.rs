pub mod recompute;
pub mod simplify;
pub mod updater;

pub use recompute::calculate_group_balances;
pub use simplify::{Simplification, simplify_debts};
pub use updater::{AppliedSplit, apply_finalized_split};
