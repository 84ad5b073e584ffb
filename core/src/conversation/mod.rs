//! Conversation timeline management
//!
//! This module holds the version ledger of edited messages and the navigator
//! that forks and switches timelines over it.

pub mod ledger;
pub mod navigator;

pub use ledger::Direction;
pub use ledger::Version;
pub use ledger::VersionSet;
pub use navigator::Navigator;
pub use navigator::PendingTurn;
