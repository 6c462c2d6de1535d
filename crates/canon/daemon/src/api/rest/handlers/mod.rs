//! API request handlers

mod canon;
mod decisions;
mod health;
mod ledger;
mod why_not;

pub use canon::*;
pub use decisions::*;
pub use health::*;
pub use ledger::*;
pub use why_not::*;
