pub mod bet;
pub mod error;
pub mod games;
pub mod ledger;
pub mod round;
pub mod session;
pub mod store;
pub mod types;

pub use error::{AccountKind, LedgerError};
pub use ledger::{Ledger, UserUpdate};
