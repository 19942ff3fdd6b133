//! Document collections backing the ledger.
//!
//! A store holds one document per account in two collections (`users` and
//! `servers`). Each call is a single round trip. `update_*` applies the
//! mutation to one document atomically: if the closure returns an error the
//! stored document is left untouched. There are no multi-document
//! transactions.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::LedgerError;
use crate::types::{ServerAccount, ServerId, UserAccount, UserId};

pub type Mutation<'a, T> = &'a mut dyn FnMut(&mut T) -> Result<(), LedgerError>;

pub trait DocumentStore: Send + Sync {
    fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, LedgerError>;

    /// Inserts the document unless one with the same id exists. Returns
    /// whether it was inserted.
    fn insert_user(&self, account: &UserAccount) -> Result<bool, LedgerError>;

    fn update_user(
        &self,
        id: UserId,
        mutation: Mutation<'_, UserAccount>,
    ) -> Result<UserAccount, LedgerError>;

    fn delete_user(&self, id: UserId) -> Result<bool, LedgerError>;

    fn list_users(&self) -> Result<Vec<UserAccount>, LedgerError>;

    fn get_server(&self, id: ServerId) -> Result<Option<ServerAccount>, LedgerError>;

    fn insert_server(&self, account: &ServerAccount) -> Result<bool, LedgerError>;

    fn update_server(
        &self,
        id: ServerId,
        mutation: Mutation<'_, ServerAccount>,
    ) -> Result<ServerAccount, LedgerError>;

    fn delete_server(&self, id: ServerId) -> Result<bool, LedgerError>;
}
