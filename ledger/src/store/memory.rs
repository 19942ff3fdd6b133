use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DocumentStore, Mutation};
use crate::error::{AccountKind, LedgerError};
use crate::types::{ServerAccount, ServerId, UserAccount, UserId};

struct Collection<T> {
    kind: AccountKind,
    documents: Mutex<HashMap<u64, T>>,
}

impl<T: Clone> Collection<T> {
    fn new(kind: AccountKind) -> Self {
        Self {
            kind,
            documents: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, T>> {
        // Documents are only ever replaced whole, so a poisoned map is still consistent
        self.documents.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, id: u64) -> Result<Option<T>, LedgerError> {
        Ok(self.lock().get(&id).cloned())
    }

    fn insert(&self, id: u64, document: &T) -> Result<bool, LedgerError> {
        let mut documents = self.lock();
        if documents.contains_key(&id) {
            return Ok(false);
        }
        documents.insert(id, document.clone());
        Ok(true)
    }

    fn update(&self, id: u64, mutation: Mutation<'_, T>) -> Result<T, LedgerError> {
        let mut documents = self.lock();
        let stored = documents.get_mut(&id).ok_or(LedgerError::NotFound {
            kind: self.kind,
            id,
        })?;

        // Mutate a copy so a failed mutation leaves the document untouched
        let mut updated = stored.clone();
        mutation(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }

    fn delete(&self, id: u64) -> Result<bool, LedgerError> {
        Ok(self.lock().remove(&id).is_some())
    }

    fn list(&self) -> Result<Vec<T>, LedgerError> {
        Ok(self.lock().values().cloned().collect())
    }
}

/// In-process store. Each collection sits behind its own lock, which gives
/// the same per-document atomicity a hosted document database provides.
#[derive(Clone)]
pub struct MemoryStore {
    users: Arc<Collection<UserAccount>>,
    servers: Arc<Collection<ServerAccount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(Collection::new(AccountKind::User)),
            servers: Arc::new(Collection::new(AccountKind::Server)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, LedgerError> {
        self.users.get(id.0)
    }

    fn insert_user(&self, account: &UserAccount) -> Result<bool, LedgerError> {
        self.users.insert(account.id.0, account)
    }

    fn update_user(
        &self,
        id: UserId,
        mutation: Mutation<'_, UserAccount>,
    ) -> Result<UserAccount, LedgerError> {
        self.users.update(id.0, mutation)
    }

    fn delete_user(&self, id: UserId) -> Result<bool, LedgerError> {
        self.users.delete(id.0)
    }

    fn list_users(&self) -> Result<Vec<UserAccount>, LedgerError> {
        self.users.list()
    }

    fn get_server(&self, id: ServerId) -> Result<Option<ServerAccount>, LedgerError> {
        self.servers.get(id.0)
    }

    fn insert_server(&self, account: &ServerAccount) -> Result<bool, LedgerError> {
        self.servers.insert(account.id.0, account)
    }

    fn update_server(
        &self,
        id: ServerId,
        mutation: Mutation<'_, ServerAccount>,
    ) -> Result<ServerAccount, LedgerError> {
        self.servers.update(id.0, mutation)
    }

    fn delete_server(&self, id: ServerId) -> Result<bool, LedgerError> {
        self.servers.delete(id.0)
    }
}
