use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{DocumentStore, Mutation};
use crate::error::{AccountKind, LedgerError};
use crate::types::{ServerAccount, ServerId, UserAccount, UserId};

const USERS: &str = "users";
const SERVERS: &str = "servers";

/// Stores each account as a JSON document in SQLite. Updates run inside an
/// immediate transaction so a read-mutate-write is atomic per document.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(LedgerError::unavailable)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(LedgerError::unavailable)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A transaction abandoned by a panic rolls back on drop
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get<T: DeserializeOwned>(&self, table: &str, id: u64) -> Result<Option<T>, LedgerError> {
        let conn = self.lock();
        let doc = select_doc(&conn, table, id)?;
        doc.map(|doc| decode(&doc)).transpose()
    }

    fn insert<T: Serialize>(&self, table: &str, id: u64, document: &T) -> Result<bool, LedgerError> {
        let doc = encode(document)?;
        let conn = self.lock();
        let inserted = conn
            .execute(
                &format!("INSERT OR IGNORE INTO {table} (id, doc) VALUES (?1, ?2)"),
                params![id as i64, doc],
            )
            .map_err(LedgerError::unavailable)?;
        Ok(inserted == 1)
    }

    fn update<T: Serialize + DeserializeOwned>(
        &self,
        table: &str,
        kind: AccountKind,
        id: u64,
        mutation: Mutation<'_, T>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(LedgerError::unavailable)?;

        let doc = select_doc(&tx, table, id)?.ok_or(LedgerError::NotFound { kind, id })?;
        let mut document: T = decode(&doc)?;
        // An error here drops the transaction, which rolls it back
        mutation(&mut document)?;

        tx.execute(
            &format!("UPDATE {table} SET doc = ?2 WHERE id = ?1"),
            params![id as i64, encode(&document)?],
        )
        .map_err(LedgerError::unavailable)?;
        tx.commit().map_err(LedgerError::unavailable)?;
        Ok(document)
    }

    fn delete(&self, table: &str, id: u64) -> Result<bool, LedgerError> {
        let conn = self.lock();
        let deleted = conn
            .execute(
                &format!("DELETE FROM {table} WHERE id = ?1"),
                params![id as i64],
            )
            .map_err(LedgerError::unavailable)?;
        Ok(deleted == 1)
    }

    fn list<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT doc FROM {table} ORDER BY id"))
            .map_err(LedgerError::unavailable)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(LedgerError::unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(LedgerError::unavailable)?;
        docs.iter().map(|doc| decode(doc)).collect()
    }
}

fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS users (
             id INTEGER PRIMARY KEY,
             doc TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS servers (
             id INTEGER PRIMARY KEY,
             doc TEXT NOT NULL
         );",
    )
    .map_err(LedgerError::unavailable)
}

fn select_doc(conn: &Connection, table: &str, id: u64) -> Result<Option<String>, LedgerError> {
    conn.query_row(
        &format!("SELECT doc FROM {table} WHERE id = ?1"),
        params![id as i64],
        |row| row.get(0),
    )
    .optional()
    .map_err(LedgerError::unavailable)
}

fn encode<T: Serialize>(document: &T) -> Result<String, LedgerError> {
    serde_json::to_string(document).map_err(|e| LedgerError::Corrupt(e.to_string()))
}

fn decode<T: DeserializeOwned>(doc: &str) -> Result<T, LedgerError> {
    serde_json::from_str(doc).map_err(|e| LedgerError::Corrupt(e.to_string()))
}

impl DocumentStore for SqliteStore {
    fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, LedgerError> {
        self.get(USERS, id.0)
    }

    fn insert_user(&self, account: &UserAccount) -> Result<bool, LedgerError> {
        self.insert(USERS, account.id.0, account)
    }

    fn update_user(
        &self,
        id: UserId,
        mutation: Mutation<'_, UserAccount>,
    ) -> Result<UserAccount, LedgerError> {
        self.update(USERS, AccountKind::User, id.0, mutation)
    }

    fn delete_user(&self, id: UserId) -> Result<bool, LedgerError> {
        self.delete(USERS, id.0)
    }

    fn list_users(&self) -> Result<Vec<UserAccount>, LedgerError> {
        self.list(USERS)
    }

    fn get_server(&self, id: ServerId) -> Result<Option<ServerAccount>, LedgerError> {
        self.get(SERVERS, id.0)
    }

    fn insert_server(&self, account: &ServerAccount) -> Result<bool, LedgerError> {
        self.insert(SERVERS, account.id.0, account)
    }

    fn update_server(
        &self,
        id: ServerId,
        mutation: Mutation<'_, ServerAccount>,
    ) -> Result<ServerAccount, LedgerError> {
        self.update(SERVERS, AccountKind::Server, id.0, mutation)
    }

    fn delete_server(&self, id: ServerId) -> Result<bool, LedgerError> {
        self.delete(SERVERS, id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Currency, EntryKind, LedgerEntry};

    #[test]
    fn test_documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("casino.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            assert!(store.insert_user(&UserAccount::new(UserId(10))).unwrap());
            store
                .update_user(UserId(10), &mut |account| {
                    account.balances.points = 2_500;
                    account.history.push(LedgerEntry::new(
                        EntryKind::Deposit,
                        Currency::Points,
                        0,
                        2_500,
                    ));
                    Ok(())
                })
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let account = store.get_user(UserId(10)).unwrap().unwrap();
        assert_eq!(account.balances.points, 2_500);
        assert_eq!(account.history.len(), 1);
    }

    #[test]
    fn test_rolled_back_mutation() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_server(&ServerAccount::new(ServerId(3), "lounge"))
            .unwrap();

        let result = store.update_server(ServerId(3), &mut |server| {
            server.total_profit = 77;
            Err(LedgerError::InvalidAmount("nope".to_string()))
        });
        assert!(result.is_err());
        let server = store.get_server(ServerId(3)).unwrap().unwrap();
        assert_eq!(server.total_profit, 0);
        assert_eq!(server.name, "lounge");
    }

    #[test]
    fn test_large_snowflake_ids() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = UserId(u64::MAX - 5);
        assert!(store.insert_user(&UserAccount::new(id)).unwrap());
        assert!(!store.insert_user(&UserAccount::new(id)).unwrap());
        assert_eq!(store.get_user(id).unwrap().unwrap().id, id);
        assert!(store.delete_user(id).unwrap());
        assert!(store.get_user(id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_document() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .lock()
            .execute(
                "INSERT INTO users (id, doc) VALUES (1, 'not json')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.get_user(UserId(1)),
            Err(LedgerError::Corrupt(_))
        ));
    }

    #[test]
    fn test_panicking_mutation_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(&UserAccount::new(UserId(1))).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.update_user(UserId(1), &mut |account| {
                account.balances.points = 999;
                panic!("mutation blew up");
            })
        }));
        assert!(result.is_err());

        assert_eq!(store.get_user(UserId(1)).unwrap().unwrap().balances.points, 0);
        assert!(store.insert_user(&UserAccount::new(UserId(2))).unwrap());
    }
}
