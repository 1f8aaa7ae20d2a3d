//! Record Store
//!
//! Durable storage of accounts, entries and transfers behind three traits:
//!
//! - [`Queries`]: single-row operations, usable inside or outside a transaction
//! - [`TxScope`]: a transaction scope (commit / rollback)
//! - [`Store`]: the shared handle that opens scopes and autocommit connections
//!
//! Two backends: [`postgres::PgStore`] and [`memory::MemoryStore`].

pub mod error;
#[cfg(test)]
pub mod fault;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use futures::future::BoxFuture;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Currency, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer,
};
pub use postgres::PgStore;

/// Row-level operations on the ledger tables
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, arg: CreateAccountParams) -> StoreResult<Account>;

    async fn get_account(&mut self, id: i64) -> StoreResult<Account>;

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> StoreResult<Vec<Account>>;

    /// Atomically add `amount` to the balance and return the updated row.
    ///
    /// The row stays locked until the enclosing scope ends.
    async fn add_account_balance(&mut self, id: i64, amount: i64) -> StoreResult<Account>;

    async fn delete_account(&mut self, id: i64) -> StoreResult<()>;

    async fn create_entry(&mut self, arg: CreateEntryParams) -> StoreResult<Entry>;

    async fn get_entry(&mut self, id: i64) -> StoreResult<Entry>;

    async fn list_entries(&mut self, arg: ListEntriesParams) -> StoreResult<Vec<Entry>>;

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> StoreResult<Transfer>;

    async fn get_transfer(&mut self, id: i64) -> StoreResult<Transfer>;

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> StoreResult<Vec<Transfer>>;
}

/// A transaction scope.
///
/// Dropping a scope without calling [`TxScope::commit`] rolls it back.
#[async_trait]
pub trait TxScope: Queries {
    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: TxScope;
    type Conn: Queries;

    /// Open a transaction scope
    async fn begin(&self) -> StoreResult<Self::Tx>;

    /// Get an autocommit connection for single-row work
    async fn acquire(&self) -> StoreResult<Self::Conn>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Run `f` inside a transaction scope.
///
/// Commits only when `f` returns `Ok`; any error rolls the scope back and is
/// returned unchanged (wrapped together with the rollback error if the
/// rollback itself fails).
pub async fn exec_tx<S, T, F>(store: &S, f: F) -> StoreResult<T>
where
    S: Store + ?Sized,
    T: Send,
    F: for<'c> FnOnce(&'c mut S::Tx) -> BoxFuture<'c, StoreResult<T>> + Send,
{
    let mut tx = store.begin().await?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %err, rollback_error = %rollback_err, "Rollback failed");
                return Err(StoreError::Rollback {
                    tx: Box::new(err),
                    rollback: Box::new(rollback_err),
                });
            }
            Err(err)
        }
    }
}
