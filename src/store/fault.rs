//! Fault-injecting store for tests
//!
//! Wraps a [`MemoryStore`] and fails one chosen operation with a chosen
//! error, so callers can observe how a failure midway through a scope is
//! handled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::error::{StoreError, StoreResult};
use super::memory::{MemoryStore, MemoryTx};
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer,
};
use super::{Queries, Store, TxScope};

/// Where to inject the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Begin,
    Ping,
    CreateAccount,
    GetAccount,
    ListAccounts,
    /// Only for the given account id
    AddAccountBalance(i64),
    /// Any entry insert
    CreateEntry,
    /// Only entries booked against the given account id
    CreateEntryFor(i64),
    CreateTransfer,
    Commit,
}

#[derive(Default)]
struct FaultState {
    fault: Mutex<Option<(FaultPoint, StoreError)>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl FaultState {
    fn check(&self, point: FaultPoint) -> StoreResult<()> {
        let fault = self.fault.lock().unwrap();
        match fault.as_ref() {
            Some((at, err)) if *at == point => Err(err.clone()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct FaultStore {
    inner: MemoryStore,
    state: Arc<FaultState>,
}

impl FaultStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState::default()),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_at(&self, point: FaultPoint, err: StoreError) {
        *self.state.fault.lock().unwrap() = Some((point, err));
    }

    pub fn clear(&self) {
        *self.state.fault.lock().unwrap() = None;
    }

    pub fn commit_count(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for FaultStore {
    type Tx = Faulty<MemoryTx>;
    type Conn = Faulty<MemoryTx>;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        self.state.check(FaultPoint::Begin)?;
        Ok(Faulty {
            inner: self.inner.begin().await?,
            state: self.state.clone(),
        })
    }

    async fn acquire(&self) -> StoreResult<Self::Conn> {
        Ok(Faulty {
            inner: self.inner.acquire().await?,
            state: self.state.clone(),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.state.check(FaultPoint::Ping)?;
        self.inner.ping().await
    }
}

pub struct Faulty<Q> {
    inner: Q,
    state: Arc<FaultState>,
}

#[async_trait]
impl<Q: Queries> Queries for Faulty<Q> {
    async fn create_account(&mut self, arg: CreateAccountParams) -> StoreResult<Account> {
        self.state.check(FaultPoint::CreateAccount)?;
        self.inner.create_account(arg).await
    }

    async fn get_account(&mut self, id: i64) -> StoreResult<Account> {
        self.state.check(FaultPoint::GetAccount)?;
        self.inner.get_account(id).await
    }

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> StoreResult<Vec<Account>> {
        self.state.check(FaultPoint::ListAccounts)?;
        self.inner.list_accounts(arg).await
    }

    async fn add_account_balance(&mut self, id: i64, amount: i64) -> StoreResult<Account> {
        self.state.check(FaultPoint::AddAccountBalance(id))?;
        self.inner.add_account_balance(id, amount).await
    }

    async fn delete_account(&mut self, id: i64) -> StoreResult<()> {
        self.inner.delete_account(id).await
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> StoreResult<Entry> {
        self.state.check(FaultPoint::CreateEntry)?;
        self.state.check(FaultPoint::CreateEntryFor(arg.account_id))?;
        self.inner.create_entry(arg).await
    }

    async fn get_entry(&mut self, id: i64) -> StoreResult<Entry> {
        self.inner.get_entry(id).await
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        self.inner.list_entries(arg).await
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> StoreResult<Transfer> {
        self.state.check(FaultPoint::CreateTransfer)?;
        self.inner.create_transfer(arg).await
    }

    async fn get_transfer(&mut self, id: i64) -> StoreResult<Transfer> {
        self.inner.get_transfer(id).await
    }

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        self.inner.list_transfers(arg).await
    }
}

#[async_trait]
impl<Q: TxScope> TxScope for Faulty<Q> {
    async fn commit(self) -> StoreResult<()> {
        if let Err(err) = self.state.check(FaultPoint::Commit) {
            // A failed commit leaves nothing behind
            self.inner.rollback().await?;
            return Err(err);
        }
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Currency;

    #[tokio::test]
    async fn test_entry_fault_targets_one_account() {
        let store = FaultStore::new(MemoryStore::new());
        let mut conn = store.acquire().await.unwrap();
        let mut ids = Vec::new();
        for name in ["debit", "credit"] {
            let account = conn
                .create_account(CreateAccountParams {
                    username: name.into(),
                    balance: 0,
                    currency: Currency::Usd,
                })
                .await
                .unwrap();
            ids.push(account.id);
        }

        let injected = StoreError::Database("entry".into());
        store.fail_at(FaultPoint::CreateEntryFor(ids[1]), injected.clone());

        conn.create_entry(CreateEntryParams {
            account_id: ids[0],
            amount: -1,
        })
        .await
        .unwrap();
        let err = conn
            .create_entry(CreateEntryParams {
                account_id: ids[1],
                amount: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err, injected);
    }
}
