//! In-process record store
//!
//! Rows live in per-table arenas addressed by id. Balance mutation takes a
//! per-account row lock (fine-grained, one `tokio::sync::Mutex` per account
//! in a `DashMap`) that is held until the scope commits or rolls back, the
//! same way a relational engine holds a row lock taken by `UPDATE`.
//!
//! Writes made inside a scope are kept in an overlay and only become visible
//! to other scopes on commit (read-committed).
//!
//! Entry and transfer inserts do not take row locks. Instead each scope
//! registers the accounts it references in `pending_refs`, and a delete
//! registers itself in `pending_deletes`; both sides check the other under
//! the tables mutex, so an account can never be removed while an open scope
//! still points at it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;

use super::error::{StoreError, StoreResult};
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer,
};
use super::{Queries, Store, TxScope};

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    account_seq: i64,
    entry_seq: i64,
    transfer_seq: i64,
    // Uncommitted entry/transfer references per account, across all scopes
    pending_refs: HashMap<i64, usize>,
    // Accounts with an uncommitted delete
    pending_deletes: HashSet<i64>,
}

impl Tables {
    fn has_references(&self, account_id: i64) -> bool {
        self.entries.values().any(|e| e.account_id == account_id)
            || self
                .transfers
                .values()
                .any(|t| t.from_account_id == account_id || t.to_account_id == account_id)
    }
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    lock_wait: Duration,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Shared in-memory store handle (cheap to clone)
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }

    /// `lock_wait` bounds how long a scope waits for another scope's row lock
    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                lock_wait,
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;
    type Conn = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx::new(self.inner.clone(), false))
    }

    async fn acquire(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx::new(self.inner.clone(), true))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// A transaction scope (or, with `autocommit`, a plain connection)
pub struct MemoryTx {
    inner: Arc<Inner>,
    autocommit: bool,
    held: HashMap<i64, OwnedMutexGuard<()>>,
    // `None` marks a deleted account
    accounts: BTreeMap<i64, Option<Account>>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    // This scope's share of `Tables::pending_refs`
    refs: HashMap<i64, usize>,
}

impl MemoryTx {
    fn new(inner: Arc<Inner>, autocommit: bool) -> Self {
        Self {
            inner,
            autocommit,
            held: HashMap::new(),
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            transfers: BTreeMap::new(),
            refs: HashMap::new(),
        }
    }

    async fn lock_row(&mut self, id: i64) -> StoreResult<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let lock = self.inner.row_lock(id);
        let guard = tokio::time::timeout(self.inner.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(format!("row lock on account {}", id)))?;
        self.held.insert(id, guard);
        Ok(())
    }

    fn account(&self, id: i64) -> Option<Account> {
        match self.accounts.get(&id) {
            Some(slot) => slot.clone(),
            None => self.inner.tables().accounts.get(&id).cloned(),
        }
    }

    /// Check that every referenced account exists and is not being deleted
    /// by another scope, then record the references until this scope ends.
    fn reference_accounts(&mut self, targets: &[(i64, &str)]) -> StoreResult<()> {
        let mut tables = self.inner.tables();
        for &(id, constraint) in targets {
            let visible = match self.accounts.get(&id) {
                Some(slot) => slot.is_some(),
                None => tables.accounts.contains_key(&id),
            };
            // Our own delete shows up as a `None` slot, so a pending delete
            // seen here always belongs to someone else
            if !visible || tables.pending_deletes.contains(&id) {
                return Err(StoreError::Constraint(constraint.to_string()));
            }
        }
        for &(id, _) in targets {
            *tables.pending_refs.entry(id).or_default() += 1;
            *self.refs.entry(id).or_default() += 1;
        }
        Ok(())
    }

    fn release_refs(&mut self, tables: &mut Tables) {
        for (id, n) in self.refs.drain() {
            if let Some(count) = tables.pending_refs.get_mut(&id) {
                *count = count.saturating_sub(n);
                if *count == 0 {
                    tables.pending_refs.remove(&id);
                }
            }
        }
    }

    /// Publish the overlay, then release row locks
    fn apply(&mut self) {
        let mut deleted = Vec::new();
        {
            let inner = self.inner.clone();
            let mut tables = inner.tables();
            for (id, slot) in std::mem::take(&mut self.accounts) {
                match slot {
                    Some(account) => {
                        tables.accounts.insert(id, account);
                    }
                    None => {
                        tables.accounts.remove(&id);
                        tables.pending_deletes.remove(&id);
                        deleted.push(id);
                    }
                }
            }
            tables.entries.append(&mut self.entries);
            tables.transfers.append(&mut self.transfers);
            self.release_refs(&mut tables);
        }
        self.held.clear();
        // Ids are never reused, so a deleted account's lock is dead weight
        for id in deleted {
            self.inner.row_locks.remove(&id);
        }
    }

    fn discard(&mut self) {
        {
            let inner = self.inner.clone();
            let mut tables = inner.tables();
            for (id, slot) in &self.accounts {
                if slot.is_none() {
                    tables.pending_deletes.remove(id);
                }
            }
            self.release_refs(&mut tables);
        }
        self.accounts.clear();
        self.entries.clear();
        self.transfers.clear();
        self.held.clear();
    }

    fn settle<T>(&mut self, result: StoreResult<T>) -> StoreResult<T> {
        if self.autocommit {
            match result {
                Ok(_) => self.apply(),
                Err(_) => self.discard(),
            }
        }
        result
    }

    fn merged_accounts(&self) -> BTreeMap<i64, Account> {
        let mut rows = self.inner.tables().accounts.clone();
        for (id, slot) in &self.accounts {
            match slot {
                Some(account) => rows.insert(*id, account.clone()),
                None => rows.remove(id),
            };
        }
        rows
    }

    fn entries_where(&self, pred: impl Fn(&Entry) -> bool) -> Vec<Entry> {
        let tables = self.inner.tables();
        let mut rows: Vec<Entry> = tables
            .entries
            .values()
            .chain(self.entries.values())
            .filter(|e| pred(e))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.id);
        rows
    }

    fn transfers_where(&self, pred: impl Fn(&Transfer) -> bool) -> Vec<Transfer> {
        let tables = self.inner.tables();
        let mut rows: Vec<Transfer> = tables
            .transfers
            .values()
            .chain(self.transfers.values())
            .filter(|t| pred(t))
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.id);
        rows
    }

    async fn add_balance_locked(&mut self, id: i64, amount: i64) -> StoreResult<Account> {
        self.lock_row(id).await?;
        let mut account = self.account(id).ok_or(StoreError::NotFound)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Constraint("accounts_balance_range".to_string()))?;
        self.accounts.insert(id, Some(account.clone()));
        Ok(account)
    }

    async fn delete_locked(&mut self, id: i64) -> StoreResult<()> {
        self.lock_row(id).await?;
        if self.account(id).is_none() {
            return Err(StoreError::NotFound);
        }
        {
            let mut tables = self.inner.tables();
            let own = self.entries.values().any(|e| e.account_id == id)
                || self
                    .transfers
                    .values()
                    .any(|t| t.from_account_id == id || t.to_account_id == id);
            let pending = tables.pending_refs.get(&id).copied().unwrap_or(0);
            let others_pending = pending > self.refs.get(&id).copied().unwrap_or(0);
            if own || others_pending || tables.has_references(id) {
                return Err(StoreError::Constraint("entries_account_id_fkey".to_string()));
            }
            tables.pending_deletes.insert(id);
        }
        self.accounts.insert(id, None);
        Ok(())
    }

    fn insert_entry(&mut self, arg: CreateEntryParams) -> StoreResult<Entry> {
        self.reference_accounts(&[(arg.account_id, "entries_account_id_fkey")])?;
        let id = next_id(&mut self.inner.tables().entry_seq);
        let entry = Entry {
            id,
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }

    fn insert_transfer(&mut self, arg: CreateTransferParams) -> StoreResult<Transfer> {
        if arg.amount <= 0 {
            return Err(StoreError::Constraint("transfers_amount_check".to_string()));
        }
        self.reference_accounts(&[
            (arg.from_account_id, "transfers_from_account_id_fkey"),
            (arg.to_account_id, "transfers_to_account_id_fkey"),
        ])?;
        let id = next_id(&mut self.inner.tables().transfer_seq);
        let transfer = Transfer {
            id,
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(id, transfer.clone());
        Ok(transfer)
    }
}

fn next_id(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// Validate LIMIT/OFFSET the way the SQL backend would
fn page(limit: i64, offset: i64) -> StoreResult<(usize, usize)> {
    let limit = usize::try_from(limit)
        .map_err(|_| StoreError::Database("LIMIT must not be negative".to_string()))?;
    let offset = usize::try_from(offset)
        .map_err(|_| StoreError::Database("OFFSET must not be negative".to_string()))?;
    Ok((limit, offset))
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> StoreResult<Account> {
        let id = next_id(&mut self.inner.tables().account_seq);
        let account = Account {
            id,
            username: arg.username,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, Some(account.clone()));
        self.settle(Ok(account))
    }

    async fn get_account(&mut self, id: i64) -> StoreResult<Account> {
        self.account(id).ok_or(StoreError::NotFound)
    }

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> StoreResult<Vec<Account>> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .merged_accounts()
            .into_values()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn add_account_balance(&mut self, id: i64, amount: i64) -> StoreResult<Account> {
        let result = self.add_balance_locked(id, amount).await;
        self.settle(result)
    }

    async fn delete_account(&mut self, id: i64) -> StoreResult<()> {
        let result = self.delete_locked(id).await;
        self.settle(result)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> StoreResult<Entry> {
        let result = self.insert_entry(arg);
        self.settle(result)
    }

    async fn get_entry(&mut self, id: i64) -> StoreResult<Entry> {
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        self.inner
            .tables()
            .entries
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .entries_where(|e| e.account_id == arg.account_id)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> StoreResult<Transfer> {
        let result = self.insert_transfer(arg);
        self.settle(result)
    }

    async fn get_transfer(&mut self, id: i64) -> StoreResult<Transfer> {
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.inner
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        let (limit, offset) = page(arg.limit, arg.offset)?;
        Ok(self
            .transfers_where(|t| {
                t.from_account_id == arg.from_account_id || t.to_account_id == arg.to_account_id
            })
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }
}

#[async_trait]
impl TxScope for MemoryTx {
    async fn commit(mut self) -> StoreResult<()> {
        self.apply();
        Ok(())
    }

    async fn rollback(mut self) -> StoreResult<()> {
        self.discard();
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        // No-op after commit or rollback; both leave the overlay empty
        self.discard();
    }
}
