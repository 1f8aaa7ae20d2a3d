//! Transfer Engine
//!
//! Moves funds between two accounts inside one transaction scope:
//!
//! ```text
//! BEGIN
//!   INSERT transfer {from, to, amount}
//!   INSERT entry {from, -amount}
//!   INSERT entry {to, +amount}
//!   add_account_balance(lower id)    ← row lock
//!   add_account_balance(higher id)   ← row lock
//! COMMIT
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All-or-nothing**: any failed step rolls the whole scope back
//! 2. **Lock order**: balances are always updated lowest account id first, so
//!    two transfers touching the same pair can never wait on each other
//! 3. **Store-side arithmetic**: balances only change through
//!    `add_account_balance`, never read-then-write in the engine


use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::{
    Account, CreateEntryParams, CreateTransferParams, Entry, Queries, Store, StoreError,
    StoreResult, Transfer, exec_tx,
};

/// Input of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

/// Everything one transfer created or changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

pub struct TransferEngine<S: Store> {
    store: Arc<S>,
    timeout: Option<Duration>,
}

impl<S: Store> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: Store> TransferEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Abort (and roll back) transfers that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Execute one transfer atomically.
    ///
    /// Errors are returned as the store reported them. Dropping the returned
    /// future before it resolves rolls the transaction back.
    pub async fn transfer_tx(&self, arg: TransferTxParams) -> StoreResult<TransferTxResult> {
        let run = exec_tx(self.store.as_ref(), move |q| Box::pin(transfer_in_tx(q, arg)));

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            },
            None => run.await,
        };

        match &result {
            Ok(res) => tracing::info!(
                transfer_id = res.transfer.id,
                from = arg.from_account_id,
                to = arg.to_account_id,
                amount = arg.amount,
                "Transfer committed"
            ),
            Err(e) => tracing::warn!(
                from = arg.from_account_id,
                to = arg.to_account_id,
                amount = arg.amount,
                code = e.code(),
                error = %e,
                "Transfer rolled back"
            ),
        }
        result
    }
}

async fn transfer_in_tx<Q: Queries + ?Sized>(
    q: &mut Q,
    arg: TransferTxParams,
) -> StoreResult<TransferTxResult> {
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.from_account_id,
            amount: -arg.amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let (from_account, to_account) = if arg.from_account_id < arg.to_account_id {
        tracing::debug!(first = arg.from_account_id, second = arg.to_account_id, "Lock order");
        move_money(q, arg.from_account_id, -arg.amount, arg.to_account_id, arg.amount).await?
    } else {
        tracing::debug!(first = arg.to_account_id, second = arg.from_account_id, "Lock order");
        let (to_account, from_account) =
            move_money(q, arg.to_account_id, arg.amount, arg.from_account_id, -arg.amount).await?;
        if arg.from_account_id == arg.to_account_id {
            // Same row updated twice; only the second snapshot is ever committed
            (from_account.clone(), from_account)
        } else {
            (from_account, to_account)
        }
    };

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply two balance deltas in the given order
async fn move_money<Q: Queries + ?Sized>(
    q: &mut Q,
    account_id1: i64,
    amount1: i64,
    account_id2: i64,
    amount2: i64,
) -> StoreResult<(Account, Account)> {
    let account1 = q.add_account_balance(account_id1, amount1).await?;
    let account2 = q.add_account_balance(account_id2, amount2).await?;
    Ok((account1, account2))
}
