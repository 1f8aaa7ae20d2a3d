//! Ledger service
//!
//! [`Ledger`] is the port the gateway talks to. [`LedgerService`] implements
//! it over any [`Store`], routing single-row reads and writes to an
//! autocommit connection and transfers to the [`TransferEngine`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AppConfig;
use crate::db::Database;
use crate::store::{
    Account, CreateAccountParams, ListAccountsParams, MemoryStore, PgStore, Queries, Store,
    StoreError, StoreResult,
};
use crate::transfer::{TransferEngine, TransferTxParams, TransferTxResult};

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_account(&self, arg: CreateAccountParams) -> StoreResult<Account>;

    async fn get_account(&self, id: i64) -> StoreResult<Account>;

    async fn list_accounts(&self, arg: ListAccountsParams) -> StoreResult<Vec<Account>>;

    async fn transfer(&self, arg: TransferTxParams) -> StoreResult<TransferTxResult>;

    async fn ping(&self) -> StoreResult<()>;
}

pub struct LedgerService<S: Store> {
    store: Arc<S>,
    engine: TransferEngine<S>,
}

impl<S: Store> LedgerService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            engine: TransferEngine::new(store.clone()),
            store,
        }
    }

    pub fn with_transfer_timeout(mut self, timeout: Option<Duration>) -> Self {
        if let Some(timeout) = timeout {
            self.engine = self.engine.with_timeout(timeout);
        }
        self
    }
}

#[async_trait]
impl<S: Store> Ledger for LedgerService<S> {
    async fn create_account(&self, arg: CreateAccountParams) -> StoreResult<Account> {
        let account = self.store.acquire().await?.create_account(arg).await?;
        tracing::info!(account_id = account.id, currency = %account.currency, "Account created");
        Ok(account)
    }

    async fn get_account(&self, id: i64) -> StoreResult<Account> {
        self.store.acquire().await?.get_account(id).await
    }

    async fn list_accounts(&self, arg: ListAccountsParams) -> StoreResult<Vec<Account>> {
        self.store.acquire().await?.list_accounts(arg).await
    }

    async fn transfer(&self, arg: TransferTxParams) -> StoreResult<TransferTxResult> {
        self.engine.transfer_tx(arg).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.store.ping().await
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown database driver: {0}")]
    UnknownDriver(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Build the ledger for the configured driver.
///
/// With `init_schema`, the PostgreSQL tables are created if missing.
pub async fn connect(config: &AppConfig, init_schema: bool) -> Result<Arc<dyn Ledger>, ServiceError> {
    let db_config = &config.database;
    let timeout = config.transfer_timeout();

    match db_config.driver.as_str() {
        "postgres" | "postgresql" => {
            let db = Database::connect_with(
                &db_config.source,
                db_config.max_connections,
                Duration::from_millis(db_config.acquire_timeout_ms),
            )
            .await
            .map_err(StoreError::from)?;
            if init_schema {
                db.apply_schema().await.map_err(StoreError::from)?;
            }
            let store = Arc::new(PgStore::new(db.pool().clone()));
            Ok(Arc::new(LedgerService::new(store).with_transfer_timeout(timeout)))
        }
        "memory" => {
            tracing::warn!("Using in-memory store; data is lost on exit");
            let store = Arc::new(MemoryStore::with_lock_wait(Duration::from_millis(
                db_config.lock_wait_ms,
            )));
            Ok(Arc::new(LedgerService::new(store).with_transfer_timeout(timeout)))
        }
        other => Err(ServiceError::UnknownDriver(other.to_string())),
    }
}
