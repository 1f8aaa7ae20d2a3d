//! PostgreSQL record store
//!
//! One query implementation ([`PgQueries`]) serves both pooled connections
//! and transactions, since both deref to a `PgConnection`.

use std::ops::DerefMut;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::error::{StoreError, StoreResult};
use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer,
};
use super::{Queries, Store, TxScope};

const ACCOUNT_COLUMNS: &str = "id, username, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Record store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub type PgTx = PgQueries<Transaction<'static, Postgres>>;
pub type PgConn = PgQueries<PoolConnection<Postgres>>;

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;
    type Conn = PgConn;

    async fn begin(&self) -> StoreResult<PgTx> {
        Ok(PgQueries(self.pool.begin().await?))
    }

    async fn acquire(&self) -> StoreResult<PgConn> {
        Ok(PgQueries(self.pool.acquire().await?))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Ledger queries over anything that derefs to a `PgConnection`
pub struct PgQueries<C>(C);

#[async_trait]
impl<C> Queries for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_account(&mut self, arg: CreateAccountParams) -> StoreResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (username, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(&arg.username)
            .bind(arg.balance)
            .bind(arg.currency.as_str())
            .fetch_one(&mut *self.0)
            .await?;
        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> StoreResult<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(account)
    }

    async fn list_accounts(&mut self, arg: ListAccountsParams) -> StoreResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY id LIMIT $1 OFFSET $2",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query_as::<_, Account>(&sql)
            .bind(arg.limit)
            .bind(arg.offset)
            .fetch_all(&mut *self.0)
            .await?;
        Ok(rows)
    }

    async fn add_account_balance(&mut self, id: i64, amount: i64) -> StoreResult<Account> {
        // Single-statement read-modify-write; the row lock lasts until the scope ends
        let sql = format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(amount)
            .bind(id)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(account)
    }

    async fn delete_account(&mut self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.0)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> StoreResult<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        );
        let entry = sqlx::query_as::<_, Entry>(&sql)
            .bind(arg.account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> StoreResult<Entry> {
        let sql = format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS);
        let entry = sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(entry)
    }

    async fn list_entries(&mut self, arg: ListEntriesParams) -> StoreResult<Vec<Entry>> {
        let sql = format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, Entry>(&sql)
            .bind(arg.account_id)
            .bind(arg.limit)
            .bind(arg.offset)
            .fetch_all(&mut *self.0)
            .await?;
        Ok(rows)
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> StoreResult<Transfer> {
        let sql = format!(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount)
               VALUES ($1, $2, $3) RETURNING {}"#,
            TRANSFER_COLUMNS
        );
        let transfer = sqlx::query_as::<_, Transfer>(&sql)
            .bind(arg.from_account_id)
            .bind(arg.to_account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> StoreResult<Transfer> {
        let sql = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);
        let transfer = sqlx::query_as::<_, Transfer>(&sql)
            .bind(id)
            .fetch_one(&mut *self.0)
            .await?;
        Ok(transfer)
    }

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> StoreResult<Vec<Transfer>> {
        let sql = format!(
            r#"SELECT {} FROM transfers
               WHERE from_account_id = $1 OR to_account_id = $2
               ORDER BY id LIMIT $3 OFFSET $4"#,
            TRANSFER_COLUMNS
        );
        let rows = sqlx::query_as::<_, Transfer>(&sql)
            .bind(arg.from_account_id)
            .bind(arg.to_account_id)
            .bind(arg.limit)
            .bind(arg.offset)
            .fetch_all(&mut *self.0)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TxScope for PgTx {
    async fn commit(self) -> StoreResult<()> {
        self.0.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        self.0.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, test_db_source};
    use crate::store::models::Currency;

    // Note: These tests require a running PostgreSQL instance

    async fn store() -> PgStore {
        let db = Database::connect(&test_db_source(), 10)
            .await
            .expect("Failed to connect");
        db.apply_schema().await.expect("Failed to apply schema");
        PgStore::new(db.pool().clone())
    }

    async fn random_account(conn: &mut PgConn) -> Account {
        conn.create_account(CreateAccountParams {
            username: format!("user_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)),
            balance: 1_000,
            currency: Currency::Usd,
        })
        .await
        .expect("Should create account")
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_create_and_get_account() {
        let store = store().await;
        let mut conn = store.acquire().await.unwrap();

        let account = random_account(&mut conn).await;
        assert!(account.id > 0);
        assert_eq!(account.balance, 1_000);

        let fetched = conn.get_account(account.id).await.unwrap();
        assert_eq!(fetched, account);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_get_missing_account_is_not_found() {
        let store = store().await;
        let mut conn = store.acquire().await.unwrap();
        assert_eq!(conn.get_account(i64::MAX).await, Err(StoreError::NotFound));
        assert_eq!(
            conn.add_account_balance(i64::MAX, 1).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_add_account_balance() {
        let store = store().await;
        let mut conn = store.acquire().await.unwrap();
        let account = random_account(&mut conn).await;

        let updated = conn.add_account_balance(account.id, -250).await.unwrap();
        assert_eq!(updated.balance, 750);
        assert_eq!(updated.currency, account.currency);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_foreign_key_violation_is_constraint() {
        let store = store().await;
        let mut conn = store.acquire().await.unwrap();

        let err = conn
            .create_entry(CreateEntryParams {
                account_id: i64::MAX,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert!(err.is_constraint(), "got {:?}", err);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_rolled_back_transaction_leaves_no_rows() {
        let store = store().await;
        let mut conn = store.acquire().await.unwrap();
        let account = random_account(&mut conn).await;

        let mut tx = store.begin().await.unwrap();
        let entry = tx
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 10,
            })
            .await
            .unwrap();
        tx.add_account_balance(account.id, 10).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(conn.get_entry(entry.id).await, Err(StoreError::NotFound));
        assert_eq!(conn.get_account(account.id).await.unwrap().balance, 1_000);
    }
}
