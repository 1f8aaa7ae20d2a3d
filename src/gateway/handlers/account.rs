//! Account handlers

use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateAccountRequest, ListAccountsQuery, ValidatedJson, ValidatedQuery,
    ok,
};
use crate::store::{Account, CreateAccountParams, Currency, ListAccountsParams};

/// Open a new account with a zero balance
#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 200, description = "Account created", body = Account, content_type = "application/json"),
        (status = 400, description = "Invalid parameters"),
        (status = 500, description = "Internal error")
    ),
    tag = "Account"
)]
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> ApiResult<Account> {
    let currency = req
        .currency
        .parse::<Currency>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let account = state
        .ledger
        .create_account(CreateAccountParams {
            username: req.username,
            balance: 0,
            currency,
        })
        .await?;
    ok(account)
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}",
    params(("id" = i64, Path, description = "Account id (>= 1)")),
    responses(
        (status = 200, description = "Account", body = Account, content_type = "application/json"),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Account not found")
    ),
    tag = "Account"
)]
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Account> {
    let Path(id) = id.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if id < 1 {
        return ApiError::bad_request("id must be >= 1").into_err();
    }

    let account = state.ledger.get_account(id).await?;
    ok(account)
}

/// Page through accounts ordered by id
#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    params(ListAccountsQuery),
    responses(
        (status = 200, description = "Account page", body = Vec<Account>, content_type = "application/json"),
        (status = 400, description = "Invalid paging")
    ),
    tag = "Account"
)]
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<ListAccountsQuery>,
) -> ApiResult<Vec<Account>> {
    let accounts = state
        .ledger
        .list_accounts(ListAccountsParams {
            limit: i64::from(query.page_size),
            offset: query.offset(),
        })
        .await?;
    ok(accounts)
}
