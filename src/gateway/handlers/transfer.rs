//! Transfer handler

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateTransferRequest, ValidatedJson, error_codes, ok,
};
use crate::store::{Account, Currency};
use crate::transfer::{TransferTxParams, TransferTxResult};

/// Move funds between two accounts of the same currency
///
/// POST /api/v1/transfers
#[utoipa::path(
    post,
    path = "/api/v1/transfers",
    request_body = CreateTransferRequest,
    responses(
        (status = 200, description = "Transfer committed", body = TransferTxResult, content_type = "application/json"),
        (status = 400, description = "Invalid parameters or currency mismatch"),
        (status = 404, description = "Account not found"),
        (status = 500, description = "Internal error")
    ),
    tag = "Transfer"
)]
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<CreateTransferRequest>,
) -> ApiResult<TransferTxResult> {
    let currency = req
        .currency
        .parse::<Currency>()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    if req.from_account_id == req.to_account_id {
        return ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::SAME_ACCOUNT,
            "from_account_id and to_account_id must differ",
        )
        .into_err();
    }

    valid_account(&state, req.from_account_id, currency).await?;
    valid_account(&state, req.to_account_id, currency).await?;

    let result = state
        .ledger
        .transfer(TransferTxParams {
            from_account_id: req.from_account_id,
            to_account_id: req.to_account_id,
            amount: req.amount,
        })
        .await?;
    ok(result)
}

/// The account must exist and hold `currency`
async fn valid_account(state: &AppState, id: i64, currency: Currency) -> Result<Account, ApiError> {
    let account = state.ledger.get_account(id).await.map_err(|e| {
        if e.is_not_found() {
            ApiError::not_found(format!("account {} not found", id))
        } else {
            ApiError::from(e)
        }
    })?;

    if account.currency != currency {
        return ApiError::new(
            StatusCode::BAD_REQUEST,
            error_codes::CURRENCY_MISMATCH,
            format!(
                "account {} currency mismatch: {} vs {}",
                id, account.currency, currency
            ),
        )
        .into_err();
    }
    Ok(account)
}
