//! Gateway types module
//!
//! - [`request`]: request DTOs and the validating extractors
//! - [`response`]: response envelope, error path and error codes

pub mod request;
pub mod response;

pub use request::{
    CreateAccountRequest, CreateTransferRequest, ListAccountsQuery, ValidatedJson,
    ValidatedQuery,
};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
