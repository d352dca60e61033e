//! API handlers.

pub mod accounts;
pub mod adventures;
pub mod health;
pub mod purchases;
pub mod webhooks;

use std::str::FromStr;

use crate::error::ApiError;

/// Parse an identifier from a path segment or request body.
fn parse_id<T: FromStr>(kind: &str, value: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {kind}: {e}")))
}
