pub mod bookings;
pub mod health;
pub mod intake;
pub mod passes;

use axum::http::HeaderMap;

use crate::errors::AppError;
use crate::models::{Requester, Role};

/// The upstream identity provider injects the caller's identity as
/// headers; this service trusts the gateway and never authenticates.
pub fn require_identity(headers: &HeaderMap) -> Result<Requester, AppError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let user_id = get("x-user-id").ok_or(AppError::Unauthorized)?;
    let community_id = get("x-community-id").ok_or(AppError::Unauthorized)?;

    Ok(Requester {
        user_id,
        user_email: get("x-user-email").unwrap_or_default(),
        user_name: get("x-user-name").unwrap_or_default(),
        role: Role::parse(&get("x-user-role").unwrap_or_default()),
        community_id,
    })
}
