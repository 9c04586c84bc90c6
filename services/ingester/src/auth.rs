//! Identity of the caller, as established by the upstream auth layer.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use flux_common::{FluxError, UserId};

use crate::error::ApiError;

/// Header carrying the authenticated user name.
pub const USER_HEADER: &str = "x-authenticated-user";

/// The authenticated user of a request. Rejects with 401 when absent.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| CurrentUser(UserId::new(user)))
            .ok_or_else(|| FluxError::Unauthenticated.into())
    }
}
