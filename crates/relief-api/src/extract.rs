//! Request extractors.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use relief_types::Identity;
use serde::Deserialize;

use crate::state::AppState;

/// Header naming the requesting user.
pub const USER_HEADER: &str = "x-user";

#[derive(Debug, Deserialize)]
struct UserParam {
    user: Option<String>,
}

/// The resolved requesting user.
///
/// Taken from the `user` query parameter, else the `x-user` header, and
/// resolved through [`AppState::identity`]. Never rejects: unknown or
/// missing users resolve to the directory's fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub Identity);

impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_query = Query::<UserParam>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(param)| param.user);
        let from_header = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned);
        let handle = from_query.or(from_header);
        Ok(Self(state.identity.resolve(handle.as_deref())))
    }
}
