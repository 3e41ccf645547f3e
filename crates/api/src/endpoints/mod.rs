//! API endpoints.

mod auth;
mod polls;
mod votes;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .nest("/polls", polls::router().merge(votes::router()))
}
