use crate::{AppState, handlers};
use axum::{Router, routing::post};

/// Public Router Module
///
/// Endpoints under `/api/v1` reachable without a session token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /admin/login
        // Credential exchange. Sits outside the admin gate since it issues the token the gate checks.
        .route("/admin/login", post(handlers::login))
}
