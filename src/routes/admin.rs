use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post, put},
};

/// Admin Router Module
///
/// Mounted under `/admin` behind the admin gate, which requires a valid token and at
/// least the `admin` role. Identity management additionally requires `super_admin`,
/// checked inside the handlers.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Identity management (super_admin) ---
        .route(
            "/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // --- Posts ---
        .route("/posts", get(handlers::list_posts))
        .route("/posts/delete-batch", post(handlers::delete_posts))
        .route("/posts/{id}", get(handlers::get_post))
        // --- Practice rooms ---
        .route("/rooms", get(handlers::list_rooms))
        .route("/rooms/delete-batch", post(handlers::delete_rooms))
        .route("/rooms/{id}", get(handlers::get_room))
        // PATCH /rooms/{id}/toggle
        // Single-row flip of `is_active`; does not go through the cascade coordinator.
        .route("/rooms/{id}/toggle", patch(handlers::toggle_room))
        // --- Comments ---
        .route("/comments", get(handlers::list_comments))
        .route("/comments/delete-batch", post(handlers::delete_comments))
        .route("/comments/{id}", put(handlers::update_comment))
        // --- Leaf resources, single-table batches ---
        .route(
            "/training-records/delete-batch",
            post(handlers::delete_training_records),
        )
        .route("/post-likes/delete-batch", post(handlers::delete_post_likes))
        .route(
            "/post-collections/delete-batch",
            post(handlers::delete_post_collections),
        )
        .route("/follows/delete-batch", post(handlers::delete_follows))
        // --- Content hygiene ---
        .route(
            "/tongue-twisters/clean",
            post(handlers::clean_tongue_twisters),
        )
        // --- Audit trail (read-only) ---
        .route("/operation-logs", get(handlers::list_operation_logs))
        .route("/operation-logs/{id}", get(handlers::get_operation_log))
}
