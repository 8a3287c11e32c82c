use crate::{
    AppState,
    auth::AuthUser,
    cascade::{IdBatch, ResourceKind},
    credentials,
    error::{AppError, AppResult},
    models::{
        AuditLogQuery, AuditRecord, BatchDeleteRequest, BatchDeleteResponse, CleanReport,
        Comment, CreateUserRequest, Identity, IdentityChanges, ListQuery, LoginRequest,
        LoginResponse, NewIdentity, Page, Post, Role, Room, UpdateCommentRequest,
        UpdateUserRequest,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use uuid::Uuid;

/// Lowest role for reads and content moderation.
const MODERATOR: Role = Role::Admin;
/// Identity management requires the top role.
const USER_ADMIN: Role = Role::SuperAdmin;

/// Unwraps a JSON body, turning malformed input into a `ValidationError`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// --- Authentication ---

/// login
///
/// [Public Route] Exchanges administrator credentials for a signed session token.
/// Unknown users, wrong passwords and non-administrative roles are indistinguishable.
#[utoipa::path(
    post,
    path = "/api/v1/admin/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let req = body(payload)?;
    let identity = state.verifier.verify(&req.username, &req.password).await?;
    let issued = state
        .tokens
        .issue(identity.id, &identity.username, identity.role)?;

    if let Err(e) = state
        .identities
        .record_login(identity.id, issued.issued_at)
        .await
    {
        tracing::warn!(actor_id = %identity.id, error = %e, "could not record last login");
    }

    tracing::info!(
        actor_id = %identity.id,
        username = %identity.username,
        role = %identity.role,
        expires_at = %issued.expires_at,
        "administrator logged in"
    );

    Ok(Json(LoginResponse {
        token: issued.token,
        user_id: identity.id,
        username: identity.username,
        role: identity.role,
    }))
}

// --- Identity management ---

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(ListQuery),
    responses((status = 200, description = "Identities", body = Page<Identity>))
)]
pub async fn list_users(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Identity>>> {
    user.require(USER_ADMIN)?;
    let window = query.window();
    let (items, total) = state
        .identities
        .list_identities(window, query.keyword())
        .await?;
    Ok(Json(Page::new(items, total, window)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users/{id}",
    responses(
        (status = 200, description = "Identity", body = Identity),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Identity>> {
    user.require(USER_ADMIN)?;
    state
        .identities
        .get_identity(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user".to_string()))
}

/// create_user
///
/// [Super-admin Route] Creates an identity. The role defaults to `user`.
#[utoipa::path(
    post,
    path = "/api/v1/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Created", body = Identity),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Username taken")
    )
)]
pub async fn create_user(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Identity>)> {
    user.require(USER_ADMIN)?;
    let req = body(payload)?;
    let username = req.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::Validation("username must not be blank".to_string()));
    }
    credentials::validate_new_password(&req.password)?;
    let password_hash = credentials::hash_password(&req.password).await?;

    let result = state
        .identities
        .create_identity(NewIdentity {
            username: username.clone(),
            email: req.email,
            phone: req.phone,
            password_hash,
            role: req.role.unwrap_or(Role::User),
            status: req.status.unwrap_or_default(),
        })
        .await;

    let resource_id = match &result {
        Ok(identity) => identity.id.to_string(),
        Err(_) => username.clone(),
    };
    state
        .audit
        .record_result(
            &user,
            "CreateUser",
            "User",
            &resource_id,
            &result,
            &format!("created user '{username}'"),
        )
        .await;

    result.map(|identity| (StatusCode::CREATED, Json(identity)))
}

/// update_user
///
/// [Super-admin Route] Partial update. A new password is validated and re-hashed.
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = Identity),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<Identity>> {
    user.require(USER_ADMIN)?;
    let req = body(payload)?;
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            credentials::validate_new_password(password)?;
            Some(credentials::hash_password(password).await?)
        }
        None => None,
    };

    let changes = IdentityChanges {
        email: req.email,
        phone: req.phone,
        password_hash,
        role: req.role,
        status: req.status,
    };
    let result = state
        .identities
        .update_identity(id, changes)
        .await
        .and_then(|updated| updated.ok_or_else(|| AppError::NotFound("user".to_string())));

    state
        .audit
        .record_result(&user, "UpdateUser", "User", &id.to_string(), &result, "user updated")
        .await;

    result.map(Json)
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/users/{id}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Still referenced")
    )
)]
pub async fn delete_user(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require(USER_ADMIN)?;
    let result = state.identities.delete_identity(id).await.and_then(|deleted| {
        if deleted {
            Ok(())
        } else {
            Err(AppError::NotFound("user".to_string()))
        }
    });

    state
        .audit
        .record_result(&user, "DeleteUser", "User", &id.to_string(), &result, "user deleted")
        .await;

    result.map(|_| StatusCode::NO_CONTENT)
}

// --- Content reads ---

#[utoipa::path(
    get,
    path = "/api/v1/admin/posts",
    params(ListQuery),
    responses((status = 200, description = "Posts", body = Page<Post>))
)]
pub async fn list_posts(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Post>>> {
    user.require(MODERATOR)?;
    let window = query.window();
    let (items, total) = state.content.list_posts(window, query.keyword()).await?;
    Ok(Json(Page::new(items, total, window)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/posts/{id}",
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_post(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Post>> {
    user.require(MODERATOR)?;
    state
        .content
        .get_post(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("post".to_string()))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rooms",
    params(ListQuery),
    responses((status = 200, description = "Practice rooms", body = Page<Room>))
)]
pub async fn list_rooms(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Room>>> {
    user.require(MODERATOR)?;
    let window = query.window();
    let (items, total) = state.content.list_rooms(window, query.keyword()).await?;
    Ok(Json(Page::new(items, total, window)))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rooms/{id}",
    responses(
        (status = 200, description = "Practice room", body = Room),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_room(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Room>> {
    user.require(MODERATOR)?;
    state
        .content
        .get_room(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("room".to_string()))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/comments",
    params(ListQuery),
    responses((status = 200, description = "Comments", body = Page<Comment>))
)]
pub async fn list_comments(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Comment>>> {
    user.require(MODERATOR)?;
    let window = query.window();
    let (items, total) = state.content.list_comments(window, query.keyword()).await?;
    Ok(Json(Page::new(items, total, window)))
}

// --- Single-row moderation ---

/// toggle_room
///
/// [Admin Route] Flips a room's `is_active` flag. A single-row update, not a cascade.
#[utoipa::path(
    patch,
    path = "/api/v1/admin/rooms/{id}/toggle",
    responses(
        (status = 200, description = "Toggled", body = Room),
        (status = 404, description = "Not Found")
    )
)]
pub async fn toggle_room(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Room>> {
    user.require(MODERATOR)?;
    let result = state
        .content
        .toggle_room(id)
        .await
        .and_then(|room| room.ok_or_else(|| AppError::NotFound("room".to_string())));

    let detail = match &result {
        Ok(room) if room.is_active => "room activated",
        Ok(_) => "room deactivated",
        Err(_) => "",
    };
    state
        .audit
        .record_result(&user, "ToggleRoom", "PracticeRoom", &id.to_string(), &result, detail)
        .await;

    result.map(Json)
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/comments/{id}",
    request_body = UpdateCommentRequest,
    responses(
        (status = 200, description = "Updated", body = Comment),
        (status = 400, description = "Blank content"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_comment(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateCommentRequest>, JsonRejection>,
) -> AppResult<Json<Comment>> {
    user.require(MODERATOR)?;
    let req = body(payload)?;
    if req.content.trim().is_empty() {
        return Err(AppError::Validation("content must not be blank".to_string()));
    }

    let result = state
        .content
        .update_comment(id, &req.content)
        .await
        .and_then(|comment| comment.ok_or_else(|| AppError::NotFound("comment".to_string())));

    state
        .audit
        .record_result(&user, "UpdateComment", "Comment", &id.to_string(), &result, "comment updated")
        .await;

    result.map(Json)
}

/// clean_tongue_twisters
///
/// [Admin Route] Removes blank entries, then duplicate contents keeping the earliest.
#[utoipa::path(
    post,
    path = "/api/v1/admin/tongue-twisters/clean",
    responses((status = 200, description = "Cleaned", body = CleanReport))
)]
pub async fn clean_tongue_twisters(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<CleanReport>> {
    user.require(MODERATOR)?;
    let result = state.content.clean_tongue_twisters().await;

    let detail = match &result {
        Ok(report) => format!(
            "removed {} blank and {} duplicate entries",
            report.deleted_blank_count, report.deleted_duplicate_count
        ),
        Err(_) => String::new(),
    };
    state
        .audit
        .record_result(&user, "CleanTongueTwisters", "TongueTwister", "", &result, &detail)
        .await;

    result.map(Json)
}

// --- Batch deletes ---

/// delete_batch
///
/// Shared body of every `delete-batch` endpoint: gate, validate, cascade, then exactly one
/// audit line for the call whatever the outcome. Validation failures open no transaction
/// and write no audit line.
///
/// The cascade and its audit line run in their own task, so a client that hangs up
/// mid-cascade still leaves an audit line behind.
async fn delete_batch(
    state: &AppState,
    user: &AuthUser,
    kind: ResourceKind,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    user.require(MODERATOR)?;
    let ids = IdBatch::from_request(body(payload)?)?;

    let state = state.clone();
    let user = user.clone();
    let task = tokio::spawn(async move {
        let result = state.cascade.delete_with_dependents(kind, &ids).await;
        state
            .audit
            .record_result(
                &user,
                kind.action(),
                kind.audit_name(),
                &ids.joined(),
                &result,
                &format!("deleted {} {}", ids.len(), kind),
            )
            .await;
        result
    });

    let report = task
        .await
        .map_err(|e| AppError::Internal(format!("cascade task failed: {e}")))??;
    Ok(Json(report.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/posts/delete-batch",
    request_body = BatchDeleteRequest,
    responses(
        (status = 200, description = "Posts and their comments, likes and collections removed", body = BatchDeleteResponse),
        (status = 400, description = "Empty id list"),
        (status = 500, description = "Rolled back")
    )
)]
pub async fn delete_posts(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::Post, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rooms/delete-batch",
    request_body = BatchDeleteRequest,
    responses(
        (status = 200, description = "Rooms and their members removed", body = BatchDeleteResponse),
        (status = 400, description = "Empty id list")
    )
)]
pub async fn delete_rooms(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::Room, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/comments/delete-batch",
    request_body = BatchDeleteRequest,
    responses(
        (status = 200, description = "Comments and their likes removed", body = BatchDeleteResponse),
        (status = 400, description = "Empty id list")
    )
)]
pub async fn delete_comments(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::Comment, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/training-records/delete-batch",
    request_body = BatchDeleteRequest,
    responses((status = 200, description = "Removed", body = BatchDeleteResponse))
)]
pub async fn delete_training_records(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::TrainingRecord, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/post-likes/delete-batch",
    request_body = BatchDeleteRequest,
    responses((status = 200, description = "Removed", body = BatchDeleteResponse))
)]
pub async fn delete_post_likes(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::PostLike, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/post-collections/delete-batch",
    request_body = BatchDeleteRequest,
    responses((status = 200, description = "Removed", body = BatchDeleteResponse))
)]
pub async fn delete_post_collections(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::PostCollection, payload).await
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/follows/delete-batch",
    request_body = BatchDeleteRequest,
    responses((status = 200, description = "Removed", body = BatchDeleteResponse))
)]
pub async fn delete_follows(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> AppResult<Json<BatchDeleteResponse>> {
    delete_batch(&state, &user, ResourceKind::Follow, payload).await
}

// --- Operation log ---

#[utoipa::path(
    get,
    path = "/api/v1/admin/operation-logs",
    params(AuditLogQuery),
    responses((status = 200, description = "Operation log, newest first", body = Page<AuditRecord>))
)]
pub async fn list_operation_logs(
    user: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Page<AuditRecord>>> {
    user.require(MODERATOR)?;
    let (items, total) = state.audit.sink().list(&query).await?;
    Ok(Json(Page::new(items, total, query.window())))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/operation-logs/{id}",
    responses(
        (status = 200, description = "Operation log entry", body = AuditRecord),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_operation_log(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AuditRecord>> {
    user.require(MODERATOR)?;
    state
        .audit
        .sink()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("operation log".to_string()))
}
