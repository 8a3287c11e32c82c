use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod audit;
pub mod auth;
pub mod cascade;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handlers;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod models;
pub mod repository;

pub mod routes;
use routes::{admin, public};

// --- Public Re-exports ---

pub use audit::AuditRecorder;
pub use auth::{AuthUser, TokenService};
pub use cascade::{CascadeState, Coordinator, IdBatch, ResourceKind};
#[cfg(any(test, feature = "test-support"))]
pub use clock::FixedClock;
pub use clock::{ClockState, SystemClock};
pub use config::AppConfig;
pub use credentials::CredentialVerifier;
pub use error::{AppError, AppResult, ErrorKind};
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;
pub use repository::{AuditState, ContentState, IdentityState, PostgresRepository};

/// ApiDoc
///
/// OpenAPI document for the admin API, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login,
        handlers::list_users, handlers::get_user, handlers::create_user,
        handlers::update_user, handlers::delete_user,
        handlers::list_posts, handlers::get_post, handlers::delete_posts,
        handlers::list_rooms, handlers::get_room, handlers::toggle_room, handlers::delete_rooms,
        handlers::list_comments, handlers::update_comment, handlers::delete_comments,
        handlers::delete_training_records, handlers::delete_post_likes,
        handlers::delete_post_collections, handlers::delete_follows,
        handlers::clean_tongue_twisters,
        handlers::list_operation_logs, handlers::get_operation_log,
    ),
    components(
        schemas(
            models::Role, models::UserStatus, models::Identity, models::AuditOutcome,
            models::AuditRecord, models::Post, models::Room, models::Comment,
            models::LoginRequest, models::LoginResponse, models::BatchDeleteRequest,
            models::BatchDeleteResponse, models::StepCount, models::CreateUserRequest,
            models::UpdateUserRequest, models::UpdateCommentRequest, models::CleanReport,
        )
    ),
    tags(
        (name = "fluent-admin", description = "Fluent Life administration API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Everything a handler can reach. Built once at startup and cloned per request;
/// there is no global state.
#[derive(Clone)]
pub struct AppState {
    pub identities: IdentityState,
    pub content: ContentState,
    pub audit: AuditRecorder,
    pub cascade: Coordinator,
    pub verifier: CredentialVerifier,
    pub tokens: TokenService,
    pub config: AppConfig,
}

impl AppState {
    /// new
    ///
    /// Wires the components from their store seams. The cascade deadline comes from
    /// `config.request_timeout()`.
    pub fn new(
        config: AppConfig,
        identities: IdentityState,
        content: ContentState,
        audit: AuditState,
        cascade: CascadeState,
        clock: ClockState,
    ) -> Self {
        let tokens = TokenService::new(&config.jwt_secret, config.token_ttl(), clock);
        Self {
            verifier: CredentialVerifier::new(identities.clone()),
            audit: AuditRecorder::new(audit),
            cascade: Coordinator::new(cascade, Some(config.request_timeout())),
            identities,
            content,
            tokens,
            config,
        }
    }

    /// Every seam backed by the same Postgres pool.
    pub fn with_postgres(config: AppConfig, repo: PostgresRepository, clock: ClockState) -> Self {
        let repo = Arc::new(repo);
        Self::new(config, repo.clone(), repo.clone(), repo.clone(), repo, clock)
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for TokenService {
    fn from_ref(app_state: &AppState) -> TokenService {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for IdentityState {
    fn from_ref(app_state: &AppState) -> IdentityState {
        app_state.identities.clone()
    }
}

/// admin_gate
///
/// Runs the `AuthUser` extractor (401 on a missing or invalid token), then the role gate
/// with the lowest administrative role (403). The resolved user stays in the request
/// extensions for the handler.
async fn admin_gate(user: AuthUser, request: Request, next: Next) -> Result<Response, AppError> {
    user.require(models::Role::LOWEST_ADMINISTRATIVE)?;
    Ok(next.run(request).await)
}

/// create_router
///
/// Assembles `/health`, Swagger UI and the `/api/v1` tree, then applies the
/// observability and CORS layers.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let api = Router::new().merge(public::public_routes()).nest(
        "/admin",
        admin::admin_routes().route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_gate,
        )),
    );

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(|| async { "ok" }))
        .nest("/api/v1", api)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// One span per request, correlated by `x-request-id`. Headers other than the request id
/// are never recorded, so bearer tokens stay out of the logs.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
