mod common;

use axum::{Json, extract::State};
use common::test_app;
use fluent_admin::{
    AppError, CredentialVerifier, MemoryStore,
    credentials::{self, ensure_bootstrap_admin},
    handlers,
    models::{IdentityChanges, LoginRequest, Role, UserStatus},
    repository::IdentityRepository,
};
use fluent_admin::clock::Clock;
use std::{sync::Arc, time::Instant};

fn login_request(username: &str, password: &str) -> LoginRequest {
    LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn test_bootstrap_admin_logs_in_as_super_admin() {
    let app = test_app();
    assert!(ensure_bootstrap_admin(&app.store, "admin123").await.unwrap());

    let Json(response) = handlers::login(
        State(app.state.clone()),
        Ok(Json(login_request("admin", "admin123"))),
    )
    .await
    .unwrap();

    assert_eq!(response.username, "admin");
    assert_eq!(response.role, Role::SuperAdmin);

    let claims = app.state.tokens.validate(&response.token).unwrap();
    assert_eq!(claims.sub, response.user_id);
    assert_eq!(claims.role, Role::SuperAdmin);
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let store = MemoryStore::new();
    assert!(ensure_bootstrap_admin(&store, "admin123").await.unwrap());
    assert!(!ensure_bootstrap_admin(&store, "other-password").await.unwrap());

    // The first password still works.
    let verifier = CredentialVerifier::new(Arc::new(store));
    assert!(verifier.verify("admin", "admin123").await.is_ok());
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let app = test_app();
    app.store
        .add_identity("ops", "s3cret!", Role::Admin)
        .await
        .unwrap();

    let wrong = app.state.verifier.verify("ops", "guess").await.unwrap_err();
    let unknown = app.state.verifier.verify("nobody", "guess").await.unwrap_err();

    assert!(matches!(wrong, AppError::InvalidCredentials));
    assert!(matches!(unknown, AppError::InvalidCredentials));
    assert_eq!(wrong.to_string(), unknown.to_string());
}

#[tokio::test]
async fn test_non_admin_role_cannot_log_in() {
    let app = test_app();
    app.store
        .add_identity("learner", "learner-pass", Role::User)
        .await
        .unwrap();

    let result = handlers::login(
        State(app.state.clone()),
        Ok(Json(login_request("learner", "learner-pass"))),
    )
    .await;

    assert!(matches!(result, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn test_disabled_admin_cannot_log_in() {
    let app = test_app();
    let identity = app
        .store
        .add_identity("retired", "retired-pass", Role::Admin)
        .await
        .unwrap();
    app.store
        .update_identity(
            identity.id,
            IdentityChanges {
                status: Some(UserStatus::Disabled),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let result = app.state.verifier.verify("retired", "retired-pass").await;
    assert!(matches!(result, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn test_username_lookup_is_exact() {
    let app = test_app();
    app.store
        .add_identity("Ops", "s3cret!", Role::Admin)
        .await
        .unwrap();

    assert!(app.state.verifier.verify("ops", "s3cret!").await.is_err());
    assert!(app.state.verifier.verify("Ops", "s3cret!").await.is_ok());
}

#[tokio::test]
async fn test_stored_hash_is_not_the_password() {
    let store = MemoryStore::new();
    let identity = store
        .add_identity("ops", "s3cret!", Role::Admin)
        .await
        .unwrap();

    assert_ne!(identity.password_hash, "s3cret!");
    assert!(credentials::verify_password("s3cret!", &identity.password_hash).await);
}

#[tokio::test]
async fn test_unknown_user_costs_as_much_as_wrong_password() {
    let app = test_app();
    app.store
        .add_identity("ops", "s3cret!", Role::Admin)
        .await
        .unwrap();
    let verifier = &app.state.verifier;
    let _ = verifier.verify("warm-up", "wrong-pass").await;

    let rounds = 3;
    let started = Instant::now();
    for _ in 0..rounds {
        assert!(verifier.verify("nobody", "wrong-pass").await.is_err());
    }
    let unknown = started.elapsed() / rounds;

    let started = Instant::now();
    for _ in 0..rounds {
        assert!(verifier.verify("ops", "wrong-pass").await.is_err());
    }
    let known = started.elapsed() / rounds;

    assert!(unknown * 10 >= known, "unknown {unknown:?} vs known {known:?}");
    assert!(known * 10 >= unknown, "unknown {unknown:?} vs known {known:?}");
}

#[tokio::test]
async fn test_login_records_last_login_time() {
    let app = test_app();
    let identity = app
        .store
        .add_identity("ops", "s3cret!", Role::Admin)
        .await
        .unwrap();
    assert!(identity.last_login_at.is_none());

    handlers::login(State(app.state.clone()), Ok(Json(login_request("ops", "s3cret!"))))
        .await
        .unwrap();

    let stored = app.store.get_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(stored.last_login_at, Some(app.clock.now()));
}
