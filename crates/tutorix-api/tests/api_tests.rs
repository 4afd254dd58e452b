//! API Integration Tests
//!
//! Drive the full router over in-memory stores. Mail is captured by the
//! test mailbox returned from `create_test_app`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tutorix_api::auth::{MailMessage, MemoryNotifier};
use tutorix_api::{create_router_for_testing, create_test_app};
use tutorix_core::{AppConfig, ConfirmationMode};

/// Helper to create a test request
fn create_json_request(
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    if let Some(token) = bearer {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn app_with_mode(mode: ConfirmationMode) -> (Router, Arc<MemoryNotifier>) {
    let mut config = AppConfig::default();
    config.registration.confirmation_mode = mode;
    create_test_app(config).unwrap()
}

fn registration(email: &str) -> Value {
    json!({
        "firstName": "Ada",
        "lastName": "Lovelace",
        "email": email,
        "password": "Analytical1!"
    })
}

fn credentials(email: &str, password: &str) -> Value {
    json!({ "email": email, "password": password })
}

async fn mail_number(mailbox: &MemoryNotifier, n: usize) -> MailMessage {
    let mut sent = tokio::time::timeout(Duration::from_secs(5), mailbox.wait_for(n))
        .await
        .expect("mail was not delivered");
    sent.remove(n - 1)
}

/// Register, activate and log in; returns (access, refresh)
async fn logged_in(app: &Router, mailbox: &MemoryNotifier, email: &str) -> (String, String) {
    let before = mailbox.sent().await.len();
    let (status, _) = send(
        app,
        create_json_request("POST", "/api/v1/auth/register", Some(registration(email)), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let code = mail_number(mailbox, before + 1).await.code.unwrap();
    let (status, _) = send(
        app,
        create_json_request(
            "GET",
            &format!("/api/v1/auth/activate-account?token={code}"),
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials(email, "Analytical1!")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    (
        body["accessToken"].as_str().unwrap().to_string(),
        body["refreshToken"].as_str().unwrap().to_string(),
    )
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing().unwrap();

    let (status, json) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
    assert_eq!(json["confirmation_mode"], "code");
    assert!(json["version"].is_string());
}

// =============================================================================
// Registration Tests
// =============================================================================

#[tokio::test]
async fn test_register_with_code_confirmation() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);

    let (status, json) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(registration("ada@example.com")),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["user"]["email"], "ada@example.com");
    assert_eq!(json["user"]["enabled"], false);
    assert_eq!(json["user"]["roles"], json!(["USER"]));
    assert!(json.get("accessToken").is_none());
    assert!(json["user"].get("passwordHash").is_none());

    let mail = mail_number(&mailbox, 1).await;
    assert_eq!(mail.to, "ada@example.com");
    assert_eq!(mail.code.unwrap().len(), 6);
}

#[tokio::test]
async fn test_register_duplicate_email() {
    let app = create_router_for_testing().unwrap();
    let request = || {
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(registration("ada@example.com")),
            None,
        )
    };

    let (first, _) = send(&app, request()).await;
    let (second, json) = send(&app, request()).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
    assert_eq!(json["message"], "Email [ada@example.com] is already taken");
}

#[tokio::test]
async fn test_register_lists_every_violation() {
    let app = create_router_for_testing().unwrap();

    let (status, json) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({
                "firstName": "",
                "lastName": "",
                "email": "not-an-email",
                "password": "secret"
            })),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = json["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["email", "first_name", "last_name"]);

    // Nothing was persisted: the same email can still register
    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(registration("not-an-email@example.com")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_register_cannot_pick_admin_role() {
    let app = create_router_for_testing().unwrap();
    let mut body = registration("ada@example.com");
    body["role"] = json!("ADMIN");

    let (status, json) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/register", Some(body), None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["violations"][0]["field"], "role");
}

// =============================================================================
// Confirmation Tests
// =============================================================================

#[tokio::test]
async fn test_link_confirmation_flow() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Link);

    let (status, json) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(registration("ada@example.com")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let access_token = json["accessToken"].as_str().unwrap().to_string();
    assert!(json["refreshToken"].is_string());

    let mail = mail_number(&mailbox, 1).await;
    assert!(mail.link.ends_with(&access_token));

    // Disabled until confirmed
    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("ada@example.com", "Analytical1!")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let confirm_uri = format!("/api/v1/auth/confirm?token={access_token}");
    let (status, json) = send(&app, create_json_request("GET", &confirm_uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "confirmed");

    let (status, json) = send(&app, create_json_request("GET", &confirm_uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "already_confirmed");

    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("ada@example.com", "Analytical1!")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_confirm_unknown_token() {
    let app = create_router_for_testing().unwrap();

    let (status, json) = send(
        &app,
        create_json_request("GET", "/api/v1/auth/confirm?token=unknown", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["message"], "Token not found");

    let (status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/auth/activate-account?token=000000", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/auth/activate-account", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Authentication Tests
// =============================================================================

#[tokio::test]
async fn test_authenticate_bad_credentials() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    logged_in(&app, &mailbox, "ada@example.com").await;

    let (wrong_password, json) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("ada@example.com", "wrong")),
            None,
        ),
    )
    .await;
    let (unknown_user, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("nobody@example.com", "Analytical1!")),
            None,
        ),
    )
    .await;

    assert_eq!(wrong_password, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Bad credentials");
}

#[tokio::test]
async fn test_login_invalidates_previous_session() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    let (first_access, _) = logged_in(&app, &mailbox, "ada@example.com").await;

    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("ada@example.com", "Analytical1!")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&first_access)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Token has been revoked");
}

// =============================================================================
// Protected Route Tests
// =============================================================================

#[tokio::test]
async fn test_me_requires_token() {
    let app = create_router_for_testing().unwrap();

    let (status, _) = send(&app, create_json_request("GET", "/api/v1/users/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some("not.a.jwt")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_returns_profile() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    let (access, refresh) = logged_in(&app, &mailbox, "ada@example.com").await;

    let (status, json) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&access)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["email"], "ada@example.com");
    assert_eq!(json["authorities"], json!(["ROLE_USER"]));

    // Refresh tokens do not grant access
    let (status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&refresh)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_change_password() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    let (access, _) = logged_in(&app, &mailbox, "ada@example.com").await;

    let (status, json) = send(
        &app,
        create_json_request(
            "PATCH",
            "/api/v1/users/password",
            Some(json!({
                "currentPassword": "Analytical1!",
                "newPassword": "Difference2!",
                "confirmationPassword": "Different2!"
            })),
            Some(&access),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["violations"][0]["field"], "confirmation_password");

    let (status, _) = send(
        &app,
        create_json_request(
            "PATCH",
            "/api/v1/users/password",
            Some(json!({
                "currentPassword": "Analytical1!",
                "newPassword": "Difference2!",
                "confirmationPassword": "Difference2!"
            })),
            Some(&access),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        create_json_request(
            "POST",
            "/api/v1/auth/authenticate",
            Some(credentials("ada@example.com", "Difference2!")),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Refresh and Logout Tests
// =============================================================================

#[tokio::test]
async fn test_refresh_without_header_is_silent() {
    let app = create_router_for_testing().unwrap();

    let (status, json) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/refresh-token", None, None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, Value::Null);
}

#[tokio::test]
async fn test_refresh_issues_new_access_token() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    let (access, refresh) = logged_in(&app, &mailbox, "ada@example.com").await;

    let (status, json) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/refresh-token", None, Some(&refresh)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["refreshToken"], refresh.as_str());
    let new_access = json["accessToken"].as_str().unwrap().to_string();
    assert_ne!(new_access, access);

    let (old_status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&access)),
    )
    .await;
    let (new_status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&new_access)),
    )
    .await;
    assert_eq!(old_status, StatusCode::UNAUTHORIZED);
    assert_eq!(new_status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_unknown_token_is_noop() {
    let app = create_router_for_testing().unwrap();

    let (status, json) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/logout", None, Some("unknown.token.value")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "Logged out successfully");

    let (status, _) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/logout", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let (app, mailbox) = app_with_mode(ConfirmationMode::Code);
    let (access, refresh) = logged_in(&app, &mailbox, "ada@example.com").await;

    let (status, _) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/logout", None, Some(&access)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        create_json_request("GET", "/api/v1/users/me", None, Some(&access)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A logged out refresh token can no longer be exchanged
    send(
        &app,
        create_json_request("POST", "/api/v1/auth/logout", None, Some(&refresh)),
    )
    .await;
    let (status, json) = send(
        &app,
        create_json_request("POST", "/api/v1/auth/refresh-token", None, Some(&refresh)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, Value::Null);
}
