//! Account HTTP API
//!
//! JSON routes over [`AccountService`]. Runs beside the WebSocket server on
//! its own listener and stops on the same shutdown broadcast.
//!
//! | Route | Success | Failure |
//! |---|---|---|
//! | `GET /health` | 200 `{status}` | |
//! | `POST /register` | 201 `{message, token, user}` | 400 invalid or taken |
//! | `POST /login` | 200 `{message, token, user}` | 401 bad credentials |
//! | `GET /profile` | 200 `{user}` | 401 bad token, 404 gone |
//! | `GET /api/auth/verify` | 200 `{verified, username, userId}` | 401 bad token |
//!
//! Every failure body is `{"error": "..."}`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::account::{AccountError, AccountService, AuthSession, TokenClaims, UserProfile};

/// Shared application state.
pub struct AppState {
    /// Account store behind every route.
    pub accounts: Arc<AccountService>,
}

/// Username and password body for register and login.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Username; surrounding whitespace is ignored.
    #[serde(default)]
    pub username: String,
    /// Plain-text password.
    #[serde(default)]
    pub password: String,
}

/// Register and login response.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    /// Human readable outcome.
    pub message: &'static str,
    /// Signed session token.
    pub token: String,
    /// The user.
    pub user: UserProfile,
}

impl SessionResponse {
    fn new(message: &'static str, session: AuthSession) -> Self {
        Self {
            message,
            token: session.token,
            user: session.user,
        }
    }
}

/// Profile response.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileResponse {
    /// The user.
    pub user: UserProfile,
}

/// Token check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// Always true; failures are a 401.
    pub verified: bool,
    /// Username at issue time.
    pub username: String,
    /// Numeric user id.
    pub user_id: u64,
}

/// Health check response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status string.
    pub status: String,
}

/// Create the HTTP router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile))
        .route("/api/auth/verify", get(verify))
        .with_state(state)
}

/// Serve the account API on `listener` until `shutdown` fires.
pub async fn serve_http(
    listener: TcpListener,
    accounts: Arc<AccountService>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    info!("Account API listening on {}", listener.local_addr()?);
    let router = create_router(Arc::new(AppState { accounts }));
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let session = state.accounts.register(&body.username, &body.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::new("Registration successful", session)),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(body) = body?;
    let session = state.accounts.login(&body.username, &body.password).await?;
    Ok(Json(SessionResponse::new("Login successful", session)))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProfileResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let user = state.accounts.profile(token).await?;
    Ok(Json(ProfileResponse { user }))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<VerifyResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let TokenClaims { user_id, username, .. } = state.accounts.verify_token(token)?;
    Ok(Json(VerifyResponse {
        verified: true,
        username,
        user_id,
    }))
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing bearer token"))
}

/// Error response: a status and `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InvalidUsername | AccountError::PasswordTooShort { .. } => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            AccountError::UsernameTaken(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Username already exists")
            }
            AccountError::InvalidCredentials => {
                Self::new(StatusCode::UNAUTHORIZED, "Invalid credentials")
            }
            AccountError::Token(_) => Self::new(StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AccountError::UserNotFound(_) => Self::new(StatusCode::NOT_FOUND, "User not found"),
            AccountError::Ledger(_) | AccountError::Hash(_) | AccountError::TaskFailed(_) => {
                error!("Account request failed: {}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountConfig, Ledger};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AccountService>) {
        let config = AccountConfig {
            secret: "http-test-secret".into(),
            password_cost: 4,
            ..Default::default()
        };
        let accounts = Arc::new(AccountService::new(&config, Arc::new(Ledger::new())));
        let router = create_router(Arc::new(AppState {
            accounts: accounts.clone(),
        }));
        (router, accounts)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_with_token(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app();
        let (status, body) = send(&router, get_with_token("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_register_returns_created_session() {
        let (router, accounts) = app();
        let (status, body) = send(
            &router,
            post_json("/register", json!({ "username": " alice ", "password": "secret1" })),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Registration successful");
        assert_eq!(body["user"]["id"], 1);
        assert_eq!(body["user"]["username"], "alice");
        assert!(body["user"]["createdAt"].is_string());

        let token = body["token"].as_str().unwrap();
        assert_eq!(accounts.profile(token).await.unwrap().username, "alice");
        assert_eq!(accounts.ledger().balance(1).await, Ok(0));
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let (router, _) = app();
        let (status, body) = send(
            &router,
            post_json("/register", json!({ "username": "bob", "password": "123" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "password must be at least 6 characters");

        let (status, body) = send(&router, post_json("/register", json!({ "password": "secret1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "username is required");

        let credentials = json!({ "username": "bob", "password": "secret1" });
        let (status, _) = send(&router, post_json("/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = send(&router, post_json("/register", credentials)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Username already exists" }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (router, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_login() {
        let (router, _) = app();
        let credentials = json!({ "username": "carol", "password": "password" });
        send(&router, post_json("/register", credentials.clone())).await;

        let (status, body) = send(&router, post_json("/login", credentials)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login successful");
        assert_eq!(body["user"]["username"], "carol");
        assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn test_login_bad_credentials_unauthorized() {
        let (router, _) = app();
        send(
            &router,
            post_json("/register", json!({ "username": "dave", "password": "password" })),
        )
        .await;

        for credentials in [
            json!({ "username": "dave", "password": "wrong-password" }),
            json!({ "username": "nobody", "password": "password" }),
            json!({ "username": "dave" }),
        ] {
            let (status, body) = send(&router, post_json("/login", credentials)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, json!({ "error": "Invalid credentials" }));
        }
    }

    #[tokio::test]
    async fn test_profile_requires_valid_bearer() {
        let (router, _) = app();
        let (_, registered) = send(
            &router,
            post_json("/register", json!({ "username": "erin", "password": "password" })),
        )
        .await;
        let token = registered["token"].as_str().unwrap();

        let (status, body) = send(&router, get_with_token("/profile", Some(token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], registered["user"]);

        let (status, body) = send(&router, get_with_token("/profile", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Missing bearer token" }));

        let (status, body) = send(&router, get_with_token("/profile", Some("not-a-token"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Invalid or expired token" }));
    }

    #[tokio::test]
    async fn test_profile_rejects_non_bearer_scheme() {
        let (router, accounts) = app();
        let session = accounts.register("frank", "password").await.unwrap();
        let request = Request::builder()
            .uri("/profile")
            .header("authorization", format!("Basic {}", session.token))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_verify_route() {
        let (router, accounts) = app();
        let session = accounts.register("gina", "password").await.unwrap();

        let (status, body) = send(&router, get_with_token("/api/auth/verify", Some(session.token.as_str()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "verified": true, "username": "gina", "userId": 1 }));

        let (status, _) = send(&router, get_with_token("/api/auth/verify", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(AccountError::UserNotFound(3)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(AccountError::TaskFailed("cancelled".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_serve_http_over_socket() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (_, accounts) = app();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let serving = tokio::spawn(serve_http(listener, accounts, shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));

        shutdown_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }
}
