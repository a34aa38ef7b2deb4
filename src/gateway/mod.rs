//! Axum-based HTTP gateway: registration and login forms, session cookies
//! and the admin-only user endpoints.
//!
//! - Request body size limit (64KB max)
//! - Request timeout (30s)
//! - Every failure branch answers with a non-2xx status

pub mod pages;

use crate::auth::{AuthError, PasswordHasher, Session, SessionStore};
use crate::config::Config;
use crate::users::{NewUser, StoreError, UserRepository, UserUpdate, ADMIN_ROLE};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::FormRejection, rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Form, Router,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "cadastro_session";

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserRepository>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let users_file = config.users_file_path()?;
        let hasher = PasswordHasher::new(config.auth.hash_rounds);
        Ok(Self {
            users: Arc::new(UserRepository::new(users_file, hasher)),
            sessions: Arc::new(SessionStore::new(config.auth.session_ttl_secs)),
        })
    }
}

/// Whether binding `host` would expose the service beyond this machine.
pub fn is_public_bind(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

/// All routes with their middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_home))
        .route("/health", get(handle_health))
        .route("/cadastro-usuario", post(handle_register))
        .route("/login", get(handle_login_page).post(handle_login))
        .route("/logout", get(handle_logout))
        .route("/usuarios", get(handle_users_page))
        .route("/usuarios/json", get(handle_users_json))
        .route("/usuarios/", put(handle_update_user))
        .route("/usuarios/{id}", delete(handle_delete_user))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Run the HTTP gateway until the process is interrupted.
pub async fn run_gateway(config: &Config) -> Result<()> {
    let host = config.gateway.host.as_str();
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the service would be reachable from other machines.\n\
             Fix: use --host 127.0.0.1 (default) or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let state = AppState::from_config(config)?;
    // Fail fast on an unreadable store instead of on the first request
    let existing = state.users.count().with_context(|| {
        format!("Cannot read user store {}", state.users.path().display())
    })?;
    let sealed = state.users.migrate_plaintext_passwords().with_context(|| {
        format!("Cannot rewrite user store {}", state.users.path().display())
    })?;
    if sealed > 0 {
        tracing::warn!(sealed, "Hashed plaintext passwords found in the user store");
    }

    let addr: SocketAddr = format!("{host}:{}", config.gateway.port)
        .parse()
        .with_context(|| format!("Invalid bind address {host}:{}", config.gateway.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tracing::info!(
        users = existing,
        store = %state.users.path().display(),
        "Listening on http://{local}"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// SESSION HELPERS
// ══════════════════════════════════════════════════════════════════════════════

/// Session token from the session cookie, or from `Authorization: Bearer`.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim());

    from_cookie
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .filter(|token| !token.is_empty())
}

fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

fn expired_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Session, AuthError> {
    state
        .sessions
        .require_role(session_token(headers), ADMIN_ROLE)
}

fn auth_status(err: AuthError) -> StatusCode {
    match err {
        AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
    }
}

fn auth_message(err: AuthError) -> &'static str {
    match err {
        AuthError::Unauthenticated => "Usuário não autenticado",
        AuthError::Forbidden => "Acesso negado: apenas administradores",
    }
}

fn auth_text_response(err: AuthError) -> Response {
    (auth_status(err), auth_message(err)).into_response()
}

fn auth_json_response(err: AuthError) -> Response {
    (
        auth_status(err),
        Json(serde_json::json!({"erro": auth_message(err)})),
    )
        .into_response()
}

/// Run a repository call on the blocking pool. Hashing and whole-file I/O
/// would otherwise stall the async workers.
async fn with_users<T, F>(state: &AppState, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&UserRepository) -> Result<T, StoreError> + Send + 'static,
{
    let users = Arc::clone(&state.users);
    tokio::task::spawn_blocking(move || op(&users))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

fn store_failure(context: &str, err: &StoreError) -> StatusCode {
    tracing::error!("{context}: {err}");
    StatusCode::INTERNAL_SERVER_ERROR
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /: registration form
async fn handle_home() -> Html<String> {
    Html(pages::render_registration_form())
}

/// GET /health: liveness plus a store read check
async fn handle_health(State(state): State<AppState>) -> Response {
    match with_users(&state, |users| users.count()).await {
        Ok(count) => Json(serde_json::json!({"status": "ok", "usuarios": count})).into_response(),
        Err(e) => (
            store_failure("Health check failed", &e),
            Json(serde_json::json!({"status": "error"})),
        )
            .into_response(),
    }
}

/// POST /cadastro-usuario: register from form fields
async fn handle_register(
    State(state): State<AppState>,
    form: Result<Form<NewUser>, FormRejection>,
) -> Response {
    let new_user = match form {
        Ok(Form(new_user)) => new_user,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Não foi possível cadastrar o usuário: {e}"),
            )
                .into_response();
        }
    };

    if new_user.email.trim().is_empty() || new_user.senha.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Não foi possível cadastrar o usuário: email e senha são obrigatórios",
        )
            .into_response();
    }

    match with_users(&state, move |users| users.register(new_user)).await {
        Ok(user) => (
            StatusCode::CREATED,
            format!("Usuário '{}' cadastrado com sucesso!", user.nome),
        )
            .into_response(),
        Err(StoreError::Conflict(email)) => (
            StatusCode::CONFLICT,
            format!("Não foi possível cadastrar o usuário: o email '{email}' já está cadastrado"),
        )
            .into_response(),
        Err(e) => (
            store_failure("Registration failed", &e),
            "Não foi possível cadastrar o usuário!",
        )
            .into_response(),
    }
}

/// Login form fields.
#[derive(Debug, Default, Deserialize)]
struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    senha: String,
}

/// GET /login: login form
async fn handle_login_page() -> Html<String> {
    Html(pages::render_login_form())
}

/// POST /login: verify credentials and open a session
async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return (StatusCode::UNAUTHORIZED, "Email ou senha inválidos").into_response();
    };

    let LoginForm { email, senha } = form;
    let outcome = with_users(&state, move |users| users.authenticate(&email, &senha)).await;
    let user = match outcome {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::info!("Failed login attempt");
            return (StatusCode::UNAUTHORIZED, "Email ou senha inválidos").into_response();
        }
        Err(e) => {
            return (
                store_failure("Login failed", &e),
                "Não foi possível realizar o login",
            )
                .into_response();
        }
    };

    // Logging in again replaces whatever session the client already held
    if let Some(previous) = session_token(&headers) {
        state.sessions.revoke(previous);
    }

    state.sessions.cleanup_expired();
    let token = state.sessions.create(&user.id, &user.perfil);
    tracing::info!(user_id = %user.id, perfil = %user.perfil, "User logged in");

    let mut response = (
        StatusCode::OK,
        format!("Bem-vindo(a), {}!", user.nome),
    )
        .into_response();
    match HeaderValue::from_str(&session_cookie(&token)) {
        Ok(cookie) => {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
            response
        }
        Err(e) => {
            tracing::error!("Failed to build session cookie: {e}");
            state.sessions.revoke(&token);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Não foi possível realizar o login",
            )
                .into_response()
        }
    }
}

/// GET /logout: end the current session
async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let logged_out = session_token(&headers).is_some_and(|token| state.sessions.revoke(token));

    if !logged_out {
        return (StatusCode::UNAUTHORIZED, "Nenhum usuário logado").into_response();
    }

    (
        StatusCode::OK,
        [(header::SET_COOKIE, expired_session_cookie())],
        "Logout realizado com sucesso",
    )
        .into_response()
}

/// GET /usuarios/json: every stored user, digests included (admin only)
async fn handle_users_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return auth_text_response(e);
    }

    match with_users(&state, |users| users.load()).await {
        Ok(users) => Json(users).into_response(),
        Err(e) => (
            store_failure("Listing users failed", &e),
            "Não foi possível carregar os usuários",
        )
            .into_response(),
    }
}

/// GET /usuarios: HTML listing (admin only)
async fn handle_users_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return auth_text_response(e);
    }

    match with_users(&state, |users| users.load()).await {
        Ok(users) => Html(pages::render_users_page(&users)).into_response(),
        Err(e) => (
            store_failure("Listing users failed", &e),
            "Não foi possível carregar os usuários",
        )
            .into_response(),
    }
}

/// DELETE /usuarios/{id}: remove a user and end their sessions (admin only)
async fn handle_delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return auth_json_response(e);
    }

    let target = id.clone();
    match with_users(&state, move |users| users.delete(&target)).await {
        Ok(true) => {
            state.sessions.revoke_user(&id);
            (
                StatusCode::OK,
                Json(serde_json::json!({"mensagem": "Usuário deletado com sucesso"})),
            )
                .into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"erro": "Usuário não encontrado"})),
        )
            .into_response(),
        Err(e) => (
            store_failure("Deleting user failed", &e),
            Json(serde_json::json!({"erro": "Não foi possível deletar o usuário"})),
        )
            .into_response(),
    }
}

/// PUT /usuarios/: merge allow-listed fields onto a user (admin only)
async fn handle_update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<UserUpdate>, JsonRejection>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return auth_json_response(e);
    }

    let (id, patch) = match body {
        Ok(Json(update)) => update.into_parts(),
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"erro": format!("Requisição inválida: {e}")})),
            )
                .into_response();
        }
    };
    let revoke_sessions = patch.touches_credentials();

    let target = id.clone();
    match with_users(&state, move |users| users.update(&target, patch)).await {
        Ok(true) => {
            if revoke_sessions {
                state.sessions.revoke_user(&id);
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({"mensagem": "Usuário atualizado com sucesso"})),
            )
                .into_response()
        }
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"erro": "Usuário não encontrado"})),
        )
            .into_response(),
        Err(StoreError::Conflict(email)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"erro": format!("O email '{email}' já está cadastrado")})),
        )
            .into_response(),
        Err(e) => (
            store_failure("Updating user failed", &e),
            Json(serde_json::json!({"erro": "Não foi possível salvar as modificações"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::User;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let state = AppState {
            users: Arc::new(UserRepository::new(
                tmp.path().join("usuarios.json"),
                PasswordHasher::new(1_000),
            )),
            sessions: Arc::new(SessionStore::new(3600)),
        };
        (tmp, state)
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }

    fn form_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn with_cookie(method: Method, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("theme=dark; {SESSION_COOKIE}={token}"));
        }
        builder.body(body).unwrap()
    }

    async fn register(state: &AppState, nome: &str, email: &str, senha: &str, perfil: &str) {
        let body = format!(
            "nome={nome}&email={}&cpf=123&senha={senha}&idade=30&perfil={perfil}",
            email.replace('@', "%40")
        );
        let (status, _, _) = send(state, form_post("/cadastro-usuario", &body)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    /// Log in and return the session token from `Set-Cookie`.
    async fn login(state: &AppState, email: &str, senha: &str) -> String {
        let body = format!("email={}&senha={senha}", email.replace('@', "%40"));
        let (status, headers, _) = send(state, form_post("/login", &body)).await;
        assert_eq!(status, StatusCode::OK);
        let cookie = headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_owned();
        cookie
            .split(';')
            .next()
            .and_then(|pair| pair.strip_prefix(&format!("{SESSION_COOKIE}=")))
            .unwrap()
            .to_owned()
    }

    async fn admin_token(state: &AppState) -> String {
        register(state, "Ana", "ana@x.com", "pw123", "admin").await;
        login(state, "ana@x.com", "pw123").await
    }

    #[test]
    fn security_body_limit_is_64kb() {
        assert_eq!(MAX_BODY_SIZE, 65_536);
    }

    #[test]
    fn app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn public_bind_detection() {
        assert!(!is_public_bind("127.0.0.1"));
        assert!(!is_public_bind("localhost"));
        assert!(!is_public_bind("::1"));
        assert!(is_public_bind("0.0.0.0"));
        assert!(is_public_bind("192.168.1.10"));
        assert!(is_public_bind("example.com"));
    }

    #[test]
    fn session_token_prefers_cookie_then_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(session_token(&headers), Some("abc"));

        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("a=1; {SESSION_COOKIE}=xyz; b=2")).unwrap(),
        );
        assert_eq!(session_token(&headers), Some("xyz"));
    }

    #[test]
    fn empty_session_cookie_is_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}=")).unwrap(),
        );
        assert_eq!(session_token(&headers), None);
    }

    #[tokio::test]
    async fn home_renders_registration_form() {
        let (_tmp, state) = test_state();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"action="/cadastro-usuario""#));
    }

    #[tokio::test]
    async fn register_persists_user_with_hashed_password() {
        let (_tmp, state) = test_state();
        let body = "nome=Ana&email=ana%40x.com&cpf=123&senha=pw123&idade=30&perfil=admin";
        let (status, _, text) = send(&state, form_post("/cadastro-usuario", body)).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(text, "Usuário 'Ana' cadastrado com sucesso!");

        let users = state.users.load().unwrap();
        assert_eq!(users.len(), 1);
        assert_ne!(users[0].senha, "pw123");
        assert_eq!(users[0].perfil, "admin");
    }

    #[tokio::test]
    async fn register_without_password_is_bad_request() {
        let (_tmp, state) = test_state();
        let (status, _, _) =
            send(&state, form_post("/cadastro-usuario", "nome=Ana&email=ana%40x.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.users.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn register_duplicate_email_conflicts() {
        let (_tmp, state) = test_state();
        register(&state, "Ana", "ana@x.com", "pw123", "admin").await;

        let body = "nome=Outra&email=ana%40x.com&senha=x";
        let (status, _, _) = send(&state, form_post("/cadastro-usuario", body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(state.users.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn register_on_corrupt_store_is_server_error() {
        let (_tmp, state) = test_state();
        std::fs::write(state.users.path(), "oops").unwrap();

        let body = "nome=Ana&email=ana%40x.com&senha=pw123";
        let (status, _, text) = send(&state, form_post("/cadastro-usuario", body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(text, "Não foi possível cadastrar o usuário!");
    }

    #[tokio::test]
    async fn login_sets_http_only_session_cookie() {
        let (_tmp, state) = test_state();
        register(&state, "Ana", "ana@x.com", "pw123", "admin").await;

        let (status, headers, text) =
            send(&state, form_post("/login", "email=ana%40x.com&senha=pw123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "Bem-vindo(a), Ana!");

        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE}=")));
        assert!(cookie.contains("HttpOnly"));
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn wrong_credentials_never_open_a_session() {
        let (_tmp, state) = test_state();
        register(&state, "Ana", "ana@x.com", "pw123", "admin").await;

        for body in [
            "email=ana%40x.com&senha=wrong",
            "email=ghost%40x.com&senha=pw123",
            "email=&senha=",
            "",
        ] {
            let (status, headers, _) = send(&state, form_post("/login", body)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "body: {body}");
            assert!(headers.get(header::SET_COOKIE).is_none());
        }
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn login_page_renders_form() {
        let (_tmp, state) = test_state();
        let request = Request::builder().uri("/login").body(Body::empty()).unwrap();
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"action="/login""#));
    }

    #[tokio::test]
    async fn relogin_replaces_previous_session() {
        let (_tmp, state) = test_state();
        let first = admin_token(&state).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, format!("{SESSION_COOKIE}={first}"))
            .body(Body::from("email=ana%40x.com&senha=pw123"))
            .unwrap();
        let (status, _, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(state.sessions.validate(&first).is_none());
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let (_tmp, state) = test_state();
        let token = admin_token(&state).await;

        let request = with_cookie(Method::GET, "/logout", Some(&token), Body::empty());
        let (status, headers, text) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "Logout realizado com sucesso");
        assert!(headers
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Max-Age=0"));

        let request = with_cookie(Method::GET, "/usuarios/json", Some(&token), Body::empty());
        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_without_session_is_unauthorized() {
        let (_tmp, state) = test_state();
        let request = with_cookie(Method::GET, "/logout", None, Body::empty());
        let (status, _, text) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(text, "Nenhum usuário logado");
    }

    #[tokio::test]
    async fn admin_sees_users_json_with_hashes_not_plaintext() {
        let (_tmp, state) = test_state();
        let token = admin_token(&state).await;

        let session = state.sessions.validate(&token).unwrap();
        assert_eq!(session.perfil, "admin");

        let request = with_cookie(Method::GET, "/usuarios/json", Some(&token), Body::empty());
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);

        let users: Vec<User> = serde_json::from_str(&body).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].nome, "Ana");
        assert!(users[0].senha.starts_with("$pbkdf2-sha256$"));
        assert!(!body.contains("pw123"));
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let (_tmp, state) = test_state();
        let token = admin_token(&state).await;

        let request = Request::builder()
            .uri("/usuarios/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_sees_html_listing() {
        let (_tmp, state) = test_state();
        let token = admin_token(&state).await;

        let request = with_cookie(Method::GET, "/usuarios", Some(&token), Body::empty());
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ana@x.com"));
        assert!(!body.contains("pbkdf2"));
    }

    #[tokio::test]
    async fn listing_requires_session() {
        let (_tmp, state) = test_state();
        for uri in ["/usuarios", "/usuarios/json"] {
            let request = with_cookie(Method::GET, uri, None, Body::empty());
            let (status, _, text) = send(&state, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(text, "Usuário não autenticado");
        }
    }

    #[tokio::test]
    async fn listing_requires_admin_role() {
        let (_tmp, state) = test_state();
        register(&state, "Bruno", "bruno@x.com", "segredo", "usuario").await;
        let token = login(&state, "bruno@x.com", "segredo").await;

        for uri in ["/usuarios", "/usuarios/json"] {
            let request = with_cookie(Method::GET, uri, Some(&token), Body::empty());
            let (status, _, _) = send(&state, request).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn delete_and_update_rejected_without_admin_whether_or_not_target_exists() {
        let (_tmp, state) = test_state();
        register(&state, "Ana", "ana@x.com", "pw123", "admin").await;
        register(&state, "Bruno", "bruno@x.com", "segredo", "usuario").await;
        let existing = state.users.find_by_email("ana@x.com").unwrap().unwrap().id;
        let user_token = login(&state, "bruno@x.com", "segredo").await;
        let before = std::fs::read(state.users.path()).unwrap();

        for (token, expected) in [
            (None, StatusCode::UNAUTHORIZED),
            (Some(user_token.as_str()), StatusCode::FORBIDDEN),
        ] {
            for id in [existing.as_str(), "no-such-id"] {
                let uri = format!("/usuarios/{id}");
                let request = with_cookie(Method::DELETE, &uri, token, Body::empty());
                let (status, _, body) = send(&state, request).await;
                assert_eq!(status, expected);
                assert!(body.contains("erro"));

                let update = serde_json::json!({"id": id, "nome": "Hacked"}).to_string();
                let request = with_cookie(Method::PUT, "/usuarios/", token, Body::from(update));
                let (status, _, _) = send(&state, request).await;
                assert_eq!(status, expected);
            }
        }

        assert_eq!(std::fs::read(state.users.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn delete_existing_user_and_revoke_their_sessions() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;
        register(&state, "Bruno", "bruno@x.com", "segredo", "usuario").await;
        let bruno_token = login(&state, "bruno@x.com", "segredo").await;
        let bruno = state.users.find_by_email("bruno@x.com").unwrap().unwrap();

        let uri = format!("/usuarios/{}", bruno.id);
        let request = with_cookie(Method::DELETE, &uri, Some(&admin), Body::empty());
        let (status, _, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Usuário deletado com sucesso"));
        assert_eq!(state.users.count().unwrap(), 1);
        assert!(state.sessions.validate(&bruno_token).is_none());
    }

    #[tokio::test]
    async fn delete_unknown_user_is_not_found_and_changes_nothing() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;
        let before = std::fs::read(state.users.path()).unwrap();

        let request = with_cookie(Method::DELETE, "/usuarios/no-such-id", Some(&admin), Body::empty());
        let (status, _, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({"erro": "Usuário não encontrado"})
        );
        assert_eq!(std::fs::read(state.users.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn update_merges_only_given_fields() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;
        register(&state, "Bruno", "bruno@x.com", "segredo", "usuario").await;
        let before = state.users.find_by_email("bruno@x.com").unwrap().unwrap();

        let update = serde_json::json!({"id": before.id, "idade": "41"}).to_string();
        let request = with_cookie(Method::PUT, "/usuarios/", Some(&admin), Body::from(update));
        let (status, _, body) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Usuário atualizado com sucesso"));

        let after = state.users.find_by_id(&before.id).unwrap().unwrap();
        assert_eq!(after.idade, "41");
        assert_eq!(
            User {
                idade: before.idade.clone(),
                ..after
            },
            before
        );
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;

        let update = serde_json::json!({"id": "no-such-id", "nome": "X"}).to_string();
        let request = with_cookie(Method::PUT, "/usuarios/", Some(&admin), Body::from(update));
        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_rejects_fields_outside_allow_list() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;
        let ana = state.users.find_by_email("ana@x.com").unwrap().unwrap();

        let update = serde_json::json!({"id": ana.id, "extra": "x"}).to_string();
        let request = with_cookie(Method::PUT, "/usuarios/", Some(&admin), Body::from(update));
        let (status, _, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.users.find_by_id(&ana.id).unwrap().unwrap(), ana);
    }

    #[tokio::test]
    async fn role_change_revokes_existing_sessions() {
        let (_tmp, state) = test_state();
        let admin = admin_token(&state).await;
        register(&state, "Bruno", "bruno@x.com", "segredo", "usuario").await;
        let bruno_token = login(&state, "bruno@x.com", "segredo").await;
        let bruno = state.users.find_by_email("bruno@x.com").unwrap().unwrap();

        let update = serde_json::json!({"id": bruno.id, "perfil": "admin"}).to_string();
        let request = with_cookie(Method::PUT, "/usuarios/", Some(&admin), Body::from(update));
        let (status, _, _) = send(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert!(state.sessions.validate(&bruno_token).is_none());
        assert!(state.sessions.validate(&admin).is_some());

        let promoted = login(&state, "bruno@x.com", "segredo").await;
        assert_eq!(state.sessions.validate(&promoted).unwrap().perfil, "admin");
    }

    #[tokio::test]
    async fn repository_calls_run_off_the_async_worker() {
        let (_tmp, state) = test_state();
        let caller = std::thread::current().id();
        let worker = with_users(&state, |_| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(worker, caller);
    }

    #[tokio::test]
    async fn plaintext_password_from_older_store_logs_in_and_is_hashed() {
        let (_tmp, state) = test_state();
        std::fs::write(
            state.users.path(),
            r#"[{"id": "1", "nome": "Ana", "email": "ana@x.com", "cpf": "", "senha": "pw123", "idade": "30"}]"#,
        )
        .unwrap();

        let token = login(&state, "ana@x.com", "pw123").await;
        assert!(state.sessions.validate(&token).is_some());

        let raw = std::fs::read_to_string(state.users.path()).unwrap();
        assert!(!raw.contains("\"pw123\""));
        assert!(raw.contains("$pbkdf2-sha256$"));
    }

    #[tokio::test]
    async fn health_reports_user_count() {
        let (_tmp, state) = test_state();
        register(&state, "Ana", "ana@x.com", "pw123", "admin").await;

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({"status": "ok", "usuarios": 1})
        );
    }

    #[tokio::test]
    async fn handler_can_be_called_directly() {
        let (_tmp, state) = test_state();
        let response = handle_users_json(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
