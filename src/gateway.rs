//! Gateway: the single externally exposed HTTP process.
//!
//! Terminates all client traffic under `/api/v1`, authenticates callers
//! (access token, cookie, or API credential), enforces per-user rate limits
//! on writes, proxies document/job/search traffic to the backing services,
//! orchestrates LLM analysis against external providers, aggregates
//! cluster health, and tracks in-memory request statistics.
//!
//! The gateway owns no persistent state beyond identity data in the
//! relational store; rate-limit counters and the token blacklist live in
//! the ephemeral [`KvStore`].

use axum::extract::{Multipart, Path, Query, RawQuery, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::auth::{self, AuthFailure, Principal, TokenPair, TokenSigner, TokenType};
use crate::config::Config;
use crate::httpapi::{
    bad_request, conflict, forbidden, internal_error, not_found, rate_limited,
    service_unavailable, unauthorized, upstream_failure, upstream_timeout, ApiError,
};
use crate::kv::{KvStore, MemoryKvStore};
use crate::llm::{self, AnalysisType, ChatMessage};
use crate::models::{Document, Role, User};
use crate::ratelimit::{Decision, RateLimiter};
use crate::users::{self, AdminUpdate, NewUser, ProfileUpdate};
use crate::vector::SearchResultChunk;
use crate::{db, migrate};

const ACCESS_COOKIE: &str = "access_token";
const REFRESH_COOKIE: &str = "refresh_token";

/// Which backing service a proxied call went to, for the stats counters.
#[derive(Clone, Copy)]
enum Backing {
    Documents,
    Vector,
    Llm,
}

/// Process-wide request counters. Reset on restart by design.
struct RequestStats {
    started: Instant,
    total: AtomicU64,
    documents: AtomicU64,
    vector: AtomicU64,
    llm: AtomicU64,
}

impl RequestStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            documents: AtomicU64::new(0),
            vector: AtomicU64::new(0),
            llm: AtomicU64::new(0),
        }
    }

    fn count_backing(&self, backing: Backing) {
        match backing {
            Backing::Documents => self.documents.fetch_add(1, Ordering::Relaxed),
            Backing::Vector => self.vector.fetch_add(1, Ordering::Relaxed),
            Backing::Llm => self.llm.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[derive(Clone)]
struct GatewayState {
    config: Arc<Config>,
    pool: SqlitePool,
    kv: Arc<dyn KvStore>,
    signer: TokenSigner,
    limiter: RateLimiter,
    http: reqwest::Client,
    stats: Arc<RequestStats>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    users::bootstrap_admin(&pool, &config.gateway).await?;

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let signer = TokenSigner::from_config(&config.auth)?;
    let limiter = RateLimiter::new(kv.clone(), config.gateway.rate_limit_requests);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.services.request_timeout))
        .pool_max_idle_per_host(16)
        .build()?;

    let state = GatewayState {
        config: Arc::new(config.clone()),
        pool,
        kv,
        signer,
        limiter,
        http,
        stats: Arc::new(RequestStats::new()),
    };

    let api = Router::new()
        // Auth
        .route("/auth/register", post(handle_register))
        .route("/auth/login", post(handle_login))
        .route("/auth/refresh", post(handle_refresh))
        .route("/auth/logout", post(handle_logout))
        .route("/auth/me", get(handle_me).put(handle_update_me))
        .route("/auth/change-password", post(handle_change_password))
        .route("/auth/api-keys", post(handle_create_api_key).get(handle_list_api_keys))
        .route("/auth/api-keys/{id}", axum::routing::delete(handle_revoke_api_key))
        // Admin user management
        .route("/auth/users", get(handle_admin_list_users).post(handle_admin_create_user))
        .route("/auth/users/{id}", put(handle_admin_update_user))
        .route("/auth/users/{id}/disable", post(handle_admin_disable_user))
        .route("/auth/users/{id}/enable", post(handle_admin_enable_user))
        .route("/auth/users/{id}/role", put(handle_admin_set_role))
        // Documents and jobs (proxied)
        .route("/upload", post(handle_proxy_upload))
        .route("/upload-async", post(handle_proxy_upload_async))
        .route("/upload-batch", post(handle_proxy_upload_batch))
        .route("/documents", get(handle_proxy_documents_read))
        .route("/documents/{*rest}", get(handle_proxy_documents_read).delete(handle_proxy_documents_delete).post(handle_proxy_documents_write))
        .route("/jobs", get(handle_proxy_documents_read))
        .route("/jobs/{*rest}", get(handle_proxy_documents_read).post(handle_proxy_documents_write))
        .route("/batches", get(handle_proxy_documents_read))
        .route("/batches/{*rest}", get(handle_proxy_documents_read))
        // Search
        .route("/search", post(handle_search))
        // LLM orchestration
        .route("/analyze", post(handle_analyze))
        .route("/question", post(handle_question))
        .route("/compare", post(handle_compare))
        .route("/chat", post(handle_chat))
        // Workflow
        .route("/upload-and-analyze", post(handle_upload_and_analyze))
        // Monitoring
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .with_state(state.clone());

    let mut app = Router::new().nest("/api/v1", api);
    app = app.layer(axum::middleware::from_fn_with_state(state.clone(), count_requests));
    app = app.layer(build_cors(&state.config));

    let bind = &config.gateway.bind;
    info!(%bind, "gateway listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn count_requests(
    State(state): State<GatewayState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state.stats.total.fetch_add(1, Ordering::Relaxed);
    next.run(request).await
}

/// Cookie-credentialed CORS for the configured origins. Set-cookie is
/// exposed explicitly so browser sessions work across origins.
fn build_cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .gateway
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
        .allow_credentials(true)
        .expose_headers([SET_COOKIE])
}

// ============ Authentication plumbing ============

impl GatewayState {
    fn internal(&self, e: anyhow::Error) -> ApiError {
        internal_error(&e, self.config.gateway.debug)
    }

    fn bearer_from(&self, headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            if let Some(token) = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
                return Some(token.trim().to_string());
            }
        }
        jar.get(ACCESS_COOKIE).map(|c| c.value().to_string())
    }

    async fn authenticate(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<Principal, ApiError> {
        let Some(bearer) = self.bearer_from(headers, jar) else {
            return Err(unauthorized("missing credentials"));
        };
        let resolved = auth::resolve_bearer(
            &self.pool,
            self.kv.as_ref(),
            &self.signer,
            self.config.auth.enable_api_keys,
            &bearer,
        )
        .await
        .map_err(|e| self.internal(e))?;

        match resolved {
            Ok(principal) => Ok(principal),
            Err(AuthFailure::Disabled) => Err(forbidden("account is disabled")),
            Err(AuthFailure::Unauthenticated(reason)) => Err(unauthorized(reason)),
        }
    }

    /// Principal for a read route, honoring the auth gating flags.
    async fn read_principal(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<Option<Principal>, ApiError> {
        if !self.config.gateway.enable_auth || !self.config.gateway.require_auth_for_read {
            return Ok(self.authenticate(headers, jar).await.ok());
        }
        Ok(Some(self.authenticate(headers, jar).await?))
    }

    /// Principal for a write route: auth gating plus the per-user sliding
    /// window.
    async fn write_principal(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<Option<Principal>, ApiError> {
        let principal = if !self.config.gateway.enable_auth || !self.config.gateway.require_auth_for_write {
            self.authenticate(headers, jar).await.ok()
        } else {
            Some(self.authenticate(headers, jar).await?)
        };

        if self.config.gateway.enable_rate_limiting {
            let key = principal
                .as_ref()
                .map(|p| p.user_id.as_str())
                .unwrap_or("anonymous");
            if let Decision::Limited { retry_after_secs } = self.limiter.check(key) {
                return Err(rate_limited(retry_after_secs));
            }
        }

        Ok(principal)
    }

    async fn admin_principal(
        &self,
        headers: &HeaderMap,
        jar: &CookieJar,
    ) -> Result<Principal, ApiError> {
        let principal = self.authenticate(headers, jar).await?;
        // Role comes from the user row on every request, so a demoted
        // admin loses access immediately.
        if principal.role != Role::Admin {
            return Err(forbidden("admin role required"));
        }
        Ok(principal)
    }
}

// ============ Session cookies ============

fn cookie_header(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{name}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Body plus both session cookies, with lifetimes equal to the tokens'.
fn session_response(
    state: &GatewayState,
    pair: &TokenPair,
    body: serde_json::Value,
) -> Result<Response, ApiError> {
    let secure = !state.config.gateway.debug;
    let mut response = Json(body).into_response();
    for (name, value, ttl) in [
        (ACCESS_COOKIE, &pair.access_token, state.signer.access_ttl_secs()),
        (REFRESH_COOKIE, &pair.refresh_token, state.signer.refresh_ttl_secs()),
    ] {
        let header = cookie_header(name, value, ttl, secure);
        response.headers_mut().append(
            SET_COOKIE,
            HeaderValue::from_str(&header)
                .map_err(|e| state.internal(anyhow::anyhow!("cookie encoding: {e}")))?,
        );
    }
    Ok(response)
}

fn clear_cookies_response(state: &GatewayState, body: serde_json::Value) -> Response {
    let secure = !state.config.gateway.debug;
    let mut response = Json(body).into_response();
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        if let Ok(value) = HeaderValue::from_str(&cookie_header(name, "", 0, secure)) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

fn token_body(pair: &TokenPair) -> serde_json::Value {
    serde_json::json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "token_type": pair.token_type,
        "expires_in": pair.expires_in,
    })
}

fn profile_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "email": user.email,
        "full_name": user.full_name,
        "organization": user.organization,
        "role": user.role,
        "disabled": user.disabled,
        "email_verified": user.email_verified,
        "created_at": user.created_at,
    })
}

// ============ Auth handlers ============

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    full_name: String,
    #[serde(default)]
    organization: Option<String>,
}

async fn handle_register(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if !state.config.gateway.enable_registration {
        return Err(forbidden("self-registration is disabled"));
    }
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(bad_request("a valid email is required"));
    }
    if let Some(rule) = auth::password_policy_violation(&req.password) {
        return Err(bad_request("password does not meet the policy")
            .with_fields([("password".to_string(), rule.to_string())].into()));
    }

    let user = users::create(
        &state.pool,
        NewUser {
            email: &email,
            password: &req.password,
            full_name: req.full_name.trim(),
            organization: req.organization.as_deref(),
            role: Role::User,
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| conflict("an account with this email already exists"))?;

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok());
    let pair = auth::login_session(&state.pool, &state.signer, &user, user_agent, None)
        .await
        .map_err(|e| state.internal(e))?;

    info!(email = %user.email, "account registered");
    let mut body = token_body(&pair);
    body["user"] = profile_json(&user);
    session_response(&state, &pair, body)
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn handle_login(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = users::find_by_email(&state.pool, req.email.trim())
        .await
        .map_err(|e| state.internal(e))?;

    // One rejection message for unknown email and wrong password.
    let Some(user) = user else {
        return Err(unauthorized("invalid email or password"));
    };
    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(unauthorized("invalid email or password"));
    }
    if user.disabled {
        return Err(forbidden("account is disabled"));
    }

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok());
    let pair = auth::login_session(&state.pool, &state.signer, &user, user_agent, None)
        .await
        .map_err(|e| state.internal(e))?;

    session_response(&state, &pair, token_body(&pair))
}

#[derive(Deserialize, Default)]
struct RefreshRequest {
    #[serde(default)]
    refresh_token: Option<String>,
}

async fn handle_refresh(
    State(state): State<GatewayState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let presented = body
        .and_then(|Json(req)| req.refresh_token)
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| unauthorized("refresh token required"))?;

    let claims = state
        .signer
        .verify(&presented, TokenType::Refresh)
        .map_err(|e| unauthorized(e.to_string()))?;

    let credential = auth::find_refresh_credential(&state.pool, &presented)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| unauthorized("refresh token is not recognized"))?;
    if !auth::refresh_credential_usable(&credential) {
        return Err(unauthorized("refresh token is revoked or expired"));
    }

    let user = users::find_by_id(&state.pool, &claims.sub)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| unauthorized("token subject no longer exists"))?;
    if user.disabled {
        return Err(forbidden("account is disabled"));
    }

    // Rotation: the presented token is consumed by this exchange.
    auth::revoke_refresh_token(&state.pool, &presented)
        .await
        .map_err(|e| state.internal(e))?;
    let pair = auth::login_session(&state.pool, &state.signer, &user, None, None)
        .await
        .map_err(|e| state.internal(e))?;

    session_response(&state, &pair, token_body(&pair))
}

async fn handle_logout(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;

    if let Some(claims) = &principal.access_claims {
        auth::blacklist_access_token(state.kv.as_ref(), claims);
    }
    let revoked = auth::revoke_all_refresh_tokens(&state.pool, &principal.user_id)
        .await
        .map_err(|e| state.internal(e))?;

    info!(user = %principal.user_id, revoked, "logged out");
    Ok(clear_cookies_response(
        &state,
        serde_json::json!({ "detail": "logged out" }),
    ))
}

async fn handle_me(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;
    let user = users::find_by_id(&state.pool, &principal.user_id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found("account not found"))?;
    Ok(Json(profile_json(&user)))
}

#[derive(Deserialize)]
struct UpdateMeRequest {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    organization: Option<Option<String>>,
}

async fn handle_update_me(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<UpdateMeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;
    let user = users::update_profile(
        &state.pool,
        &principal.user_id,
        ProfileUpdate {
            full_name: req.full_name,
            organization: req.organization,
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| not_found("account not found"))?;
    Ok(Json(profile_json(&user)))
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

async fn handle_change_password(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;
    let user = users::find_by_id(&state.pool, &principal.user_id)
        .await
        .map_err(|e| state.internal(e))?
        .ok_or_else(|| not_found("account not found"))?;

    if !auth::verify_password(&req.current_password, &user.password_hash) {
        return Err(unauthorized("current password is incorrect"));
    }
    if let Some(rule) = auth::password_policy_violation(&req.new_password) {
        return Err(bad_request(format!("password {rule}")));
    }

    // Also revokes every outstanding refresh credential.
    users::set_password(&state.pool, &user.id, &req.new_password)
        .await
        .map_err(|e| state.internal(e))?;

    Ok(Json(serde_json::json!({ "detail": "password changed" })))
}

// ============ API credential handlers ============

#[derive(Deserialize)]
struct CreateApiKeyRequest {
    label: String,
    #[serde(default)]
    expires_in_days: Option<i64>,
}

async fn handle_create_api_key(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.config.auth.enable_api_keys {
        return Err(forbidden("API credentials are disabled"));
    }
    let principal = state.authenticate(&headers, &jar).await?;
    if req.label.trim().is_empty() {
        return Err(bad_request("label must not be empty"));
    }
    let expires_at = req
        .expires_in_days
        .map(|days| chrono::Utc::now().timestamp() + days * 24 * 3600);

    let (credential, plaintext) =
        auth::create_api_credential(&state.pool, &principal.user_id, req.label.trim(), expires_at)
            .await
            .map_err(|e| state.internal(e))?;

    // The plaintext appears in this response and never again.
    Ok(Json(serde_json::json!({
        "id": credential.id,
        "label": credential.label,
        "api_key": plaintext,
        "created_at": credential.created_at,
        "expires_at": credential.expires_at,
    })))
}

async fn handle_list_api_keys(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;
    let credentials = auth::list_api_credentials(&state.pool, &principal.user_id)
        .await
        .map_err(|e| state.internal(e))?;

    let items: Vec<serde_json::Value> = credentials
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "label": c.label,
                "created_at": c.created_at,
                "expires_at": c.expires_at,
                "last_used_at": c.last_used_at,
                "disabled": c.disabled,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "api_keys": items })))
}

async fn handle_revoke_api_key(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.authenticate(&headers, &jar).await?;
    let revoked = auth::revoke_api_credential(&state.pool, &principal.user_id, &id)
        .await
        .map_err(|e| state.internal(e))?;
    if !revoked {
        return Err(not_found("API credential not found"));
    }
    Ok(Json(serde_json::json!({ "revoked": true, "id": id })))
}

// ============ Admin user handlers ============

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn handle_admin_list_users(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.admin_principal(&headers, &jar).await?;
    let skip = page.skip.unwrap_or(0).max(0);
    let limit = page.limit.unwrap_or(50).clamp(1, 500);
    let users = users::list(&state.pool, skip, limit)
        .await
        .map_err(|e| state.internal(e))?;
    Ok(Json(serde_json::json!({
        "users": users.iter().map(profile_json).collect::<Vec<_>>(),
    })))
}

#[derive(Deserialize)]
struct AdminCreateUserRequest {
    email: String,
    password: String,
    full_name: String,
    #[serde(default)]
    organization: Option<String>,
    #[serde(default)]
    role: Option<Role>,
}

async fn handle_admin_create_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<AdminCreateUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.admin_principal(&headers, &jar).await?;
    if let Some(rule) = auth::password_policy_violation(&req.password) {
        return Err(bad_request("password does not meet the policy")
            .with_fields([("password".to_string(), rule.to_string())].into()));
    }
    let user = users::create(
        &state.pool,
        NewUser {
            email: req.email.trim(),
            password: &req.password,
            full_name: req.full_name.trim(),
            organization: req.organization.as_deref(),
            role: req.role.unwrap_or(Role::User),
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| conflict("an account with this email already exists"))?;
    Ok(Json(profile_json(&user)))
}

#[derive(Deserialize)]
struct AdminUpdateUserRequest {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    organization: Option<Option<String>>,
    #[serde(default)]
    email_verified: Option<bool>,
}

async fn handle_admin_update_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.admin_principal(&headers, &jar).await?;
    let user = users::admin_update(
        &state.pool,
        &id,
        AdminUpdate {
            full_name: req.full_name,
            organization: req.organization,
            email_verified: req.email_verified,
            ..AdminUpdate::default()
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| not_found("user not found"))?;
    Ok(Json(profile_json(&user)))
}

async fn set_disabled(
    state: &GatewayState,
    id: &str,
    disabled: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = users::admin_update(
        &state.pool,
        id,
        AdminUpdate {
            disabled: Some(disabled),
            ..AdminUpdate::default()
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| not_found("user not found"))?;
    Ok(Json(profile_json(&user)))
}

async fn handle_admin_disable_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let admin = state.admin_principal(&headers, &jar).await?;
    if admin.user_id == id {
        return Err(bad_request("admins cannot disable their own account"));
    }
    set_disabled(&state, &id, true).await
}

async fn handle_admin_enable_user(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.admin_principal(&headers, &jar).await?;
    set_disabled(&state, &id, false).await
}

#[derive(Deserialize)]
struct SetRoleRequest {
    role: Role,
}

async fn handle_admin_set_role(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.admin_principal(&headers, &jar).await?;
    let user = users::admin_update(
        &state.pool,
        &id,
        AdminUpdate {
            role: Some(req.role),
            ..AdminUpdate::default()
        },
    )
    .await
    .map_err(|e| state.internal(e))?
    .ok_or_else(|| not_found("user not found"))?;
    Ok(Json(profile_json(&user)))
}

// ============ Proxying ============

impl GatewayState {
    fn principal_headers(principal: Option<&Principal>) -> Vec<(&'static str, String)> {
        match principal {
            Some(p) => vec![
                ("x-ps-user", p.user_id.clone()),
                ("x-ps-role", p.role.as_str().to_string()),
            ],
            None => vec![("x-ps-user", "anonymous".to_string())],
        }
    }

    /// Forward a request to a backing service and relay status, content
    /// type, and body. Timeouts become 504, transport failures 502.
    async fn proxy(
        &self,
        backing: Backing,
        method: Method,
        base: &str,
        path_and_query: &str,
        principal: Option<&Principal>,
        json_body: Option<&serde_json::Value>,
        form: Option<reqwest::multipart::Form>,
    ) -> Result<Response, ApiError> {
        self.stats.count_backing(backing);

        let url = format!("{}{}", base.trim_end_matches('/'), path_and_query);
        let mut request = self.http.request(
            reqwest::Method::from_bytes(method.as_str().as_bytes())
                .map_err(|e| self.internal(anyhow::anyhow!("method: {e}")))?,
            &url,
        );
        for (name, value) in Self::principal_headers(principal) {
            request = request.header(name, value);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }
        if let Some(form) = form {
            request = request.multipart(form);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                upstream_timeout(format!("backing service timed out: {url}"))
            } else {
                warn!(%url, error = %e, "backing service unreachable");
                upstream_failure("backing service unreachable")
            }
        })?;

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| upstream_failure(format!("reading backing response: {e}")))?;

        Ok((
            status,
            [(axum::http::header::CONTENT_TYPE, content_type)],
            bytes.to_vec(),
        )
            .into_response())
    }

    async fn proxy_documents(
        &self,
        method: Method,
        path_and_query: &str,
        principal: Option<&Principal>,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        self.proxy(
            Backing::Documents,
            method,
            &self.config.services.document_service_url,
            path_and_query,
            principal,
            body,
            None,
        )
        .await
    }
}

/// Rebuild an incoming multipart stream as a reqwest form for forwarding.
async fn forward_multipart(multipart: &mut Multipart) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("file").to_string();
        let filename = field.file_name().map(|s| s.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;
        let mut part = reqwest::multipart::Part::bytes(bytes.to_vec());
        if let Some(filename) = filename {
            part = part.file_name(filename);
        }
        form = form.part(name, part);
    }
    Ok(form)
}

fn path_with_query(path: &str, query: &Option<String>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

async fn handle_proxy_upload(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let form = forward_multipart(&mut multipart).await?;
    state
        .proxy(
            Backing::Documents,
            Method::POST,
            &state.config.services.document_service_url,
            "/upload",
            principal.as_ref(),
            None,
            Some(form),
        )
        .await
}

async fn handle_proxy_upload_async(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let form = forward_multipart(&mut multipart).await?;
    state
        .proxy(
            Backing::Documents,
            Method::POST,
            &state.config.services.document_service_url,
            "/upload-async",
            principal.as_ref(),
            None,
            Some(form),
        )
        .await
}

async fn handle_proxy_upload_batch(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let form = forward_multipart(&mut multipart).await?;
    state
        .proxy(
            Backing::Documents,
            Method::POST,
            &state.config.services.document_service_url,
            "/upload-batch",
            principal.as_ref(),
            None,
            Some(form),
        )
        .await
}

async fn handle_proxy_documents_read(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    uri: axum::http::Uri,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let principal = state.read_principal(&headers, &jar).await?;
    let path = uri.path().trim_start_matches("/api/v1").to_string();
    state
        .proxy_documents(
            Method::GET,
            &path_with_query(&path, &query),
            principal.as_ref(),
            None,
        )
        .await
}

async fn handle_proxy_documents_delete(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    uri: axum::http::Uri,
) -> Result<Response, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let path = uri.path().trim_start_matches("/api/v1").to_string();
    state
        .proxy_documents(Method::DELETE, &path, principal.as_ref(), None)
        .await
}

async fn handle_proxy_documents_write(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    uri: axum::http::Uri,
    RawQuery(query): RawQuery,
    body: Option<Json<serde_json::Value>>,
) -> Result<Response, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let path = uri.path().trim_start_matches("/api/v1").to_string();
    let body = body.map(|Json(v)| v);
    state
        .proxy_documents(
            Method::POST,
            &path_with_query(&path, &query),
            principal.as_ref(),
            body.as_ref(),
        )
        .await
}

// ============ Search ============

#[derive(Deserialize, Serialize)]
struct SearchRequest {
    query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_results: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    section: Option<String>,
}

async fn handle_search(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<SearchRequest>,
) -> Result<Response, ApiError> {
    // Search is bounded like a write: it burns embedding compute.
    let principal = state.write_principal(&headers, &jar).await?;
    let body = serde_json::to_value(&req).map_err(|e| state.internal(e.into()))?;
    state
        .proxy(
            Backing::Vector,
            Method::POST,
            &state.config.services.vector_service_url,
            "/search",
            principal.as_ref(),
            Some(&body),
            None,
        )
        .await
}

// ============ LLM orchestration ============

impl GatewayState {
    async fn fetch_document(
        &self,
        principal: Option<&Principal>,
        document_id: i64,
    ) -> Result<Document, ApiError> {
        self.stats.count_backing(Backing::Documents);
        let url = format!(
            "{}/documents/{document_id}",
            self.config.services.document_service_url.trim_end_matches('/')
        );
        let mut request = self.http.get(&url);
        for (name, value) in Self::principal_headers(principal) {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                upstream_timeout("document service timed out")
            } else {
                upstream_failure("document service unreachable")
            }
        })?;

        match response.status().as_u16() {
            200 => {}
            404 => return Err(not_found(format!("document {document_id} not found"))),
            403 => return Err(forbidden("document belongs to another user")),
            status => {
                return Err(upstream_failure(format!(
                    "document service returned {status}"
                )))
            }
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| upstream_failure(format!("document service response: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| upstream_failure(format!("document shape mismatch: {e}")))
    }

    /// Retrieve RAG context from the vector service; empty on any failure
    /// so analysis can proceed ungrounded.
    async fn fetch_rag_context(
        &self,
        principal: Option<&Principal>,
        query: &str,
        document_id: Option<i64>,
    ) -> Vec<SearchResultChunk> {
        if !self.config.llm.enable_vector_rag {
            return Vec::new();
        }
        self.stats.count_backing(Backing::Vector);
        let url = format!(
            "{}/search",
            self.config.services.vector_service_url.trim_end_matches('/')
        );
        let mut request = self.http.post(&url).json(&serde_json::json!({
            "query": query,
            "max_results": self.config.llm.rag_top_k,
            "document_id": document_id,
        }));
        for (name, value) in Self::principal_headers(principal) {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "RAG search failed, continuing without context");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "vector service unreachable for RAG");
                return Vec::new();
            }
        };

        match response.json::<serde_json::Value>().await {
            Ok(value) => serde_json::from_value(value["chunks"].clone()).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    async fn run_completion(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
    ) -> Result<llm::Completion, ApiError> {
        self.stats.count_backing(Backing::Llm);
        llm::complete(
            &self.config.llm,
            &self.config.services,
            provider,
            model,
            messages,
            max_tokens,
            None,
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains(llm::ERR_NO_CREDENTIALS) {
                service_unavailable(msg)
            } else if msg.contains("unknown LLM provider") {
                bad_request(msg)
            } else {
                upstream_failure(format!("LLM provider error: {msg}"))
            }
        })
    }
}

fn sources_json(context: &[SearchResultChunk]) -> serde_json::Value {
    serde_json::json!(context
        .iter()
        .map(|c| {
            serde_json::json!({
                "chunk_id": c.chunk_id,
                "document_id": c.document_id,
                "section": c.section,
                "similarity_score": c.similarity_score,
            })
        })
        .collect::<Vec<_>>())
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    document_id: i64,
    analysis_type: String,
    #[serde(default = "default_true")]
    use_rag: bool,
    #[serde(default)]
    llm_provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    custom_prompt: Option<String>,
}

fn default_true() -> bool {
    true
}

async fn handle_analyze(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let started = Instant::now();

    let analysis_type = AnalysisType::parse(&req.analysis_type).ok_or_else(|| {
        bad_request(format!(
            "unknown analysis_type: {}. See the documented list.",
            req.analysis_type
        ))
    })?;

    let doc = state
        .fetch_document(principal.as_ref(), req.document_id)
        .await?;

    let context = if req.use_rag {
        let query = doc
            .title
            .clone()
            .unwrap_or_else(|| req.analysis_type.clone());
        state
            .fetch_rag_context(principal.as_ref(), &query, Some(req.document_id))
            .await
    } else {
        Vec::new()
    };

    let messages =
        llm::build_analysis_messages(&doc, analysis_type, req.custom_prompt.as_deref(), &context)
            .map_err(|e| bad_request(e.to_string()))?;
    let completion = state
        .run_completion(req.llm_provider.as_deref(), req.model.as_deref(), &messages, None)
        .await?;

    Ok(Json(serde_json::json!({
        "document_id": req.document_id,
        "analysis_type": analysis_type.as_str(),
        "result": completion.content,
        "model_used": completion.model,
        "provider_used": completion.provider,
        "tokens_used": completion.tokens_used,
        "processing_time_ms": started.elapsed().as_millis() as u64,
        "sources": sources_json(&context),
    })))
}

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
    #[serde(default)]
    document_ids: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    use_rag: bool,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    llm_provider: Option<String>,
}

async fn handle_question(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let started = Instant::now();

    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let mut context = Vec::new();
    if req.use_rag {
        match &req.document_ids {
            Some(ids) => {
                for id in ids {
                    context.extend(
                        state
                            .fetch_rag_context(principal.as_ref(), &req.question, Some(*id))
                            .await,
                    );
                }
            }
            None => {
                context = state
                    .fetch_rag_context(principal.as_ref(), &req.question, None)
                    .await;
            }
        }
    }

    let messages = llm::build_question_messages(req.question.trim(), &context);
    let completion = state
        .run_completion(req.llm_provider.as_deref(), None, &messages, req.max_tokens)
        .await?;

    Ok(Json(serde_json::json!({
        "question": req.question,
        "answer": completion.content,
        "model": completion.model,
        "provider": completion.provider,
        "tokens_used": completion.tokens_used,
        "processing_time_ms": started.elapsed().as_millis() as u64,
        "sources": sources_json(&context),
    })))
}

#[derive(Deserialize)]
struct CompareRequest {
    document_ids: Vec<i64>,
    #[serde(default)]
    comparison_aspects: Option<Vec<String>>,
    #[serde(default)]
    llm_provider: Option<String>,
}

async fn handle_compare(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<CompareRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;

    if req.document_ids.len() < 2 {
        return Err(bad_request("comparison requires at least 2 documents"));
    }
    if req.document_ids.len() > 5 {
        return Err(bad_request("comparison supports at most 5 documents"));
    }

    let mut docs = Vec::with_capacity(req.document_ids.len());
    for id in &req.document_ids {
        docs.push(state.fetch_document(principal.as_ref(), *id).await?);
    }

    let aspects = req.comparison_aspects.unwrap_or_default();
    let mut context = Vec::new();
    if !aspects.is_empty() {
        let query = aspects.join(" ");
        for id in &req.document_ids {
            context.extend(
                state
                    .fetch_rag_context(principal.as_ref(), &query, Some(*id))
                    .await,
            );
        }
    }

    let messages = llm::build_compare_messages(&docs, &aspects, &context);
    let completion = state
        .run_completion(req.llm_provider.as_deref(), None, &messages, None)
        .await?;

    Ok(Json(serde_json::json!({
        "comparison": completion.content,
        "documents_compared": req.document_ids,
        "comparison_aspects": aspects,
        "model": completion.model,
        "provider": completion.provider,
        "tokens_used": completion.tokens_used,
    })))
}

#[derive(Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    document_context: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    use_rag: bool,
    #[serde(default)]
    llm_provider: Option<String>,
}

async fn handle_chat(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;

    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }
    let last_user = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .ok_or_else(|| bad_request("at least one user message is required"))?;

    let mut context = Vec::new();
    if req.use_rag {
        match &req.document_context {
            Some(ids) => {
                for id in ids {
                    context.extend(
                        state
                            .fetch_rag_context(principal.as_ref(), &last_user.content, Some(*id))
                            .await,
                    );
                }
            }
            None => {
                context = state
                    .fetch_rag_context(principal.as_ref(), &last_user.content, None)
                    .await;
            }
        }
    }

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if !context.is_empty() {
        let rendered: Vec<String> = context.iter().map(|c| c.text.clone()).collect();
        messages.push(ChatMessage::system(format!(
            "Context from the user's document library:\n{}",
            rendered.join("\n---\n")
        )));
    }
    messages.extend(req.messages.iter().cloned());

    let completion = state
        .run_completion(req.llm_provider.as_deref(), None, &messages, None)
        .await?;

    Ok(Json(serde_json::json!({
        "response": completion.content,
        "model": completion.model,
        "provider": completion.provider,
        "tokens_used": completion.tokens_used,
        "sources": sources_json(&context),
    })))
}

// ============ Workflow: upload-and-analyze ============

#[derive(Deserialize)]
struct WorkflowQuery {
    #[serde(default = "default_analysis_type")]
    analysis_type: String,
    #[serde(default = "default_true")]
    use_rag: bool,
    #[serde(default)]
    llm_provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

fn default_analysis_type() -> String {
    "summary".to_string()
}

async fn handle_upload_and_analyze(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(params): Query<WorkflowQuery>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let principal = state.write_principal(&headers, &jar).await?;
    let analysis_type = AnalysisType::parse(&params.analysis_type)
        .ok_or_else(|| bad_request(format!("unknown analysis_type: {}", params.analysis_type)))?;

    // Stage 1: queue the upload through the document service.
    let form = forward_multipart(&mut multipart).await?;
    let upload_response = state
        .proxy(
            Backing::Documents,
            Method::POST,
            &state.config.services.document_service_url,
            "/upload-async",
            principal.as_ref(),
            None,
            Some(form),
        )
        .await?;
    let upload_body = response_json(upload_response).await?;
    let Some(job_id) = upload_body.get("job_id").and_then(|v| v.as_str()).map(String::from) else {
        return Ok(Json(serde_json::json!({
            "upload": upload_body,
            "indexing": "failed",
            "analysis": null,
        })));
    };

    // Stage 2: poll the job toward completion within the configured bound
    // instead of sleeping a fixed interval.
    let deadline = Instant::now() + Duration::from_secs(state.config.gateway.workflow_index_wait_secs);
    let (document_id, job_status) = poll_job(&state, principal.as_ref(), &job_id, deadline).await?;

    // Stage 3: analyze. Indexing still in flight degrades to analysis
    // without RAG rather than discarding the upload.
    let (indexing, analysis, analysis_error) = match document_id {
        Some(doc_id) => {
            let doc = state.fetch_document(principal.as_ref(), doc_id).await?;
            let context = if params.use_rag {
                let query = doc.title.clone().unwrap_or_else(|| params.analysis_type.clone());
                state
                    .fetch_rag_context(principal.as_ref(), &query, Some(doc_id))
                    .await
            } else {
                Vec::new()
            };
            match llm::build_analysis_messages(&doc, analysis_type, None, &context) {
                Ok(messages) => match state
                    .run_completion(
                        params.llm_provider.as_deref(),
                        params.model.as_deref(),
                        &messages,
                        None,
                    )
                    .await
                {
                    Ok(completion) => (
                        "complete",
                        serde_json::json!({
                            "document_id": doc_id,
                            "analysis_type": analysis_type.as_str(),
                            "result": completion.content,
                            "model_used": completion.model,
                            "provider_used": completion.provider,
                            "tokens_used": completion.tokens_used,
                            "sources": sources_json(&context),
                        }),
                        serde_json::json!(null),
                    ),
                    Err(e) => (
                        "complete",
                        serde_json::json!(null),
                        serde_json::json!(e.detail),
                    ),
                },
                Err(e) => (
                    "complete",
                    serde_json::json!(null),
                    serde_json::json!(e.to_string()),
                ),
            }
        }
        None => ("pending", serde_json::json!(null), serde_json::json!(null)),
    };

    Ok(Json(serde_json::json!({
        "upload": upload_body,
        "job": job_status,
        "indexing": indexing,
        "analysis": analysis,
        "analysis_error": analysis_error,
    })))
}

/// Poll a job through the document service until it reaches a terminal
/// state or the deadline passes. Returns the produced document id (when
/// completed) and the last observed job body.
async fn poll_job(
    state: &GatewayState,
    principal: Option<&Principal>,
    job_id: &str,
    deadline: Instant,
) -> Result<(Option<i64>, serde_json::Value), ApiError> {
    loop {
        let response = state
            .proxy_documents(Method::GET, &format!("/jobs/{job_id}"), principal, None)
            .await?;
        let body = response_json(response).await?;
        let job_status = body["job"].clone();
        let status = job_status.get("status").and_then(|s| s.as_str()).unwrap_or("");

        if status == "completed" {
            let document_id = job_status.get("document_id").and_then(|d| d.as_i64());
            return Ok((document_id, job_status));
        }
        if status == "failed" || status == "cancelled" || Instant::now() >= deadline {
            return Ok((None, job_status));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Collapse a proxied response back into JSON for composition.
async fn response_json(response: Response) -> Result<serde_json::Value, ApiError> {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 8 * 1024 * 1024)
        .await
        .map_err(|e| upstream_failure(format!("reading upstream body: {e}")))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| upstream_failure(format!("upstream body was not JSON: {e}")))?;
    if !status.is_success() {
        return Err(ApiError::new(
            status,
            "upstream_failure",
            value
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or("upstream request failed")
                .to_string(),
        ));
    }
    Ok(value)
}

// ============ Monitoring ============

async fn probe_health(http: &reqwest::Client, base: &str) -> (bool, serde_json::Value) {
    let url = format!("{}/health", base.trim_end_matches('/'));
    let request = http.get(&url).timeout(Duration::from_secs(3));
    match request.send().await {
        Ok(response) if response.status().is_success() => {
            let facts = response
                .json::<serde_json::Value>()
                .await
                .unwrap_or(serde_json::json!({}));
            (true, facts)
        }
        Ok(response) => (
            false,
            serde_json::json!({ "error": format!("status {}", response.status()) }),
        ),
        Err(e) => (false, serde_json::json!({ "error": e.to_string() })),
    }
}

async fn handle_health(State(state): State<GatewayState>) -> Response {
    // The identity store is load-bearing; its failure alone makes the
    // gateway unhealthy rather than degraded.
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    let (documents, vector) = tokio::join!(
        probe_health(&state.http, &state.config.services.document_service_url),
        probe_health(&state.http, &state.config.services.vector_service_url),
    );

    let status = if !db_ok {
        "unhealthy"
    } else if documents.0 && vector.0 {
        "healthy"
    } else {
        "degraded"
    };

    let body = serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": { "healthy": db_ok },
            "documents": { "healthy": documents.0, "facts": documents.1 },
            "vector": { "healthy": vector.0, "facts": vector.1 },
            "llm": {
                "healthy": !llm::providers_with_credentials(&state.config.llm).is_empty(),
                "providers_with_credentials": llm::providers_with_credentials(&state.config.llm),
            },
        },
    });

    let code = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body)).into_response()
}

async fn handle_stats(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let uptime = state.stats.started.elapsed().as_secs();
    let total = state.stats.total.load(Ordering::Relaxed);
    let per_minute = if uptime > 0 {
        total as f64 / (uptime as f64 / 60.0)
    } else {
        0.0
    };

    Json(serde_json::json!({
        "total_requests": total,
        "requests_by_service": {
            "documents": state.stats.documents.load(Ordering::Relaxed),
            "vector": state.stats.vector.load(Ordering::Relaxed),
            "llm": state.stats.llm.load(Ordering::Relaxed),
        },
        "uptime_seconds": uptime,
        "requests_per_minute": per_minute,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_shape() {
        let header = cookie_header("access_token", "abc", 1800, true);
        assert!(header.contains("access_token=abc"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Max-Age=1800"));
        assert!(header.contains("Secure"));

        let debug_header = cookie_header("refresh_token", "xyz", 60, false);
        assert!(!debug_header.contains("Secure"));
    }

    #[test]
    fn path_query_composition() {
        assert_eq!(path_with_query("/jobs", &None), "/jobs");
        assert_eq!(
            path_with_query("/jobs", &Some("status=pending".to_string())),
            "/jobs?status=pending"
        );
        assert_eq!(path_with_query("/jobs", &Some(String::new())), "/jobs");
    }
}
