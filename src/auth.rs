//! Identity core: password storage, signed tokens, API credentials, and
//! principal resolution.
//!
//! Passwords are stored as argon2 PHC strings with per-password salts.
//! Access and refresh tokens are compact HMAC-signed JWTs; refresh tokens
//! are additionally anchored server-side by their SHA-256 hash so they can
//! be revoked. API credentials are opaque `psk_…` bearer strings, hashed at
//! rest, usable in place of an access token.
//!
//! Resolution order for an incoming bearer credential:
//! 1. `psk_` prefix → API-credential lookup in C1 (updates last_used).
//! 2. Anything else → access-token verification + blacklist check.
//!
//! After either path the user row is re-read so disables and demotions take
//! effect on the next request, not at next token issue.

use anyhow::{anyhow, bail, Context, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::kv::KvStore;
use crate::models::{ApiCredential, RefreshCredential, Role, User};
use crate::users;

/// Fixed prefix distinguishing API credentials from access tokens.
pub const API_KEY_PREFIX: &str = "psk_";

const BLACKLIST_NS: &str = "bl";

// ============ Passwords ============

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {e}"))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Policy: at least 8 chars, one uppercase, one lowercase, one digit.
/// Returns the first violated rule, None if the password passes.
pub fn password_policy_violation(password: &str) -> Option<&'static str> {
    if password.chars().count() < 8 {
        return Some("must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Some("must contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Some("must contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Some("must contain a digit");
    }
    None
}

// ============ Signed tokens ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims carried by both token types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub token_type: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

/// Issues and verifies the platform's signed tokens.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl TokenSigner {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let algorithm = match config.jwt_algorithm.as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => bail!("unsupported jwt_algorithm: {other}"),
        };
        let secret = config.effective_secret();
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            access_ttl_secs: config.access_token_expire_minutes * 60,
            refresh_ttl_secs: config.refresh_token_expire_days * 24 * 3600,
        })
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl_secs
    }

    fn issue(&self, user_id: &str, role: Role, token_type: TokenType, ttl_secs: i64) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            token_type: token_type.as_str().to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .context("token signing failed")
    }

    pub fn issue_access(&self, user_id: &str, role: Role) -> Result<String> {
        self.issue(user_id, role, TokenType::Access, self.access_ttl_secs)
    }

    pub fn issue_refresh(&self, user_id: &str, role: Role) -> Result<String> {
        self.issue(user_id, role, TokenType::Refresh, self.refresh_ttl_secs)
    }

    pub fn issue_pair(&self, user_id: &str, role: Role) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(user_id, role)?,
            refresh_token: self.issue_refresh(user_id, role)?,
            token_type: "bearer",
            expires_in: self.access_ttl_secs,
        })
    }

    /// Verify signature and expiry, and that the token is of the expected
    /// type. Does not consult the blacklist or the refresh-token store.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| anyhow!("invalid token: {e}"))?;
        if data.claims.token_type != expected.as_str() {
            bail!("wrong token type: expected {}", expected.as_str());
        }
        Ok(data.claims)
    }
}

// ============ Blacklist ============

/// Record a logged-out access token until its natural expiry.
pub fn blacklist_access_token(kv: &dyn KvStore, claims: &Claims) {
    let remaining = (claims.exp - chrono::Utc::now().timestamp()).max(1) as u64;
    kv.put_with_ttl(
        &format!("{BLACKLIST_NS}:{}", claims.jti),
        Duration::from_secs(remaining),
    );
}

pub fn is_blacklisted(kv: &dyn KvStore, claims: &Claims) -> bool {
    kv.exists(&format!("{BLACKLIST_NS}:{}", claims.jti))
}

// ============ Refresh-token store ============

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn store_refresh_token(
    pool: &SqlitePool,
    token: &str,
    user_id: &str,
    ttl_secs: i64,
    user_agent: Option<&str>,
    ip: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_hash, user_id, issued_at, expires_at, revoked, user_agent, ip)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(sha256_hex(token))
    .bind(user_id)
    .bind(now)
    .bind(now + ttl_secs)
    .bind(user_agent)
    .bind(ip)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_refresh_credential(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<RefreshCredential>> {
    let row = sqlx::query(
        "SELECT token_hash, user_id, issued_at, expires_at, revoked, user_agent, ip
         FROM refresh_tokens WHERE token_hash = ?",
    )
    .bind(sha256_hex(token))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| RefreshCredential {
        token_hash: row.get("token_hash"),
        user_id: row.get("user_id"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        revoked: row.get::<i64, _>("revoked") != 0,
        user_agent: row.get("user_agent"),
        ip: row.get("ip"),
    }))
}

/// A stored refresh credential yields a new pair only while unrevoked and
/// unexpired.
pub fn refresh_credential_usable(cred: &RefreshCredential) -> bool {
    !cred.revoked && cred.expires_at > chrono::Utc::now().timestamp()
}

pub async fn revoke_refresh_token(pool: &SqlitePool, token: &str) -> Result<()> {
    sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?")
        .bind(sha256_hex(token))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn revoke_all_refresh_tokens(pool: &SqlitePool, user_id: &str) -> Result<u64> {
    let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ? AND revoked = 0")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn purge_expired_refresh_tokens(pool: &SqlitePool) -> Result<u64> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ============ API credentials ============

/// Mint a new API credential for `user_id`. Returns (record, plaintext);
/// the plaintext is shown exactly once.
pub async fn create_api_credential(
    pool: &SqlitePool,
    user_id: &str,
    label: &str,
    expires_at: Option<i64>,
) -> Result<(ApiCredential, String)> {
    let mut secret = [0u8; 32];
    rand::rng().fill_bytes(&mut secret);
    let plaintext = format!(
        "{API_KEY_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret)
    );

    let cred = ApiCredential {
        id: Uuid::new_v4().to_string(),
        key_hash: sha256_hex(&plaintext),
        user_id: user_id.to_string(),
        label: label.to_string(),
        created_at: chrono::Utc::now().timestamp(),
        expires_at,
        last_used_at: None,
        disabled: false,
    };

    sqlx::query(
        r#"
        INSERT INTO api_keys (id, key_hash, user_id, label, created_at, expires_at, last_used_at, disabled)
        VALUES (?, ?, ?, ?, ?, ?, NULL, 0)
        "#,
    )
    .bind(&cred.id)
    .bind(&cred.key_hash)
    .bind(&cred.user_id)
    .bind(&cred.label)
    .bind(cred.created_at)
    .bind(cred.expires_at)
    .execute(pool)
    .await?;

    Ok((cred, plaintext))
}

pub async fn list_api_credentials(pool: &SqlitePool, user_id: &str) -> Result<Vec<ApiCredential>> {
    let rows = sqlx::query(
        "SELECT id, key_hash, user_id, label, created_at, expires_at, last_used_at, disabled
         FROM api_keys WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(api_credential_from_row).collect())
}

pub async fn revoke_api_credential(pool: &SqlitePool, user_id: &str, cred_id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE api_keys SET disabled = 1 WHERE id = ? AND user_id = ?")
        .bind(cred_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn api_credential_from_row(row: &sqlx::sqlite::SqliteRow) -> ApiCredential {
    ApiCredential {
        id: row.get("id"),
        key_hash: row.get("key_hash"),
        user_id: row.get("user_id"),
        label: row.get("label"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        last_used_at: row.get("last_used_at"),
        disabled: row.get::<i64, _>("disabled") != 0,
    }
}

// ============ Principal resolution ============

/// The authenticated caller, after credential resolution and the user-row
/// re-read.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub via_api_key: bool,
    /// Present when the caller authenticated with an access token.
    pub access_claims: Option<Claims>,
}

/// Why authentication failed. Disabled accounts are authorization failures,
/// everything else is an authentication failure.
#[derive(Debug)]
pub enum AuthFailure {
    Unauthenticated(String),
    Disabled,
}

pub async fn resolve_bearer(
    pool: &SqlitePool,
    kv: &dyn KvStore,
    signer: &TokenSigner,
    enable_api_keys: bool,
    bearer: &str,
) -> Result<std::result::Result<Principal, AuthFailure>> {
    if bearer.starts_with(API_KEY_PREFIX) {
        if !enable_api_keys {
            return Ok(Err(AuthFailure::Unauthenticated(
                "API credentials are disabled".to_string(),
            )));
        }
        return resolve_api_key(pool, bearer).await;
    }
    resolve_access_token(pool, kv, signer, bearer).await
}

async fn resolve_api_key(
    pool: &SqlitePool,
    bearer: &str,
) -> Result<std::result::Result<Principal, AuthFailure>> {
    let row = sqlx::query(
        "SELECT id, key_hash, user_id, label, created_at, expires_at, last_used_at, disabled
         FROM api_keys WHERE key_hash = ?",
    )
    .bind(sha256_hex(bearer))
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(Err(AuthFailure::Unauthenticated(
            "unknown API credential".to_string(),
        )));
    };
    let cred = api_credential_from_row(&row);

    if cred.disabled {
        return Ok(Err(AuthFailure::Unauthenticated(
            "API credential revoked".to_string(),
        )));
    }
    let now = chrono::Utc::now().timestamp();
    if matches!(cred.expires_at, Some(exp) if exp <= now) {
        return Ok(Err(AuthFailure::Unauthenticated(
            "API credential expired".to_string(),
        )));
    }

    sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
        .bind(now)
        .bind(&cred.id)
        .execute(pool)
        .await?;

    let Some(user) = users::find_by_id(pool, &cred.user_id).await? else {
        return Ok(Err(AuthFailure::Unauthenticated(
            "credential owner no longer exists".to_string(),
        )));
    };
    if user.disabled {
        return Ok(Err(AuthFailure::Disabled));
    }

    Ok(Ok(Principal {
        user_id: user.id,
        email: user.email,
        role: user.role,
        via_api_key: true,
        access_claims: None,
    }))
}

async fn resolve_access_token(
    pool: &SqlitePool,
    kv: &dyn KvStore,
    signer: &TokenSigner,
    bearer: &str,
) -> Result<std::result::Result<Principal, AuthFailure>> {
    let claims = match signer.verify(bearer, TokenType::Access) {
        Ok(claims) => claims,
        Err(e) => return Ok(Err(AuthFailure::Unauthenticated(e.to_string()))),
    };

    if is_blacklisted(kv, &claims) {
        return Ok(Err(AuthFailure::Unauthenticated(
            "token has been logged out".to_string(),
        )));
    }

    let Some(user) = users::find_by_id(pool, &claims.sub).await? else {
        return Ok(Err(AuthFailure::Unauthenticated(
            "token subject no longer exists".to_string(),
        )));
    };
    if user.disabled {
        return Ok(Err(AuthFailure::Disabled));
    }

    Ok(Ok(Principal {
        user_id: user.id,
        email: user.email,
        // Role from the row, not the claim, so demotion applies immediately.
        role: user.role,
        via_api_key: false,
        access_claims: Some(claims),
    }))
}

/// Issue a token pair and anchor the refresh half server-side.
pub async fn login_session(
    pool: &SqlitePool,
    signer: &TokenSigner,
    user: &User,
    user_agent: Option<&str>,
    ip: Option<&str>,
) -> Result<TokenPair> {
    let pair = signer.issue_pair(&user.id, user.role)?;
    store_refresh_token(
        pool,
        &pair.refresh_token,
        &user.id,
        signer.refresh_ttl_secs(),
        user_agent,
        ip,
    )
    .await?;
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::from_config(&AuthConfig {
            secret_key: Some("test-secret".to_string()),
            ..AuthConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("Sup3rSecret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("Sup3rSecret", &hash));
        assert!(!verify_password("sup3rsecret", &hash));
        assert!(!verify_password("Sup3rSecret", "not-a-hash"));
    }

    #[test]
    fn distinct_salts_per_hash() {
        let a = hash_password("Sup3rSecret").unwrap();
        let b = hash_password("Sup3rSecret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn policy_rejects_weak_passwords() {
        assert!(password_policy_violation("Short1").is_some());
        assert!(password_policy_violation("alllowercase1").is_some());
        assert!(password_policy_violation("ALLUPPER1").is_some());
        assert!(password_policy_violation("NoDigitsHere").is_some());
        assert!(password_policy_violation("Adequate1").is_none());
    }

    #[test]
    fn token_pair_verifies() {
        let signer = signer();
        let pair = signer.issue_pair("user-1", Role::User).unwrap();

        let access = signer.verify(&pair.access_token, TokenType::Access).unwrap();
        assert_eq!(access.sub, "user-1");
        assert_eq!(access.role, "user");
        assert_eq!(access.token_type, "access");

        let refresh = signer
            .verify(&pair.refresh_token, TokenType::Refresh)
            .unwrap();
        assert_eq!(refresh.token_type, "refresh");
        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn wrong_token_type_rejected() {
        let signer = signer();
        let pair = signer.issue_pair("user-1", Role::Admin).unwrap();
        assert!(signer.verify(&pair.refresh_token, TokenType::Access).is_err());
        assert!(signer.verify(&pair.access_token, TokenType::Refresh).is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let signer = signer();
        let token = signer.issue_access("user-1", Role::User).unwrap();
        let mut tampered = token.clone();
        tampered.pop();
        tampered.push('x');
        assert!(signer.verify(&tampered, TokenType::Access).is_err());
    }

    #[test]
    fn other_secret_rejected() {
        let signer_a = signer();
        let signer_b = TokenSigner::from_config(&AuthConfig {
            secret_key: Some("other-secret".to_string()),
            ..AuthConfig::default()
        })
        .unwrap();
        let token = signer_a.issue_access("user-1", Role::User).unwrap();
        assert!(signer_b.verify(&token, TokenType::Access).is_err());
    }

    #[test]
    fn blacklist_blocks_by_jti() {
        let kv = crate::kv::MemoryKvStore::new();
        let signer = signer();
        let token = signer.issue_access("user-1", Role::User).unwrap();
        let claims = signer.verify(&token, TokenType::Access).unwrap();

        assert!(!is_blacklisted(&kv, &claims));
        blacklist_access_token(&kv, &claims);
        assert!(is_blacklisted(&kv, &claims));
    }

    #[test]
    fn api_key_prefix_and_entropy() {
        // Plaintext shape without touching the database.
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let plaintext = format!(
            "{API_KEY_PREFIX}{}",
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret)
        );
        assert!(plaintext.starts_with("psk_"));
        assert!(plaintext.len() > 40);
    }

    #[test]
    fn refresh_usability_window() {
        let now = chrono::Utc::now().timestamp();
        let mut cred = RefreshCredential {
            token_hash: "h".to_string(),
            user_id: "u".to_string(),
            issued_at: now - 10,
            expires_at: now + 100,
            revoked: false,
            user_agent: None,
            ip: None,
        };
        assert!(refresh_credential_usable(&cred));
        cred.revoked = true;
        assert!(!refresh_credential_usable(&cred));
        cred.revoked = false;
        cred.expires_at = now - 1;
        assert!(!refresh_credential_usable(&cred));
    }
}
