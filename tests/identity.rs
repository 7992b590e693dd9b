//! Integration tests for the identity core: credential resolution,
//! blacklisting, refresh revocation, and API credentials against a real
//! store.

use sqlx::SqlitePool;
use tempfile::TempDir;

use paperstack::auth::{self, AuthFailure, TokenSigner, TokenType};
use paperstack::config::{AuthConfig, Config, DbConfig};
use paperstack::kv::MemoryKvStore;
use paperstack::models::Role;
use paperstack::users::{self, AdminUpdate, NewUser};
use paperstack::{db, migrate};

async fn setup() -> (TempDir, SqlitePool, TokenSigner, MemoryKvStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("identity.sqlite"),
            pool_size: 2,
        },
        storage: Default::default(),
        services: Default::default(),
        gateway: Default::default(),
        auth: AuthConfig {
            secret_key: Some("integration-secret".to_string()),
            ..AuthConfig::default()
        },
        vector: Default::default(),
        documents: Default::default(),
        llm: Default::default(),
        ingest: Default::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let signer = TokenSigner::from_config(&config.auth).unwrap();
    (tmp, pool, signer, MemoryKvStore::new())
}

async fn make_user(pool: &SqlitePool, email: &str, role: Role) -> paperstack::models::User {
    users::create(
        pool,
        NewUser {
            email,
            password: "Sup3rSecret",
            full_name: "Identity Test",
            organization: None,
            role,
        },
    )
    .await
    .unwrap()
    .expect("user created")
}

#[tokio::test]
async fn access_token_resolves_to_principal() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let pair = signer.issue_pair(&user.id, user.role).unwrap();

    let principal = auth::resolve_bearer(&pool, &kv, &signer, true, &pair.access_token)
        .await
        .unwrap()
        .expect("resolution succeeds");
    assert_eq!(principal.user_id, user.id);
    assert_eq!(principal.role, Role::User);
    assert!(!principal.via_api_key);
}

#[tokio::test]
async fn refresh_token_is_not_an_access_token() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let pair = signer.issue_pair(&user.id, user.role).unwrap();

    let result = auth::resolve_bearer(&pool, &kv, &signer, true, &pair.refresh_token)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Unauthenticated(_))));
}

#[tokio::test]
async fn blacklisted_token_fails_until_expiry() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let token = signer.issue_access(&user.id, user.role).unwrap();
    let claims = signer.verify(&token, TokenType::Access).unwrap();

    // Usable before logout.
    assert!(auth::resolve_bearer(&pool, &kv, &signer, true, &token)
        .await
        .unwrap()
        .is_ok());

    auth::blacklist_access_token(&kv, &claims);

    let result = auth::resolve_bearer(&pool, &kv, &signer, true, &token)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Unauthenticated(_))));
}

#[tokio::test]
async fn disabled_account_fails_authorization_not_authentication() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let token = signer.issue_access(&user.id, user.role).unwrap();

    users::admin_update(
        &pool,
        &user.id,
        AdminUpdate {
            disabled: Some(true),
            ..AdminUpdate::default()
        },
    )
    .await
    .unwrap();

    // The signature is still valid; the account state rejects it.
    let result = auth::resolve_bearer(&pool, &kv, &signer, true, &token)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Disabled)));
}

#[tokio::test]
async fn role_comes_from_the_row_not_the_claim() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "root@example.com", Role::Admin).await;
    let token = signer.issue_access(&user.id, Role::Admin).unwrap();

    // Demote after the token was issued.
    users::admin_update(
        &pool,
        &user.id,
        AdminUpdate {
            role: Some(Role::User),
            ..AdminUpdate::default()
        },
    )
    .await
    .unwrap();

    let principal = auth::resolve_bearer(&pool, &kv, &signer, true, &token)
        .await
        .unwrap()
        .expect("token still authenticates");
    assert_eq!(principal.role, Role::User);
}

#[tokio::test]
async fn revoked_refresh_credential_is_unusable() {
    let (_tmp, pool, signer, _kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let pair = auth::login_session(&pool, &signer, &user, Some("test-agent"), None)
        .await
        .unwrap();

    let credential = auth::find_refresh_credential(&pool, &pair.refresh_token)
        .await
        .unwrap()
        .expect("stored at login");
    assert!(auth::refresh_credential_usable(&credential));
    assert_eq!(credential.user_agent.as_deref(), Some("test-agent"));

    auth::revoke_refresh_token(&pool, &pair.refresh_token)
        .await
        .unwrap();
    let credential = auth::find_refresh_credential(&pool, &pair.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert!(!auth::refresh_credential_usable(&credential));
}

#[tokio::test]
async fn password_change_revokes_all_sessions() {
    let (_tmp, pool, signer, _kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let first = auth::login_session(&pool, &signer, &user, None, None)
        .await
        .unwrap();
    let second = auth::login_session(&pool, &signer, &user, None, None)
        .await
        .unwrap();

    users::set_password(&pool, &user.id, "N3wPassword").await.unwrap();

    for pair in [first, second] {
        let credential = auth::find_refresh_credential(&pool, &pair.refresh_token)
            .await
            .unwrap()
            .unwrap();
        assert!(!auth::refresh_credential_usable(&credential));
    }

    let refreshed = users::find_by_id(&pool, &user.id).await.unwrap().unwrap();
    assert!(auth::verify_password("N3wPassword", &refreshed.password_hash));
    assert!(!auth::verify_password("Sup3rSecret", &refreshed.password_hash));
}

#[tokio::test]
async fn unknown_refresh_token_is_not_recognized() {
    let (_tmp, pool, signer, _kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    // Signed correctly but never stored server-side.
    let rogue = signer.issue_refresh(&user.id, user.role).unwrap();
    let found = auth::find_refresh_credential(&pool, &rogue).await.unwrap();
    assert!(found.is_none());
}

// ============ API credentials ============

#[tokio::test]
async fn api_credential_roundtrip() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;

    let (created, plaintext) = auth::create_api_credential(&pool, &user.id, "ci-bot", None)
        .await
        .unwrap();
    assert!(plaintext.starts_with("psk_"));
    assert!(created.last_used_at.is_none());

    let principal = auth::resolve_bearer(&pool, &kv, &signer, true, &plaintext)
        .await
        .unwrap()
        .expect("API credential authenticates");
    assert!(principal.via_api_key);
    assert_eq!(principal.user_id, user.id);

    // Usage stamps last_used.
    let listed = auth::list_api_credentials(&pool, &user.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].last_used_at.is_some());
}

#[tokio::test]
async fn revoked_api_credential_fails() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let (created, plaintext) = auth::create_api_credential(&pool, &user.id, "ci-bot", None)
        .await
        .unwrap();

    assert!(auth::revoke_api_credential(&pool, &user.id, &created.id)
        .await
        .unwrap());
    let result = auth::resolve_bearer(&pool, &kv, &signer, true, &plaintext)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Unauthenticated(_))));
}

#[tokio::test]
async fn expired_api_credential_fails() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let past = chrono::Utc::now().timestamp() - 10;
    let (_created, plaintext) = auth::create_api_credential(&pool, &user.id, "old", Some(past))
        .await
        .unwrap();

    let result = auth::resolve_bearer(&pool, &kv, &signer, true, &plaintext)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Unauthenticated(_))));
}

#[tokio::test]
async fn api_credentials_can_be_globally_disabled() {
    let (_tmp, pool, signer, kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let (_created, plaintext) = auth::create_api_credential(&pool, &user.id, "ci-bot", None)
        .await
        .unwrap();

    let result = auth::resolve_bearer(&pool, &kv, &signer, false, &plaintext)
        .await
        .unwrap();
    assert!(matches!(result, Err(AuthFailure::Unauthenticated(_))));
}

#[tokio::test]
async fn disabling_user_revokes_refresh_credentials() {
    let (_tmp, pool, signer, _kv) = setup().await;
    let user = make_user(&pool, "alice@example.com", Role::User).await;
    let pair = auth::login_session(&pool, &signer, &user, None, None)
        .await
        .unwrap();

    users::admin_update(
        &pool,
        &user.id,
        AdminUpdate {
            disabled: Some(true),
            ..AdminUpdate::default()
        },
    )
    .await
    .unwrap();

    let credential = auth::find_refresh_credential(&pool, &pair.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert!(!auth::refresh_credential_usable(&credential));
}
