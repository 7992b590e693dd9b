//! User account storage.
//!
//! Email uniqueness is enforced case-insensitively by the database (NOCASE
//! collation + unique index), not by check-then-insert. Accounts are never
//! hard-deleted while referenced; disabling is the soft lifecycle exit.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::auth;
use crate::config::GatewayConfig;
use crate::models::{Role, User};

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub full_name: &'a str,
    pub organization: Option<&'a str>,
    pub role: Role,
}

/// Fields a user may change on their own profile.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub organization: Option<Option<String>>,
}

/// Fields an admin may change on any account.
#[derive(Debug, Default)]
pub struct AdminUpdate {
    pub full_name: Option<String>,
    pub organization: Option<Option<String>>,
    pub role: Option<Role>,
    pub disabled: Option<bool>,
    pub email_verified: Option<bool>,
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    let role: String = row.get("role");
    User {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        full_name: row.get("full_name"),
        organization: row.get("organization"),
        role: Role::parse(&role).unwrap_or(Role::User),
        disabled: row.get::<i64, _>("disabled") != 0,
        email_verified: row.get::<i64, _>("email_verified") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, full_name, organization, role, disabled, email_verified, created_at, updated_at";

/// Insert a new account. Returns Ok(None) when the email is already taken
/// (unique-constraint violation), so callers can map it to a 409.
pub async fn create(pool: &SqlitePool, new_user: NewUser<'_>) -> Result<Option<User>> {
    let now = chrono::Utc::now().timestamp();
    let id = Uuid::new_v4().to_string();
    let password_hash = auth::hash_password(new_user.password)?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (id, email, password_hash, full_name, organization, role, disabled, email_verified, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(new_user.email)
    .bind(&password_hash)
    .bind(new_user.full_name)
    .bind(new_user.organization)
    .bind(new_user.role.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(find_by_id(pool, &id).await?),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>> {
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

pub async fn list(pool: &SqlitePool, skip: i64, limit: i64) -> Result<Vec<User>> {
    let rows = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC LIMIT ? OFFSET ?"
    ))
    .bind(limit)
    .bind(skip)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(user_from_row).collect())
}

pub async fn update_profile(pool: &SqlitePool, id: &str, update: ProfileUpdate) -> Result<Option<User>> {
    let Some(current) = find_by_id(pool, id).await? else {
        return Ok(None);
    };
    let full_name = update.full_name.unwrap_or(current.full_name);
    let organization = update.organization.unwrap_or(current.organization);

    sqlx::query("UPDATE users SET full_name = ?, organization = ?, updated_at = ? WHERE id = ?")
        .bind(&full_name)
        .bind(&organization)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;
    find_by_id(pool, id).await
}

pub async fn admin_update(pool: &SqlitePool, id: &str, update: AdminUpdate) -> Result<Option<User>> {
    let Some(current) = find_by_id(pool, id).await? else {
        return Ok(None);
    };
    let full_name = update.full_name.unwrap_or(current.full_name);
    let organization = update.organization.unwrap_or(current.organization);
    let role = update.role.unwrap_or(current.role);
    let disabled = update.disabled.unwrap_or(current.disabled);
    let email_verified = update.email_verified.unwrap_or(current.email_verified);

    sqlx::query(
        "UPDATE users SET full_name = ?, organization = ?, role = ?, disabled = ?, email_verified = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&full_name)
    .bind(&organization)
    .bind(role.as_str())
    .bind(disabled as i64)
    .bind(email_verified as i64)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    // Disabling an account kills its sessions on the next refresh.
    if disabled && !current.disabled {
        auth::revoke_all_refresh_tokens(pool, id).await?;
    }

    find_by_id(pool, id).await
}

pub async fn set_password(pool: &SqlitePool, id: &str, new_password: &str) -> Result<()> {
    let password_hash = auth::hash_password(new_password)?;
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;
    // Password change invalidates every outstanding session.
    auth::revoke_all_refresh_tokens(pool, id).await?;
    Ok(())
}

/// Create the configured admin account on first boot if no user exists.
pub async fn bootstrap_admin(pool: &SqlitePool, gateway: &GatewayConfig) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let created = create(
        pool,
        NewUser {
            email: &gateway.admin_email,
            password: &gateway.admin_password,
            full_name: &gateway.admin_full_name,
            organization: None,
            role: Role::Admin,
        },
    )
    .await?;

    if created.is_some() {
        info!(email = %gateway.admin_email, "bootstrapped default admin account");
    }
    Ok(())
}
