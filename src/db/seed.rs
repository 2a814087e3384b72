use crate::crypto;
use crate::db::{self, NewUser};
use crate::domain::models::UserRole;
use anyhow::Result;
use sqlx::PgPool;

struct SeedUser<'a> {
    username: &'a str,
    password: &'a str,
    display_name: &'a str,
    role: UserRole,
}

/// Creates the bootstrap admin when the database has none.
pub async fn seed_all(pool: &PgPool, admin: Option<(&str, &str)>) -> Result<()> {
    if db::count_admins(pool).await? > 0 {
        return Ok(());
    }
    let Some((username, password)) = admin else {
        tracing::warn!("No admin account exists and SEED_ADMIN_USERNAME/SEED_ADMIN_PASSWORD are unset");
        return Ok(());
    };
    seed_user(
        pool,
        SeedUser {
            username,
            password,
            display_name: "Administrateur",
            role: UserRole::Admin,
        },
    )
    .await
}

async fn seed_user(pool: &PgPool, user: SeedUser<'_>) -> Result<()> {
    if db::find_user_by_username(pool, user.username).await?.is_some() {
        tracing::warn!("Seed user {} exists but is not an active admin; leaving it untouched", user.username);
        return Ok(());
    }
    let hash = crypto::hash_password(user.password)?;
    let created = db::insert_user(
        pool,
        &NewUser {
            username: user.username,
            hash: &hash,
            role: user.role,
            display_name: user.display_name,
            hourly_rate_cents: None,
        },
    )
    .await?;
    db::audit::record(
        pool,
        None,
        "seed",
        "user",
        Some(created.id),
        serde_json::json!({ "role": user.role.as_str() }),
    )
    .await?;
    tracing::info!("Seeded {} account {}", user.role.as_str(), user.username);
    Ok(())
}
