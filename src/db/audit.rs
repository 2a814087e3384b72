//! Audit trail and in-app notifications. Both are append-mostly.

use crate::domain::models::{AuditLog, Notification};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

pub async fn record<'e>(
    exec: impl PgExecutor<'e>,
    actor_id: Option<Uuid>,
    action: &str,
    entity: &str,
    entity_id: Option<Uuid>,
    details: serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, actor_id, action, entity, entity_id, details)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(actor_id)
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(details)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn list_audit(pool: &PgPool, limit: i64) -> sqlx::Result<Vec<AuditLog>> {
    sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT id, actor_id, action, entity, entity_id, details, created_at
        FROM audit_logs
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn notify<'e>(
    exec: impl PgExecutor<'e>,
    user_id: Uuid,
    kind: &str,
    message: &str,
    progression_id: Option<Uuid>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO notifications (id, user_id, kind, message, progression_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(kind)
    .bind(message)
    .bind(progression_id)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn list_notifications(
    pool: &PgPool,
    user_id: Uuid,
    unread_only: bool,
) -> sqlx::Result<Vec<Notification>> {
    sqlx::query_as::<_, Notification>(
        r#"
        SELECT id, user_id, kind, message, progression_id, read_at, created_at
        FROM notifications
        WHERE user_id = $1 AND (NOT $2 OR read_at IS NULL)
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(user_id)
    .bind(unread_only)
    .fetch_all(pool)
    .await
}

pub async fn mark_read(pool: &PgPool, id: Uuid, user_id: Uuid) -> sqlx::Result<u64> {
    let res = sqlx::query(
        "UPDATE notifications SET read_at = COALESCE(read_at, now()) WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}
