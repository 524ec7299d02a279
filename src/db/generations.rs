use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row};
use uuid::Uuid;

use super::StoreError;
use crate::generations::{GenerationProgress, GenerationRecord};

const GENERATION_COLUMNS: &str = r#"
    generation_id,
    reservation_id,
    user_id,
    provider,
    model,
    prompt,
    status,
    credits_reserved,
    cost_to_operator,
    video_url,
    error_message,
    refunded_at,
    created_at,
    updated_at,
    completed_at
"#;

// key: generations-db -> write-once insert
pub async fn insert<'c, E>(executor: E, record: &GenerationRecord) -> Result<(), StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO generations (
            generation_id,
            reservation_id,
            user_id,
            provider,
            model,
            prompt,
            status,
            credits_reserved,
            cost_to_operator,
            video_url,
            error_message,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
        "#,
    )
    .bind(&record.generation_id)
    .bind(record.reservation_id)
    .bind(record.user_id)
    .bind(record.provider.as_str())
    .bind(&record.model)
    .bind(&record.prompt)
    .bind(record.status.as_str())
    .bind(record.credits_reserved)
    .bind(record.cost_to_operator)
    .bind(&record.video_url)
    .bind(&record.error_message)
    .bind(record.created_at)
    .execute(executor)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => Err(
            StoreError::Duplicate(format!("generation `{}`", record.generation_id)),
        ),
        Err(err) => Err(StoreError::Unavailable(err)),
    }
}

pub async fn get<'c, E>(
    executor: E,
    generation_id: &str,
) -> Result<Option<GenerationRecord>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE generation_id = $1");
    let row = sqlx::query(&sql)
        .bind(generation_id)
        .fetch_optional(executor)
        .await?;
    row.map(|row| map_row(&row)).transpose()
}

pub async fn update_progress<'c, E>(
    executor: E,
    generation_id: &str,
    progress: &GenerationProgress,
) -> Result<Option<GenerationRecord>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!(
        r#"
        UPDATE generations
        SET
            status = $2,
            video_url = COALESCE($3, video_url),
            error_message = COALESCE($4, error_message),
            completed_at = COALESCE($5, completed_at),
            updated_at = NOW()
        WHERE generation_id = $1
          AND status IN ('starting', 'processing')
          AND NOT (status = 'processing' AND $2 = 'starting')
        RETURNING {GENERATION_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(generation_id)
        .bind(progress.status.as_str())
        .bind(&progress.video_url)
        .bind(&progress.error_message)
        .bind(progress.completed_at)
        .fetch_optional(executor)
        .await?;
    row.map(|row| map_row(&row)).transpose()
}

pub async fn mark_refunded<'c, E>(
    executor: E,
    generation_id: &str,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE generations
        SET refunded_at = $2, updated_at = NOW()
        WHERE generation_id = $1
          AND status = 'failed'
          AND refunded_at IS NULL
        "#,
    )
    .bind(generation_id)
    .bind(at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_for_user<'c, E>(
    executor: E,
    user_id: Uuid,
    limit: i64,
) -> Result<Vec<GenerationRecord>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!(
        "SELECT {GENERATION_COLUMNS} FROM generations WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"
    );
    let rows = sqlx::query(&sql)
        .bind(user_id)
        .bind(limit)
        .fetch_all(executor)
        .await?;
    rows.iter().map(map_row).collect()
}

pub async fn in_flight<'c, E>(
    executor: E,
    updated_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<GenerationRecord>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!(
        r#"
        SELECT {GENERATION_COLUMNS}
        FROM generations
        WHERE status IN ('starting', 'processing')
          AND updated_at < $1
        ORDER BY updated_at
        LIMIT $2
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(updated_before)
        .bind(limit)
        .fetch_all(executor)
        .await?;
    rows.iter().map(map_row).collect()
}

pub async fn failed_unrefunded<'c, E>(
    executor: E,
    limit: i64,
) -> Result<Vec<GenerationRecord>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let sql = format!(
        r#"
        SELECT {GENERATION_COLUMNS}
        FROM generations
        WHERE status = 'failed' AND refunded_at IS NULL
        ORDER BY updated_at
        LIMIT $1
        "#
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(executor).await?;
    rows.iter().map(map_row).collect()
}

fn map_row(row: &PgRow) -> Result<GenerationRecord, StoreError> {
    let provider: String = row.get("provider");
    let status: String = row.get("status");
    Ok(GenerationRecord {
        generation_id: row.get("generation_id"),
        reservation_id: row.get("reservation_id"),
        user_id: row.get("user_id"),
        provider: provider.parse().map_err(StoreError::Corrupt)?,
        model: row.get("model"),
        prompt: row.get("prompt"),
        status: status.parse().map_err(StoreError::Corrupt)?,
        credits_reserved: row.get("credits_reserved"),
        cost_to_operator: row.get("cost_to_operator"),
        video_url: row.get("video_url"),
        error_message: row.get("error_message"),
        refunded_at: row.get("refunded_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}
