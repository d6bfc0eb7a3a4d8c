use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::models::{BatchPrediction, RecordedPrediction};
use crate::risk::RiskLevel;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Stores one scoring run and its successful predictions. Error rows are
/// not stored. Returns the run id and the number of predictions written.
pub async fn record_run(
    pool: &PgPool,
    cohort: &str,
    source: &str,
    model_trained_at: DateTime<Utc>,
    predictions: &[BatchPrediction],
) -> anyhow::Result<(Uuid, usize)> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO dropout_risk.scoring_runs (id, cohort, source, model_trained_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(run_id)
    .bind(cohort)
    .bind(source)
    .bind(model_trained_at)
    .execute(&mut *tx)
    .await?;

    let mut inserted = 0usize;
    for prediction in predictions.iter().filter(|p| !p.is_error()) {
        let result = sqlx::query(
            r#"
            INSERT INTO dropout_risk.predictions
            (id, run_id, student_id, predicted_status, dropout_probability, risk_level, probabilities)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id, student_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(run_id)
        .bind(prediction.student_id as i64)
        .bind(&prediction.result.predicted_status)
        .bind(prediction.result.dropout_probability)
        .bind(prediction.result.risk_level.label())
        .bind(Json(&prediction.result.probabilities))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    tx.commit().await?;
    info!(%run_id, cohort, inserted, "recorded scoring run");
    Ok((run_id, inserted))
}

pub async fn fetch_history(
    pool: &PgPool,
    cohort: Option<&str>,
    risk_level: Option<RiskLevel>,
    limit: i64,
) -> anyhow::Result<Vec<RecordedPrediction>> {
    let rows = sqlx::query(
        "SELECT p.id, p.run_id, r.cohort, p.student_id, p.predicted_status, \
         p.dropout_probability, p.risk_level, r.scored_at \
         FROM dropout_risk.predictions p \
         JOIN dropout_risk.scoring_runs r ON r.id = p.run_id \
         WHERE ($1::text IS NULL OR r.cohort = $1) \
         AND ($2::text IS NULL OR p.risk_level = $2) \
         ORDER BY p.dropout_probability DESC, r.scored_at DESC \
         LIMIT $3",
    )
    .bind(cohort)
    .bind(risk_level.map(RiskLevel::label))
    .bind(limit.max(1))
    .fetch_all(pool)
    .await?;

    let mut history = Vec::with_capacity(rows.len());
    for row in rows {
        history.push(RecordedPrediction {
            id: row.get("id"),
            run_id: row.get("run_id"),
            cohort: row.get("cohort"),
            student_id: row.get("student_id"),
            predicted_status: row.get("predicted_status"),
            dropout_probability: row.get("dropout_probability"),
            risk_level: row.get("risk_level"),
            scored_at: row.get("scored_at"),
        });
    }

    Ok(history)
}
