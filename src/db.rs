use anyhow::Context;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cohort::{self, QUIZ_COMPLETED};
use crate::fields::FieldId;
use crate::models::{parse_study_stats, CohortInsights, EventRow, StudyStats, UserRow};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let learners = vec![
        (
            "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
            "avery.lee@educonnect.example",
            "Computing & IT",
            "Machine Learning, Web Development, Data Science",
            "statistics, linear algebra",
            "python",
            r#"{"totalHours": 14.5, "weeklyHours": [2, 0, 1.5, 0, 0, 3, 0],
                "fieldProgress": {"ml": {"quizScores": {"q1": 80}, "finalScore": 64, "proficiency": "Intermediate"},
                                  "web": {"quizScores": {"q1": 90, "q2": 75}, "finalScore": 88, "proficiency": "Advanced"}}}"#,
        ),
        (
            "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
            "jules.moreno@educonnect.example",
            "Law",
            "International Law, Business Ethics",
            "contracts",
            "writing, debate",
            r#"{"totalHours": 31, "weeklyHours": [1, 1, 0, 4, 0, 0, 2],
                "fieldProgress": {"law": {"quizScores": {"q1": 95}, "finalScore": 93, "proficiency": "Expert"}}}"#,
        ),
        (
            "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
            "kiara.patel@educonnect.example",
            "Business & Management",
            "Accounting, Marketing, Artificial Intelligence",
            "",
            "spreadsheets",
            r#"{"totalHours": 3, "weeklyHours": [0, 0, 0, 0, 0, 0, 0], "fieldProgress": {}}"#,
        ),
    ];

    for (id, email, course_area, interests, weak, strong, stats) in learners {
        sqlx::query(
            r#"
            INSERT INTO study_plan.users
            (id, email, role, course_area, ordered_interests, weak_topics, strong_topics, study_stats)
            VALUES ($1, $2, 'user', $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO UPDATE
            SET course_area = EXCLUDED.course_area,
                ordered_interests = EXCLUDED.ordered_interests,
                weak_topics = EXCLUDED.weak_topics,
                strong_topics = EXCLUDED.strong_topics,
                study_stats = EXCLUDED.study_stats
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(course_area)
        .bind(interests)
        .bind(weak)
        .bind(strong)
        .bind(stats)
        .execute(pool)
        .await?;
    }

    let events = vec![
        ("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2", r#"{"fieldId": "ml", "quizId": "q1", "score": 0.8}"#),
        ("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc", r#"{"fieldId": "law", "quizId": "final", "score": 0.93}"#),
    ];

    for (user_id, payload) in events {
        record_activity(pool, user_id, QUIZ_COMPLETED, Some(payload)).await?;
    }

    Ok(())
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRow {
    UserRow {
        id: row.get("id"),
        role: row.get("role"),
        course_area: row.get("course_area"),
        ordered_interests: row.get("ordered_interests"),
        weak_topics: row.get("weak_topics"),
        strong_topics: row.get("strong_topics"),
        study_stats: row.get("study_stats"),
    }
}

pub async fn fetch_learner(pool: &PgPool, user_id: &str) -> anyhow::Result<Option<UserRow>> {
    let row = sqlx::query(
        "SELECT id, role, course_area, ordered_interests, weak_topics, strong_topics, study_stats \
         FROM study_plan.users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(user_from_row))
}

pub async fn fetch_population(pool: &PgPool) -> anyhow::Result<Vec<UserRow>> {
    let rows = sqlx::query(
        "SELECT id, role, course_area, ordered_interests, weak_topics, strong_topics, study_stats \
         FROM study_plan.users WHERE role <> 'admin'",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(user_from_row).collect())
}

pub async fn fetch_events(pool: &PgPool, event_type: &str) -> anyhow::Result<Vec<EventRow>> {
    let rows = sqlx::query(
        "SELECT event_type, payload FROM study_plan.activity_events WHERE event_type = $1",
    )
    .bind(event_type)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| EventRow {
            event_type: row.get("event_type"),
            payload: row.get("payload"),
        })
        .collect())
}

/// Builds cohort insights from the current population. A failing event
/// query only drops the activity counts.
pub async fn load_cohort_insights(pool: &PgPool) -> anyhow::Result<CohortInsights> {
    let users = fetch_population(pool)
        .await
        .context("failed to read learner population")?;
    let events = match fetch_events(pool, QUIZ_COMPLETED).await {
        Ok(events) => Some(events),
        Err(err) => {
            warn!(error = %err, "activity events unavailable, skipping activity counts");
            None
        }
    };

    debug!(users = users.len(), "building cohort insights");
    Ok(cohort::build(&users, events.as_deref()))
}

pub async fn record_activity(
    pool: &PgPool,
    user_id: &str,
    event_type: &str,
    payload: Option<&str>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO study_plan.activity_events (id, user_id, event_type, payload)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(event_type)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Applies a result to a stored stats blob and returns the blob to write
/// back. An empty or `null` blob starts fresh; an unreadable one is refused.
fn apply_field_result(
    raw: Option<&str>,
    field: FieldId,
    quiz_id: &str,
    score: f64,
    is_final: bool,
    weekday: usize,
) -> anyhow::Result<(String, bool)> {
    let stored = raw.map(str::trim).filter(|text| !text.is_empty() && *text != "null");
    let mut stats = match stored {
        None => StudyStats::default(),
        Some(text) => parse_study_stats(Some(text))
            .context("stored study_stats is unreadable, refusing to overwrite it")?,
    };
    let credited = stats.record_field_result(field, quiz_id, score, is_final, weekday);
    Ok((serde_json::to_string(&stats)?, credited))
}

/// Applies a quiz or final result to the learner's stored stats and logs a
/// `quiz_completed` event. Returns whether study time was credited.
pub async fn record_quiz_result(
    pool: &PgPool,
    user_id: &str,
    field: FieldId,
    quiz_id: &str,
    score: f64,
    is_final: bool,
    weekday: usize,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT study_stats FROM study_plan.users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("no learner with id {user_id}"))?;

    let raw: Option<String> = row.get("study_stats");
    let (updated, credited) =
        apply_field_result(raw.as_deref(), field, quiz_id, score, is_final, weekday)
            .with_context(|| format!("cannot record result for learner {user_id}"))?;

    sqlx::query("UPDATE study_plan.users SET study_stats = $2 WHERE id = $1")
        .bind(user_id)
        .bind(updated)
        .execute(&mut *tx)
        .await?;

    let payload = serde_json::json!({
        "fieldId": field.as_str(),
        "quizId": quiz_id,
        "score": score,
        "isFinal": is_final,
    });
    sqlx::query(
        r#"
        INSERT INTO study_plan.activity_events (id, user_id, event_type, payload)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(QUIZ_COMPLETED)
    .bind(payload.to_string())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(credited)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        course_area: Option<String>,
        ordered_interests: Option<String>,
        weak_topics: Option<String>,
        strong_topics: Option<String>,
        study_stats: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let study_stats = row.study_stats.filter(|raw| !raw.trim().is_empty());
        if study_stats.is_some() && parse_study_stats(study_stats.as_deref()).is_none() {
            warn!(email = %row.email, "study_stats column is not valid JSON, storing it as-is");
        }

        let result = sqlx::query(
            r#"
            INSERT INTO study_plan.users
            (id, email, role, course_area, ordered_interests, weak_topics, strong_topics, study_stats)
            VALUES ($1, $2, 'user', $3, $4, $5, $6, $7)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.email)
        .bind(&row.course_area)
        .bind(&row.ordered_interests)
        .bind(&row.weak_topics)
        .bind(&row.strong_topics)
        .bind(&study_stats)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
