//! Integration tests against the real SQLite mirror of the schema,
//! exercising the migration-level constraints (filtered unique indexes)
//! the Postgres repositories rely on but cannot be asserted via the
//! `unreachable_pool` unit tests.

mod support;

use support::sqlite::{seed_event, setup_test_db};

#[tokio::test]
async fn event_insert_is_idempotent_on_duplicate_id() {
    let db = setup_test_db().await.expect("test db");

    seed_event(&db.pool, "evt-1", "2026-01-01T00:00:00Z", "motion", serde_json::json!({"room": "kitchen"}))
        .await
        .expect("first insert");

    let result = seed_event(&db.pool, "evt-1", "2026-01-01T00:00:01Z", "door", serde_json::json!({"room": "hallway"}))
        .await;

    assert!(result.is_err(), "duplicate primary key must be rejected");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&db.pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn only_one_active_anomaly_episode_per_room() {
    let db = setup_test_db().await.expect("test db");

    let insert = |id: &'static str, end_ts: Option<&'static str>| {
        let pool = db.pool.clone();
        async move {
            sqlx::query(
                r#"
                INSERT INTO anomaly_episodes
                    (anomaly_episode_id, room, start_ts, end_ts, level, score_total, score_intensity,
                     score_sequence, score_event, peak_bucket, peak_score, reasons_peak, reasons_last,
                     start_bucket, last_bucket, bucket_count, green_streak, closed_reason)
                VALUES (?1, 'kitchen', '2026-01-01T00:00:00Z', ?2, 'YELLOW', 2.0, 1.0, 0.5, 0.5,
                        '2026-01-01T00:15:00Z', 2.0, '[]', '[]', '2026-01-01T00:00:00Z',
                        '2026-01-01T00:15:00Z', 1, 0, NULL)
                "#,
            )
            .bind(id)
            .bind(end_ts)
            .execute(&pool)
            .await
        }
    };

    insert("11111111-1111-1111-1111-111111111111", None)
        .await
        .expect("first active episode inserts");

    let second = insert("22222222-2222-2222-2222-222222222222", None).await;
    assert!(second.is_err(), "a second active episode for the same room must violate the filtered unique index");

    insert("33333333-3333-3333-3333-333333333333", Some("2026-01-01T00:30:00Z"))
        .await
        .expect("a closed episode for the same room does not conflict");
}

#[tokio::test]
async fn proposal_dedupe_key_is_unique_only_among_non_terminal_states() {
    let db = setup_test_db().await.expect("test db");

    let insert = |id: &'static str, state: &'static str| {
        let pool = db.pool.clone();
        async move {
            sqlx::query(
                r#"
                INSERT INTO proposals
                    (proposal_id, org_id, subject_id, proposal_type, dedupe_key, room_id, state, priority,
                     action_target, evidence, why, window_start, window_end, first_detected_at,
                     last_detected_at)
                VALUES (?1, 'default', 'default', 'NIGHT_ACTIVITY_FREQUENT_4_OF_7', 'room:kitchen',
                        'kitchen', ?2, 60, 'monitor:R-001', '{}', '[]', '2026-01-01T00:00:00Z',
                        '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')
                "#,
            )
            .bind(id)
            .bind(state)
            .execute(&pool)
            .await
        }
    };

    insert("11111111-1111-1111-1111-111111111111", "NEW")
        .await
        .expect("first NEW proposal inserts");

    let second = insert("22222222-2222-2222-2222-222222222222", "TESTING").await;
    assert!(second.is_err(), "a second non-terminal proposal for the same dedupe key must conflict");

    insert("33333333-3333-3333-3333-333333333333", "REJECTED")
        .await
        .expect("a rejected row with the same dedupe key does not conflict");
}
