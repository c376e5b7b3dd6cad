//! Database integration tests for the registry state machine and pending
//! command closure.
//!
//! These run only when TEST_DATABASE_URL (or DATABASE_URL) points at a
//! Postgres instance; otherwise each test is a silent pass so the suite
//! stays green without infrastructure.

use chrono::{Duration, Utc};
use comradarr::db::{NewConnector, PgStores};
use comradarr::pending::{CommandStatus, SearchResolution};
use comradarr::registry::{SearchState, SearchType};
use comradarr::upstream::{ConnectorKind, EpisodeResource};
use sqlx::PgPool;
use uuid::Uuid;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    sqlx::migrate!("./migrations").run(&pool).await.ok()?;
    Some(pool)
}

struct Fixture {
    stores: PgStores,
    connector_id: i64,
    content_id: i64,
}

impl Fixture {
    async fn new(pool: PgPool) -> Fixture {
        let stores = PgStores::new(pool);
        let suffix = &Uuid::new_v4().to_string()[..8];

        let connector = stores
            .connectors
            .create(NewConnector {
                kind: ConnectorKind::Sonarr,
                name: format!("test_{suffix}"),
                base_url: format!("http://sonarr-{suffix}.test:8989"),
                api_key_cipher: "key".into(),
                enabled: true,
                throttle_profile_id: None,
            })
            .await
            .expect("create connector");

        let content_id = stores
            .content
            .upsert_episode(
                connector.id,
                &EpisodeResource {
                    id: 1001,
                    series_id: 10,
                    season_number: 1,
                    episode_number: 1,
                    title: Some("Pilot".into()),
                    air_date_utc: Some(Utc::now() - Duration::days(30)),
                    monitored: true,
                    has_file: false,
                    quality_cutoff_not_met: false,
                },
                Utc::now(),
            )
            .await
            .expect("upsert episode");

        Fixture {
            stores,
            connector_id: connector.id,
            content_id,
        }
    }

    /// Deleting the connector cascades everything this fixture created.
    async fn cleanup(self) {
        let _ = self.stores.connectors.delete(self.connector_id).await;
    }
}

#[tokio::test]
async fn registry_lifecycle_round_trip() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: no TEST_DATABASE_URL");
        return;
    };
    let fixture = Fixture::new(pool).await;
    let stores = &fixture.stores;

    // Discovery creates the row once; re-running is a no-op.
    assert!(stores
        .registry
        .ensure(fixture.connector_id, fixture.content_id, SearchType::Gap)
        .await
        .unwrap());
    assert!(!stores
        .registry
        .ensure(fixture.connector_id, fixture.content_id, SearchType::Gap)
        .await
        .unwrap());

    let rows = stores
        .registry
        .eligible(&[fixture.connector_id], Utc::now())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let entry = &rows[0];
    assert_eq!(entry.state, SearchState::Pending);

    // pending -> queued -> searching (+ pending command, same transaction).
    assert!(stores.registry.mark_queued(entry.id).await.unwrap());
    // Guarded transition: a second picker loses.
    assert!(!stores.registry.mark_queued(entry.id).await.unwrap());

    let pending_id = stores
        .registry
        .dispatch(
            entry.id,
            fixture.connector_id,
            fixture.content_id,
            SearchType::Gap,
            555,
        )
        .await
        .unwrap()
        .expect("dispatch creates a pending command");

    let command = stores.pending.get(pending_id).await.unwrap().unwrap();
    assert!(command.is_open());
    assert_eq!(command.registry_id, Some(entry.id));
    assert!(stores
        .pending
        .has_open_for_content(fixture.content_id)
        .await
        .unwrap());

    // No-results outcome: attempt counted, row in cooldown.
    stores
        .pending
        .resolve(
            pending_id,
            entry.id,
            CommandStatus::Completed,
            SearchResolution::Retry {
                next_eligible_at: Utc::now() + Duration::hours(1),
                error: Some("no results".into()),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    let entry = stores.registry.get(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.state, SearchState::Cooldown);
    assert_eq!(entry.attempt_count, 1);
    assert!(!stores
        .pending
        .has_open_for_content(fixture.content_id)
        .await
        .unwrap());

    // Elapsed cooldown promotes back to pending.
    stores
        .registry
        .promote_elapsed_cooldowns(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    let entry = stores.registry.get(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.state, SearchState::Pending);

    // User clear resets the attempt budget from any state.
    assert!(stores.registry.clear(entry.id).await.unwrap());
    let entry = stores.registry.get(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.attempt_count, 0);
    assert!(entry.next_eligible_at.is_none());

    fixture.cleanup().await;
}

#[tokio::test]
async fn acquired_outcome_deletes_registry_row() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: no TEST_DATABASE_URL");
        return;
    };
    let fixture = Fixture::new(pool).await;
    let stores = &fixture.stores;

    stores
        .registry
        .ensure(fixture.connector_id, fixture.content_id, SearchType::Gap)
        .await
        .unwrap();
    let entry = stores
        .registry
        .eligible(&[fixture.connector_id], Utc::now())
        .await
        .unwrap()
        .remove(0);

    stores.registry.mark_queued(entry.id).await.unwrap();
    let pending_id = stores
        .registry
        .dispatch(
            entry.id,
            fixture.connector_id,
            fixture.content_id,
            SearchType::Gap,
            777,
        )
        .await
        .unwrap()
        .unwrap();

    stores
        .pending
        .resolve(
            pending_id,
            entry.id,
            CommandStatus::Completed,
            SearchResolution::Acquired,
            Utc::now(),
        )
        .await
        .unwrap();

    // Success is terminal: the intent row is gone, the closed command
    // keeps its history with a detached registry reference.
    assert!(stores.registry.get(entry.id).await.unwrap().is_none());
    let command = stores.pending.get(pending_id).await.unwrap().unwrap();
    assert!(!command.is_open());
    assert_eq!(command.file_acquired, Some(true));
    assert_eq!(command.registry_id, None);

    fixture.cleanup().await;
}

#[tokio::test]
async fn mark_exhausted_refused_while_searching() {
    let Some(pool) = test_pool().await else {
        eprintln!("skipping: no TEST_DATABASE_URL");
        return;
    };
    let fixture = Fixture::new(pool).await;
    let stores = &fixture.stores;

    stores
        .registry
        .ensure(fixture.connector_id, fixture.content_id, SearchType::Upgrade)
        .await
        .unwrap();
    let entry = stores
        .registry
        .eligible(&[fixture.connector_id], Utc::now())
        .await
        .unwrap()
        .remove(0);

    stores.registry.mark_queued(entry.id).await.unwrap();
    stores
        .registry
        .dispatch(
            entry.id,
            fixture.connector_id,
            fixture.content_id,
            SearchType::Upgrade,
            888,
        )
        .await
        .unwrap()
        .unwrap();

    // Searching rows refuse the user's "mark exhausted".
    assert!(!stores.registry.mark_exhausted(entry.id).await.unwrap());
    let still = stores.registry.get(entry.id).await.unwrap().unwrap();
    assert_eq!(still.state, SearchState::Searching);

    fixture.cleanup().await;
}
