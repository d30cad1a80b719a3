//! Request and review writes against a live Postgres, each test in its own
//! scratch schema. Run with `DATABASE_URL=... cargo test --test requests -- --ignored`.

use farmwatch::errors::Error;
use farmwatch::model::{RequestStatus, UserId};
use farmwatch::mqtt::PushPublisher;
use farmwatch::requests::{self, ReviewTarget};
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use uuid::Uuid;

struct Scratch {
    admin: PgPool,
    schema: String,
    pool: PgPool,
    publisher: PushPublisher,
    // Publishes only need to be queued, so the loop is never polled.
    _eventloop: EventLoop,
}

impl Scratch {
    async fn new() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let schema = format!("farmwatch_test_{}", Uuid::new_v4().simple());

        let admin = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .unwrap();

        let options = PgConnectOptions::from_str(&url)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let (client, eventloop) = AsyncClient::new(MqttOptions::new("farmwatch-requests-test", "localhost", 1883), 16);
        Self {
            admin,
            schema,
            pool,
            publisher: PushPublisher::new(client),
            _eventloop: eventloop,
        }
    }

    async fn reject_inserts_into(&self, table: &str) {
        sqlx::query(
            "CREATE FUNCTION reject_insert() RETURNS trigger AS $$
             BEGIN RAISE EXCEPTION 'insert rejected'; END
             $$ LANGUAGE plpgsql",
        )
        .execute(&self.pool)
        .await
        .unwrap();
        sqlx::query(&format!(
            "CREATE TRIGGER reject_insert BEFORE INSERT ON {} FOR EACH ROW EXECUTE FUNCTION reject_insert()",
            table
        ))
        .execute(&self.pool)
        .await
        .unwrap();
    }

    async fn add_admin(&self) -> UserId {
        let admin = UserId::new();
        sqlx::query("INSERT INTO profiles (id, is_admin) VALUES ($1, TRUE)")
            .bind(admin)
            .execute(&self.pool)
            .await
            .unwrap();
        admin
    }

    async fn teardown(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn test_farm_request_is_not_kept_without_its_activity_entry() {
    let db = Scratch::new().await;
    db.reject_inserts_into("activity_logs").await;
    let user = UserId::new();

    let result = requests::request_farm(&db.pool, &db.publisher, user, "North field", "", "").await;
    assert!(matches!(result, Err(Error::Database(_))));

    let farms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM farms WHERE owner_id = $1")
        .bind(user)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(farms, 0);
    db.teardown().await;
}

#[tokio::test]
#[ignore]
async fn test_review_stays_pending_when_owner_cannot_be_notified() {
    let db = Scratch::new().await;
    let admin = db.add_admin().await;
    let owner = UserId::new();
    let farm = requests::request_farm(&db.pool, &db.publisher, owner, "North field", "", "")
        .await
        .unwrap();

    db.reject_inserts_into("notifications").await;
    let result = requests::review(&db.pool, &db.publisher, admin, ReviewTarget::Farm(farm.id), true).await;
    assert!(matches!(result, Err(Error::Database(_))));

    let status: String = sqlx::query_scalar("SELECT status FROM farms WHERE id = $1")
        .bind(farm.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(status, RequestStatus::Pending.as_str());
    db.teardown().await;
}

#[tokio::test]
#[ignore]
async fn test_review_writes_status_and_notification_together() {
    let db = Scratch::new().await;
    let admin = db.add_admin().await;
    let owner = UserId::new();
    let farm = requests::request_farm(&db.pool, &db.publisher, owner, "North field", "", "")
        .await
        .unwrap();

    let status = requests::review(&db.pool, &db.publisher, admin, ReviewTarget::Farm(farm.id), false)
        .await
        .unwrap();
    assert_eq!(status, RequestStatus::Rejected);

    let notified: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
        .bind(owner)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(notified, 1);

    let activity: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_logs WHERE user_id = $1")
        .bind(owner)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(activity, 1);
    db.teardown().await;
}
