use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{
    ActivityLog, Farm, FarmId, FieldReading, Notification, Profile, RequestStatus, Sensor, SensorId,
    SensorKind, SensorReading, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Upper bound on rows returned for one chart window.
pub const MAX_WINDOW_READINGS: i64 = 2_000;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established, running migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

pub async fn count_unread_notifications(pool: &PgPool, user: UserId) -> Result<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read")
        .bind(user)
        .fetch_one(pool)
        .await?;
    Ok(n.max(0) as u64)
}

pub async fn count_unviewed_activity(pool: &PgPool, user: UserId) -> Result<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_logs WHERE user_id = $1 AND NOT viewed")
        .bind(user)
        .fetch_one(pool)
        .await?;
    Ok(n.max(0) as u64)
}

pub async fn mark_notifications_read(pool: &PgPool, user: UserId) -> Result<u64> {
    let done = sqlx::query("UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read")
        .bind(user)
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}

pub async fn mark_activity_viewed(pool: &PgPool, user: UserId) -> Result<u64> {
    let done = sqlx::query("UPDATE activity_logs SET viewed = TRUE WHERE user_id = $1 AND NOT viewed")
        .bind(user)
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}

pub async fn has_farms_or_sensors(pool: &PgPool, user: UserId) -> Result<bool> {
    let found: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM farms WHERE owner_id = $1)
             OR EXISTS (SELECT 1 FROM sensor WHERE owner_id = $1)",
    )
    .bind(user)
    .fetch_one(pool)
    .await?;
    Ok(found)
}

pub async fn sensor_readings_since(
    pool: &PgPool,
    sensor: SensorId,
    since: DateTime<Utc>,
) -> Result<Vec<SensorReading>> {
    let rows = sqlx::query_as::<_, SensorReading>(
        "SELECT value, recorded_at AS timestamp
         FROM sensor_data
         WHERE sensor_id = $1 AND recorded_at >= $2
         ORDER BY recorded_at ASC
         LIMIT $3",
    )
    .bind(sensor)
    .bind(since)
    .bind(MAX_WINDOW_READINGS)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn sensor_by_id(pool: &PgPool, sensor: SensorId) -> Result<Option<Sensor>> {
    let row = sqlx::query_as::<_, Sensor>(
        "SELECT id, farm_id, owner_id, name, kind, status FROM sensor WHERE id = $1",
    )
    .bind(sensor)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn farm_by_id(pool: &PgPool, farm: FarmId) -> Result<Option<Farm>> {
    let row = sqlx::query_as::<_, Farm>(
        "SELECT id, owner_id, name, location, notes, status FROM farms WHERE id = $1",
    )
    .bind(farm)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Most recent value of every sensor on `farm`.
pub async fn latest_farm_readings(pool: &PgPool, farm: FarmId) -> Result<Vec<(SensorKind, f64)>> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT DISTINCT ON (s.id) s.kind, d.value
         FROM sensor s
         JOIN sensor_data d ON d.sensor_id = s.id
         WHERE s.farm_id = $1
         ORDER BY s.id, d.recorded_at DESC",
    )
    .bind(farm)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(kind, value)| match kind.parse::<SensorKind>() {
            Ok(kind) => Some((kind, value)),
            Err(e) => {
                warn!("Skipping reading with {}", e);
                None
            }
        })
        .collect())
}

pub async fn profile_by_id(pool: &PgPool, user: UserId) -> Result<Option<Profile>> {
    let row = sqlx::query_as::<_, Profile>("SELECT id, display_name, is_admin FROM profiles WHERE id = $1")
        .bind(user)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// Request and review writes take a connection so callers can group them in
// one transaction.
pub async fn insert_farm(conn: &mut PgConnection, owner: UserId, name: &str, location: &str, notes: &str) -> Result<Farm> {
    let farm = sqlx::query_as::<_, Farm>(
        "INSERT INTO farms (id, owner_id, name, location, notes, status)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, owner_id, name, location, notes, status",
    )
    .bind(FarmId::new())
    .bind(owner)
    .bind(name)
    .bind(location)
    .bind(notes)
    .bind(RequestStatus::Pending.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(farm)
}

pub async fn insert_sensor(conn: &mut PgConnection, owner: UserId, farm: FarmId, name: &str, kind: SensorKind) -> Result<Sensor> {
    let sensor = sqlx::query_as::<_, Sensor>(
        "INSERT INTO sensor (id, farm_id, owner_id, name, kind, status)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, farm_id, owner_id, name, kind, status",
    )
    .bind(SensorId::new())
    .bind(farm)
    .bind(owner)
    .bind(name)
    .bind(kind.as_str())
    .bind(RequestStatus::Pending.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(sensor)
}

pub async fn pending_farms(pool: &PgPool) -> Result<Vec<Farm>> {
    let rows = sqlx::query_as::<_, Farm>(
        "SELECT id, owner_id, name, location, notes, status FROM farms WHERE status = $1 ORDER BY created_at",
    )
    .bind(RequestStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn pending_sensors(pool: &PgPool) -> Result<Vec<Sensor>> {
    let rows = sqlx::query_as::<_, Sensor>(
        "SELECT id, farm_id, owner_id, name, kind, status FROM sensor WHERE status = $1 ORDER BY created_at",
    )
    .bind(RequestStatus::Pending.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sets a pending farm's status and returns its owner.
pub async fn set_farm_status(conn: &mut PgConnection, farm: FarmId, status: RequestStatus) -> Result<UserId> {
    let owner: Option<UserId> =
        sqlx::query_scalar("UPDATE farms SET status = $2 WHERE id = $1 AND status = 'pending' RETURNING owner_id")
            .bind(farm)
            .bind(status.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    owner.ok_or_else(|| Error::NotFound(format!("pending farm {}", farm)))
}

/// Sets a pending sensor's status and returns its owner.
pub async fn set_sensor_status(conn: &mut PgConnection, sensor: SensorId, status: RequestStatus) -> Result<UserId> {
    let owner: Option<UserId> =
        sqlx::query_scalar("UPDATE sensor SET status = $2 WHERE id = $1 AND status = 'pending' RETURNING owner_id")
            .bind(sensor)
            .bind(status.as_str())
            .fetch_optional(&mut *conn)
            .await?;
    owner.ok_or_else(|| Error::NotFound(format!("pending sensor {}", sensor)))
}

pub async fn insert_notification(conn: &mut PgConnection, user: UserId, title: &str, message: &str) -> Result<Notification> {
    let row = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (id, user_id, title, message)
         VALUES ($1, $2, $3, $4)
         RETURNING id, user_id, title, message, is_read, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user)
    .bind(title)
    .bind(message)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn insert_activity(conn: &mut PgConnection, user: UserId, action: &str, details: &str) -> Result<ActivityLog> {
    let row = sqlx::query_as::<_, ActivityLog>(
        "INSERT INTO activity_logs (id, user_id, action, details)
         VALUES ($1, $2, $3, $4)
         RETURNING id, user_id, action, details, viewed, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(user)
    .bind(action)
    .bind(details)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// Writes a batch of field readings, retrying transient failures.
pub async fn insert_readings(pool: &PgPool, batch: &[FieldReading]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let max_attempts = 5;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match insert_readings_inner(pool, batch).await {
            Ok(()) => return Ok(()),
            Err(Error::Database(db_err)) if attempts < max_attempts && is_transient_error(&db_err) => {
                let wait_ms = 100 * 2_u64.pow(attempts - 1);
                warn!(
                    "Reading insert failed (attempt {}/{}), retrying in {}ms: {}",
                    attempts, max_attempts, wait_ms, db_err
                );
                DB_FAILURES_TOTAL.inc();
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(e) => {
                error!("Reading insert failed after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}

async fn insert_readings_inner(pool: &PgPool, batch: &[FieldReading]) -> Result<()> {
    let sensor_ids: Vec<Uuid> = batch.iter().map(|r| r.sensor_id.0).collect();
    let values: Vec<f64> = batch.iter().map(|r| r.value).collect();
    let timestamps: Vec<DateTime<Utc>> = batch.iter().map(|r| r.timestamp).collect();

    sqlx::query(
        "INSERT INTO sensor_data (sensor_id, value, recorded_at)
         SELECT * FROM UNNEST($1::uuid[], $2::float8[], $3::timestamptz[])
         ON CONFLICT (sensor_id, recorded_at) DO NOTHING",
    )
    .bind(&sensor_ids)
    .bind(&values)
    .bind(&timestamps)
    .execute(pool)
    .await?;

    Ok(())
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            // connection_exception family, cannot_connect_now, too_many_connections
            code.starts_with("08") || code == "57P03" || code == "53300"
        }),
        _ => false,
    }
}
