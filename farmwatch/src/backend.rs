//! Read/write surface the live session and demo gate need from the hosted
//! store. `PgBackend` is the production implementation; tests provide their
//! own in-memory one.

use crate::counters::CounterKind;
use crate::db;
use crate::errors::Result;
use crate::model::{SensorId, SensorReading, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn count_unread_notifications(&self, user: UserId) -> Result<u64>;

    async fn count_unviewed_activity(&self, user: UserId) -> Result<u64>;

    async fn mark_notifications_read(&self, user: UserId) -> Result<()>;

    async fn mark_activity_viewed(&self, user: UserId) -> Result<()>;

    async fn has_farms_or_sensors(&self, user: UserId) -> Result<bool>;

    async fn sensor_readings_since(&self, sensor: SensorId, since: DateTime<Utc>) -> Result<Vec<SensorReading>>;

    async fn count(&self, kind: CounterKind, user: UserId) -> Result<u64> {
        match kind {
            CounterKind::Notifications => self.count_unread_notifications(user).await,
            CounterKind::Activity => self.count_unviewed_activity(user).await,
        }
    }

    async fn mark_seen(&self, kind: CounterKind, user: UserId) -> Result<()> {
        match kind {
            CounterKind::Notifications => self.mark_notifications_read(user).await,
            CounterKind::Activity => self.mark_activity_viewed(user).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn count_unread_notifications(&self, user: UserId) -> Result<u64> {
        db::count_unread_notifications(&self.pool, user).await
    }

    async fn count_unviewed_activity(&self, user: UserId) -> Result<u64> {
        db::count_unviewed_activity(&self.pool, user).await
    }

    async fn mark_notifications_read(&self, user: UserId) -> Result<()> {
        db::mark_notifications_read(&self.pool, user).await.map(|_| ())
    }

    async fn mark_activity_viewed(&self, user: UserId) -> Result<()> {
        db::mark_activity_viewed(&self.pool, user).await.map(|_| ())
    }

    async fn has_farms_or_sensors(&self, user: UserId) -> Result<bool> {
        db::has_farms_or_sensors(&self.pool, user).await
    }

    async fn sensor_readings_since(&self, sensor: SensorId, since: DateTime<Utc>) -> Result<Vec<SensorReading>> {
        db::sensor_readings_since(&self.pool, sensor, since).await
    }
}
