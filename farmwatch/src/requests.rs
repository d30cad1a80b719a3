//! Farm and sensor requests that an administrator approves or rejects.
//!
//! Every state change writes a row the affected user sees (an activity entry
//! for the requester, a notification for the owner on review) in the same
//! transaction, and announces it on that user's push topic once committed so
//! their counters update live.

use crate::db;
use crate::errors::{Error, Result};
use crate::model::{Farm, FarmId, RequestStatus, Sensor, SensorId, SensorKind, UserId};
use crate::mqtt::PushPublisher;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReviewTarget {
    Farm(FarmId),
    Sensor(SensorId),
}

impl ReviewTarget {
    fn noun(self) -> &'static str {
        match self {
            ReviewTarget::Farm(_) => "farm",
            ReviewTarget::Sensor(_) => "sensor",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingRequests {
    pub farms: Vec<Farm>,
    pub sensors: Vec<Sensor>,
}

pub async fn request_farm(
    pool: &PgPool,
    publisher: &PushPublisher,
    user: UserId,
    name: &str,
    location: &str,
    notes: &str,
) -> Result<Farm> {
    let name = required(name, "farm name")?;
    let mut tx = pool.begin().await?;
    let farm = db::insert_farm(&mut *tx, user, name, location.trim(), notes.trim()).await?;
    let details = format!("Requested farm \"{}\"", farm.name);
    let entry = db::insert_activity(&mut *tx, user, "farm_requested", &details).await?;
    tx.commit().await?;
    info!("Farm {} requested by {}", farm.id, user);

    if let Err(e) = publisher.activity(&entry).await {
        warn!("Failed to announce activity {}: {}", entry.id, e);
    }
    Ok(farm)
}

pub async fn request_sensor(
    pool: &PgPool,
    publisher: &PushPublisher,
    user: UserId,
    farm: FarmId,
    name: &str,
    kind: SensorKind,
) -> Result<Sensor> {
    let name = required(name, "sensor name")?;
    match db::farm_by_id(pool, farm).await? {
        Some(f) if f.owner_id == user => {}
        Some(_) => return Err(Error::Forbidden(format!("farm {} belongs to another user", farm))),
        None => return Err(Error::NotFound(format!("farm {}", farm))),
    }

    let mut tx = pool.begin().await?;
    let sensor = db::insert_sensor(&mut *tx, user, farm, name, kind).await?;
    let details = format!("Requested {} sensor \"{}\"", kind.display_name(), sensor.name);
    let entry = db::insert_activity(&mut *tx, user, "sensor_requested", &details).await?;
    tx.commit().await?;
    info!("Sensor {} ({}) requested by {}", sensor.id, kind, user);

    if let Err(e) = publisher.activity(&entry).await {
        warn!("Failed to announce activity {}: {}", entry.id, e);
    }
    Ok(sensor)
}

pub async fn list_pending(pool: &PgPool, admin: UserId) -> Result<PendingRequests> {
    ensure_admin(pool, admin).await?;
    Ok(PendingRequests {
        farms: db::pending_farms(pool).await?,
        sensors: db::pending_sensors(pool).await?,
    })
}

pub async fn review(
    pool: &PgPool,
    publisher: &PushPublisher,
    admin: UserId,
    target: ReviewTarget,
    approve: bool,
) -> Result<RequestStatus> {
    ensure_admin(pool, admin).await?;

    let status = if approve {
        RequestStatus::Approved
    } else {
        RequestStatus::Rejected
    };
    let mut tx = pool.begin().await?;
    let owner = match target {
        ReviewTarget::Farm(id) => db::set_farm_status(&mut *tx, id, status).await?,
        ReviewTarget::Sensor(id) => db::set_sensor_status(&mut *tx, id, status).await?,
    };
    let (title, message) = review_message(target, status);
    let notification = db::insert_notification(&mut *tx, owner, &title, &message).await?;
    tx.commit().await?;
    info!("{:?} {} by {}", target, status.as_str(), admin);

    if let Err(e) = publisher.notification(&notification).await {
        warn!("Failed to announce notification {}: {}", notification.id, e);
    }
    Ok(status)
}

fn review_message(target: ReviewTarget, status: RequestStatus) -> (String, String) {
    let noun = target.noun();
    match status {
        RequestStatus::Approved => (
            format!("{}{} approved", noun[..1].to_uppercase(), &noun[1..]),
            format!("Your {} request has been approved.", noun),
        ),
        _ => (
            format!("{}{} request declined", noun[..1].to_uppercase(), &noun[1..]),
            format!("Your {} request was not approved.", noun),
        ),
    }
}

async fn ensure_admin(pool: &PgPool, user: UserId) -> Result<()> {
    match db::profile_by_id(pool, user).await? {
        Some(profile) if profile.is_admin => Ok(()),
        _ => Err(Error::Forbidden(format!("{} is not an administrator", user))),
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(value)
}
