use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(UserId);
id_type!(SensorId);
id_type!(FarmId);

/// Kinds of sensor a farm can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ph,
    Ec,
    SoilMoisture,
    Temperature,
    Uv,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Ph,
        SensorKind::Ec,
        SensorKind::SoilMoisture,
        SensorKind::Temperature,
        SensorKind::Uv,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Ph => "ph",
            SensorKind::Ec => "ec",
            SensorKind::SoilMoisture => "soil_moisture",
            SensorKind::Temperature => "temperature",
            SensorKind::Uv => "uv",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SensorKind::Ph => "pH",
            SensorKind::Ec => "Electrical conductivity",
            SensorKind::SoilMoisture => "Soil moisture",
            SensorKind::Temperature => "Temperature",
            SensorKind::Uv => "UV index",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Ph => "",
            SensorKind::Ec => "mS/cm",
            SensorKind::SoilMoisture => "%",
            SensorKind::Temperature => "°C",
            SensorKind::Uv => "",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown sensor kind: {}", s))
    }
}

/// One sensor value as stored in `sensor_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Reading published by a field node on `farm/sensor_data/{sensor_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReading {
    pub sensor_id: SensorId,
    pub kind: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityLog {
    pub id: Uuid,
    pub user_id: UserId,
    pub action: String,
    pub details: String,
    pub viewed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Farm {
    pub id: FarmId,
    pub owner_id: UserId,
    pub name: String,
    pub location: String,
    pub notes: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: SensorId,
    pub farm_id: FarmId,
    pub owner_id: UserId,
    pub name: String,
    pub kind: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: UserId,
    pub display_name: String,
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_kind_round_trips_through_str() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.as_str().parse::<SensorKind>().unwrap(), kind);
        }
        assert!("humidity".parse::<SensorKind>().is_err());
    }

    #[test]
    fn test_reading_timestamp_is_iso8601() {
        let json = r#"{"value": 6.4, "timestamp": "2024-05-01T10:30:00Z"}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.value, 6.4);
        assert_eq!(reading.timestamp.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }
}
