use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Ph,
    Ec,
    SoilMoisture,
    Temperature,
}

/// Payload published on `farm/sensor_data/{sensor_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldReading {
    pub sensor_id: Uuid,
    pub kind: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn topic(sensor_id: Uuid) -> String {
    format!("farm/sensor_data/{}", sensor_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let id = Uuid::new_v4();
        let reading = FieldReading {
            sensor_id: id,
            kind: SensorKind::SoilMoisture,
            value: 42.0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["kind"], "soil_moisture");
        assert_eq!(json["sensor_id"], id.to_string());
        assert_eq!(topic(id), format!("farm/sensor_data/{}", id));
    }
}
