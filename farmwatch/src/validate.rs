use crate::errors::{Error, Result};
use crate::model::{FieldReading, SensorKind};
use chrono::{Duration, Utc};

/// How far ahead of the server clock a field node's timestamp may be.
const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Physically plausible range for each sensor kind.
pub fn accepted_range(kind: SensorKind) -> (f64, f64) {
    match kind {
        SensorKind::Ph => (0.0, 14.0),
        SensorKind::Ec => (0.0, 20.0),
        SensorKind::SoilMoisture => (0.0, 100.0),
        SensorKind::Temperature => (-50.0, 100.0),
        SensorKind::Uv => (0.0, 20.0),
    }
}

/// Validates a reading published by a field node.
pub fn validate(reading: &FieldReading) -> Result<()> {
    if !reading.value.is_finite() {
        return Err(Error::Validation(format!(
            "{} value is not a finite number",
            reading.kind
        )));
    }

    let (min, max) = accepted_range(reading.kind);
    if reading.value < min || reading.value > max {
        return Err(Error::Validation(format!(
            "{} value {} out of range [{}, {}]",
            reading.kind, reading.value, min, max
        )));
    }

    if reading.timestamp > Utc::now() + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(Error::Validation(format!(
            "timestamp {} is in the future",
            reading.timestamp
        )));
    }

    Ok(())
}
