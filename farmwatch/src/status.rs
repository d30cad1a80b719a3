//! Status bands for sensor values.
//!
//! Each sensor kind maps a reading onto a small set of labelled, coloured
//! buckets. Thresholds are agronomic constants and are kept as authored.

use crate::model::SensorKind;
use serde::Serialize;

pub const OPTIMAL_COLOR: &str = "#28a745";
pub const SUBOPTIMAL_COLOR: &str = "#ffc107";
pub const BAD_COLOR: &str = "#dc3545";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    pub label: &'static str,
    pub color: &'static str,
}

const fn status(label: &'static str, color: &'static str) -> Status {
    Status { label, color }
}

pub fn classify(kind: SensorKind, value: f64) -> Status {
    match kind {
        SensorKind::Ph => classify_ph(value),
        SensorKind::Ec => classify_ec(value),
        SensorKind::SoilMoisture => classify_soil_moisture(value),
        SensorKind::Temperature => classify_temperature(value),
        SensorKind::Uv => classify_uv(value),
    }
}

pub fn classify_ph(ph: f64) -> Status {
    if ph < 5.5 {
        status("Too Acidic", BAD_COLOR)
    } else if ph < 6.0 {
        status("Slightly Acidic", SUBOPTIMAL_COLOR)
    } else if ph <= 7.0 {
        status("Optimal", OPTIMAL_COLOR)
    } else if ph <= 7.5 {
        status("Slightly Alkaline", SUBOPTIMAL_COLOR)
    } else {
        status("Too Alkaline", BAD_COLOR)
    }
}

/// EC in mS/cm.
pub fn classify_ec(ec: f64) -> Status {
    if ec < 0.8 {
        status("Too Low", BAD_COLOR)
    } else if ec < 1.0 {
        status("Suboptimal", SUBOPTIMAL_COLOR)
    } else if ec <= 1.8 {
        status("Optimal", OPTIMAL_COLOR)
    } else if ec <= 2.0 {
        status("Suboptimal", SUBOPTIMAL_COLOR)
    } else {
        status("Too High", BAD_COLOR)
    }
}

/// Volumetric moisture in percent.
pub fn classify_soil_moisture(pct: f64) -> Status {
    if pct < 30.0 {
        status("Too Dry", BAD_COLOR)
    } else if pct < 40.0 {
        status("Slightly Dry", SUBOPTIMAL_COLOR)
    } else if pct <= 60.0 {
        status("Optimal", OPTIMAL_COLOR)
    } else if pct <= 70.0 {
        status("Slightly Wet", SUBOPTIMAL_COLOR)
    } else {
        status("Too Wet", BAD_COLOR)
    }
}

pub fn classify_temperature(celsius: f64) -> Status {
    if celsius < 15.0 {
        status("Too Cold", BAD_COLOR)
    } else if celsius < 18.0 {
        status("Cool", SUBOPTIMAL_COLOR)
    } else if celsius <= 30.0 {
        status("Optimal", OPTIMAL_COLOR)
    } else if celsius <= 35.0 {
        status("Warm", SUBOPTIMAL_COLOR)
    } else {
        status("Too Hot", BAD_COLOR)
    }
}

pub fn classify_uv(index: f64) -> Status {
    if index < 3.0 {
        status("Low", OPTIMAL_COLOR)
    } else if index < 6.0 {
        status("Moderate", SUBOPTIMAL_COLOR)
    } else if index < 8.0 {
        status("High", BAD_COLOR)
    } else {
        status("Very High", BAD_COLOR)
    }
}
