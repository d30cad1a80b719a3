//! Chart shaping for sensor time series.
//!
//! Turns a window of readings into pixel-space points and segments. Segments
//! carry length and angle so a renderer without a line primitive can draw
//! each one as a rotated rectangle.

use crate::model::{SensorKind, SensorReading};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use std::f64::consts::TAU;

/// Half-width of the value domain used when every reading is identical.
const FLAT_DOMAIN_PADDING: f64 = 0.5;

/// Number of points in a synthetic fallback series.
pub const SYNTHETIC_POINTS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub duration: Duration,
}

impl TimeWindow {
    pub fn ending_at(end: DateTime<Utc>, hours: i64) -> Self {
        let duration = Duration::hours(hours.max(0));
        Self {
            start: end - duration,
            duration,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }

    /// Position of `ts` in the window as a fraction clamped to `[0, 1]`.
    fn fraction(&self, ts: DateTime<Utc>) -> f64 {
        let total = self.duration.num_milliseconds() as f64;
        if total <= 0.0 {
            return 0.0;
        }
        let offset = (ts - self.start).num_milliseconds() as f64;
        (offset / total).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub length: f64,
    /// Radians, measured from the positive x axis.
    pub angle: f64,
}

impl Segment {
    fn between(a: &ChartPoint, b: &ChartPoint) -> Self {
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        Self {
            from: (a.x, a.y),
            to: (b.x, b.y),
            length: dx.hypot(dy),
            angle: dy.atan2(dx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartGeometry {
    pub min: f64,
    pub max: f64,
    pub width: f64,
    pub height: f64,
    pub points: Vec<ChartPoint>,
    pub segments: Vec<Segment>,
    /// Set when the series was generated locally because the query was empty.
    pub synthetic: bool,
}

/// Computes the value domain, substituting a fixed range around a flat series.
pub fn domain(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;

    if max == min {
        Some((min - FLAT_DOMAIN_PADDING, max + FLAT_DOMAIN_PADDING))
    } else {
        Some((min, max))
    }
}

/// Shapes real readings. Non-finite values are skipped; readings outside the
/// window are clamped to its edges.
pub fn shape(readings: &[SensorReading], window: TimeWindow, width: f64, height: f64) -> ChartGeometry {
    let width = sanitize_extent(width);
    let height = sanitize_extent(height);

    let mut usable: Vec<&SensorReading> = readings.iter().filter(|r| r.value.is_finite()).collect();
    usable.sort_by_key(|r| r.timestamp);

    let Some((min, max)) = domain(usable.iter().map(|r| r.value)) else {
        return ChartGeometry {
            min: 0.0,
            max: 0.0,
            width,
            height,
            points: Vec::new(),
            segments: Vec::new(),
            synthetic: false,
        };
    };

    let span = max - min;
    let points: Vec<ChartPoint> = usable
        .iter()
        .map(|r| ChartPoint {
            x: window.fraction(r.timestamp) * width,
            y: (r.value - min) / span * height,
            value: r.value,
            timestamp: r.timestamp,
        })
        .collect();

    let segments = points.windows(2).map(|w| Segment::between(&w[0], &w[1])).collect();

    ChartGeometry {
        min,
        max,
        width,
        height,
        points,
        segments,
        synthetic: false,
    }
}

/// Shapes `readings`, or a synthetic series for `kind` when none of them are
/// finite.
pub fn shape_or_synthetic(
    readings: &[SensorReading],
    kind: SensorKind,
    window: TimeWindow,
    width: f64,
    height: f64,
    rng: &mut impl Rng,
) -> ChartGeometry {
    if readings.iter().any(|r| r.value.is_finite()) {
        return shape(readings, window, width, height);
    }

    let fallback = synthetic_readings(kind, window, rng);
    ChartGeometry {
        synthetic: true,
        ..shape(&fallback, window, width, height)
    }
}

/// Plausible value range for a placeholder series of each kind.
pub fn synthetic_range(kind: SensorKind) -> (f64, f64) {
    match kind {
        SensorKind::Ph => (5.8, 7.2),
        SensorKind::Ec => (0.9, 1.9),
        SensorKind::SoilMoisture => (35.0, 65.0),
        SensorKind::Temperature => (18.0, 32.0),
        SensorKind::Uv => (0.0, 8.0),
    }
}

/// A day-cycle shaped series with jitter, evenly spaced across the window.
pub fn synthetic_readings(kind: SensorKind, window: TimeWindow, rng: &mut impl Rng) -> Vec<SensorReading> {
    let (lo, hi) = synthetic_range(kind);
    let mid = (lo + hi) / 2.0;
    let amplitude = (hi - lo) / 3.0;
    let jitter = (hi - lo) / 10.0;
    let total_ms = window.duration.num_milliseconds();
    let last = (SYNTHETIC_POINTS as i64 - 1).max(1);

    (0..SYNTHETIC_POINTS)
        .map(|i| {
            let phase = i as f64 / SYNTHETIC_POINTS as f64 * TAU;
            let noise = rng.gen_range(-jitter..=jitter);
            SensorReading {
                value: (mid + amplitude * phase.sin() + noise).clamp(lo, hi),
                timestamp: window.start + Duration::milliseconds(total_ms * i as i64 / last),
            }
        })
        .collect()
}

fn sanitize_extent(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}
