//! Signal conditioning for the analog probes on the field board.

/// 10-bit ADC against a 5 V reference.
pub const ADC_STEPS: f64 = 1024.0;
pub const ADC_REF_VOLTS: f64 = 5.0;

/// EC10 probe front end.
pub const EC_RES2: f64 = 820.0;
pub const EC_REF: f64 = 200.0;
pub const EC_TEMP_COEFFICIENT: f64 = 0.0185;

/// Samples kept by the pH averager.
pub const PH_WINDOW: usize = 40;

pub fn adc_to_volts(raw: i32) -> f64 {
    f64::from(raw) * ADC_REF_VOLTS / ADC_STEPS
}

pub fn adc_to_millivolts(raw: i32) -> f64 {
    adc_to_volts(raw) * 1000.0
}

/// Mean with the single smallest and largest sample dropped. Fewer than five
/// samples are averaged as-is; an empty slice averages to zero.
pub fn trimmed_mean(samples: &[i32]) -> f64 {
    let n = samples.len();
    if n == 0 {
        return 0.0;
    }

    let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();
    if n < 5 {
        return sum as f64 / n as f64;
    }

    let min = samples.iter().copied().min().unwrap_or_default();
    let max = samples.iter().copied().max().unwrap_or_default();
    (sum - i64::from(min) - i64::from(max)) as f64 / (n - 2) as f64
}

pub fn ph_from_volts(volts: f64, offset: f64) -> f64 {
    3.5 * volts + offset
}

/// EC in mS/cm from the probe voltage in millivolts, compensated to 25 °C.
pub fn ec_from_millivolts(millivolts: f64, temperature_c: f64, k_value: f64) -> f64 {
    let raw = 1000.0 * millivolts / EC_RES2 / EC_REF;
    raw * k_value / (1.0 + EC_TEMP_COEFFICIENT * (temperature_c - 25.0))
}

/// Raw capacitive readings in dry air and in water.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoilCalibration {
    pub air: i32,
    pub water: i32,
}

impl Default for SoilCalibration {
    fn default() -> Self {
        Self { air: 570, water: 0 }
    }
}

/// Maps a raw reading linearly from `air → 0 %` to `water → 100 %`, clamped.
pub fn soil_moisture_percent(raw: f64, cal: SoilCalibration) -> f64 {
    let span = f64::from(cal.water - cal.air);
    if span == 0.0 {
        return 0.0;
    }
    ((raw - f64::from(cal.air)) * 100.0 / span).clamp(0.0, 100.0)
}

/// Ring buffer of raw pH samples.
#[derive(Debug, Clone)]
pub struct PhAverager {
    samples: Vec<i32>,
    next: usize,
    offset: f64,
}

impl PhAverager {
    pub fn new(offset: f64) -> Self {
        Self {
            samples: Vec::with_capacity(PH_WINDOW),
            next: 0,
            offset,
        }
    }

    pub fn push(&mut self, raw: i32) {
        if self.samples.len() < PH_WINDOW {
            self.samples.push(raw);
        } else {
            self.samples[self.next] = raw;
        }
        self.next = (self.next + 1) % PH_WINDOW;
    }

    pub fn ph(&self) -> f64 {
        ph_from_volts(trimmed_mean(&self.samples) * ADC_REF_VOLTS / ADC_STEPS, self.offset)
    }
}
