//! Emulated field board: three analog probes and an RS-485 pH probe.
//!
//! The board keeps a slowly drifting "true" environment and answers ADC reads
//! and Modbus requests the way the physical hardware would, including noise,
//! the odd spike and a probe that sometimes does not answer.

use crate::conditioning::{
    adc_to_millivolts, ec_from_millivolts, soil_moisture_percent, PhAverager, SoilCalibration, ADC_REF_VOLTS,
    ADC_STEPS, EC_REF, EC_RES2, EC_TEMP_COEFFICIENT,
};
use crate::modbus::{self, ModbusError, READ_HOLDING_REGISTERS, SLAVE_IDS};
use rand::Rng;
use tracing::{debug, warn};

const PH_SAMPLES: usize = 10;
const EC_SAMPLES: usize = 5;
const SOIL_SAMPLES: usize = 5;
const PROBE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogChannel {
    Ph,
    Ec,
    Soil,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub ph: f64,
    pub ec: f64,
    pub moisture: f64,
    pub temperature_c: f64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            ph: 6.5,
            ec: 1.4,
            moisture: 50.0,
            temperature_c: 24.0,
        }
    }
}

impl Environment {
    fn drift(&mut self, rng: &mut impl Rng) {
        self.ph = (self.ph + rng.gen_range(-0.05..0.05)).clamp(4.5, 8.5);
        self.ec = (self.ec + rng.gen_range(-0.03..0.03)).clamp(0.3, 3.0);
        self.moisture = (self.moisture + rng.gen_range(-1.0..1.0)).clamp(10.0, 90.0);
        self.temperature_c = (self.temperature_c + rng.gen_range(-0.3..0.3)).clamp(5.0, 40.0);
    }
}

pub struct SimulatedBoard<R> {
    rng: R,
    env: Environment,
    soil: SoilCalibration,
    ph_offset: f64,
    k_value: f64,
    /// Address the RS-485 probe answers to; `None` when unplugged.
    probe_slave: Option<u8>,
}

impl<R: Rng> SimulatedBoard<R> {
    pub fn new(rng: R, probe_slave: Option<u8>) -> Self {
        Self {
            rng,
            env: Environment::default(),
            soil: SoilCalibration::default(),
            ph_offset: 0.0,
            k_value: 1.0,
            probe_slave,
        }
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    pub fn drift(&mut self) {
        self.env.drift(&mut self.rng);
    }

    /// Raw 10-bit reading for `channel`, with noise and a 5% chance of a spike.
    pub fn analog_read(&mut self, channel: AnalogChannel) -> i32 {
        let raw = match channel {
            AnalogChannel::Ph => (self.env.ph - self.ph_offset) / 3.5 * ADC_STEPS / ADC_REF_VOLTS,
            AnalogChannel::Ec => {
                let compensation = 1.0 + EC_TEMP_COEFFICIENT * (self.env.temperature_c - 25.0);
                let millivolts = self.env.ec * compensation * EC_RES2 * EC_REF / 1000.0 / self.k_value;
                millivolts * ADC_STEPS / (ADC_REF_VOLTS * 1000.0)
            }
            AnalogChannel::Soil => {
                let span = f64::from(self.soil.air - self.soil.water);
                f64::from(self.soil.air) - self.env.moisture / 100.0 * span
            }
        };

        let noisy = if self.rng.gen_bool(0.05) {
            self.rng.gen_range(0.0..ADC_STEPS)
        } else {
            raw + self.rng.gen_range(-2.0..2.0)
        };
        (noisy.round() as i32).clamp(0, ADC_STEPS as i32 - 1)
    }

    /// One request/response exchange on the RS-485 bus.
    pub fn transact(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let slave = self.probe_slave?;
        if request.len() != 8 || request[0] != slave || request[1] != READ_HOLDING_REGISTERS {
            return None;
        }
        if modbus::crc16(&request[..6]).to_le_bytes() != [request[6], request[7]] {
            return None;
        }
        if self.rng.gen_bool(0.1) {
            return None;
        }

        let probe_ph = (self.env.ph + self.rng.gen_range(-0.05..0.05)).max(0.0);
        let [hi, lo] = ((probe_ph * 100.0).round() as u16).to_be_bytes();
        Some(modbus::with_crc(vec![slave, READ_HOLDING_REGISTERS, 0x02, hi, lo]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ph: f64,
    pub ec: f64,
    pub soil_moisture: f64,
    pub temperature_c: f64,
    pub probe_ph: Option<f64>,
}

/// Runs one collection cycle against a board.
pub struct FieldNode<R> {
    board: SimulatedBoard<R>,
    ph: PhAverager,
    slave: Option<u8>,
}

impl<R: Rng> FieldNode<R> {
    pub fn new(board: SimulatedBoard<R>) -> Self {
        Self {
            board,
            ph: PhAverager::new(0.0),
            slave: None,
        }
    }

    /// Finds the probe's address by polling each known slave id in turn.
    pub fn discover_probe(&mut self) -> Option<u8> {
        self.slave = SLAVE_IDS.into_iter().find(|&id| {
            let found = self.board.transact(&modbus::ph_request(id)).is_some();
            debug!("Probe slave {:#04x}: {}", id, if found { "answered" } else { "silent" });
            found
        });
        self.slave
    }

    fn read_probe(&mut self, slave: u8) -> Result<f64, ModbusError> {
        let mut last = ModbusError::Timeout;
        for attempt in 1..=PROBE_ATTEMPTS {
            match self.board.transact(&modbus::ph_request(slave)) {
                Some(frame) => match modbus::parse_ph_response(slave, &frame) {
                    Ok(ph) if ph > 0.0 => return Ok(ph),
                    Ok(_) => debug!("Probe returned zero pH (attempt {})", attempt),
                    Err(e) => {
                        debug!("Invalid probe frame (attempt {}): {}", attempt, e);
                        last = e;
                    }
                },
                None => last = ModbusError::Timeout,
            }
        }
        Err(last)
    }

    pub fn sample(&mut self) -> Sample {
        self.board.drift();
        let temperature_c = self.board.environment().temperature_c;

        let mut ph_sum = 0.0;
        for _ in 0..PH_SAMPLES {
            self.ph.push(self.board.analog_read(AnalogChannel::Ph));
            ph_sum += self.ph.ph();
        }
        let ph = ph_sum / PH_SAMPLES as f64;

        let ec = (0..EC_SAMPLES)
            .map(|_| {
                let mv = adc_to_millivolts(self.board.analog_read(AnalogChannel::Ec));
                ec_from_millivolts(mv, temperature_c, self.board.k_value)
            })
            .sum::<f64>()
            / EC_SAMPLES as f64;

        let soil_raw = (0..SOIL_SAMPLES)
            .map(|_| f64::from(self.board.analog_read(AnalogChannel::Soil)))
            .sum::<f64>()
            / SOIL_SAMPLES as f64;
        let soil_moisture = soil_moisture_percent(soil_raw, self.board.soil);

        let probe_ph = match self.slave {
            Some(slave) => match self.read_probe(slave) {
                Ok(ph) => Some(ph),
                Err(e) => {
                    warn!("Probe at {:#04x} failed: {}", slave, e);
                    None
                }
            },
            None => None,
        };

        Sample {
            ph,
            ec,
            soil_moisture,
            temperature_c,
            probe_ph,
        }
    }
}
