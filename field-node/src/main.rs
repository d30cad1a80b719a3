mod board;
mod conditioning;
mod modbus;
mod reading;

use board::{FieldNode, Sample, SimulatedBoard};
use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reading::{FieldReading, SensorKind};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Emulated field sensor board publishing readings over MQTT.
#[derive(Debug, Parser)]
#[command(name = "field-node", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Seconds between collection cycles.
    #[arg(long, env = "INTERVAL_SECS", default_value_t = 1800)]
    interval_secs: u64,

    #[arg(long, env = "PH_SENSOR_ID")]
    ph_sensor: Option<Uuid>,

    #[arg(long, env = "EC_SENSOR_ID")]
    ec_sensor: Option<Uuid>,

    #[arg(long, env = "SOIL_SENSOR_ID")]
    soil_sensor: Option<Uuid>,

    #[arg(long, env = "TEMPERATURE_SENSOR_ID")]
    temperature_sensor: Option<Uuid>,

    /// Sensor id for the RS-485 pH probe.
    #[arg(long, env = "PROBE_SENSOR_ID")]
    probe_sensor: Option<Uuid>,

    /// Address the emulated probe answers to.
    #[arg(long, env = "PROBE_SLAVE_ID", default_value_t = 0x02)]
    probe_slave: u8,

    #[arg(long, env = "SEED")]
    seed: Option<u64>,
}

impl Args {
    fn readings(&self, sample: &Sample) -> Vec<FieldReading> {
        let timestamp = Utc::now();
        [
            (self.ph_sensor, SensorKind::Ph, Some(sample.ph)),
            (self.ec_sensor, SensorKind::Ec, Some(sample.ec)),
            (self.soil_sensor, SensorKind::SoilMoisture, Some(sample.soil_moisture)),
            (self.temperature_sensor, SensorKind::Temperature, Some(sample.temperature_c)),
            (self.probe_sensor, SensorKind::Ph, sample.probe_ph),
        ]
        .into_iter()
        .filter_map(|(id, kind, value)| {
            Some(FieldReading {
                sensor_id: id?,
                kind,
                value: value?,
                timestamp,
            })
        })
        .collect()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("Starting field node");
    info!("Broker: {}:{}, interval: {}s", args.broker, args.port, args.interval_secs);

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut node = FieldNode::new(SimulatedBoard::new(rng, Some(args.probe_slave)));
    match node.discover_probe() {
        Some(id) => info!("pH probe responds at slave id {:#04x}", id),
        None => warn!("No pH probe response found, publishing analog readings only"),
    }

    let client_id = format!("field-node-{}", Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    loop {
        ticker.tick().await;

        let sample = node.sample();
        info!(
            "pH {:.2}, EC {:.3} mS/cm, soil {:.0}%, {:.1} °C, probe pH {}",
            sample.ph,
            sample.ec,
            sample.soil_moisture,
            sample.temperature_c,
            sample.probe_ph.map_or("n/a".to_string(), |p| format!("{:.2}", p))
        );

        for reading in args.readings(&sample) {
            let payload = match serde_json::to_vec(&reading) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize reading: {}", e);
                    continue;
                }
            };
            if let Err(e) = client
                .publish(reading::topic(reading.sensor_id), QoS::AtLeastOnce, false, payload)
                .await
            {
                warn!("Failed to publish {:?} reading: {}", reading.kind, e);
            }
        }
    }
}
