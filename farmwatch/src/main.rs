use axum::{routing::get, Router};
use farmwatch::advisor::Advisor;
use farmwatch::backend::{Backend, PgBackend};
use farmwatch::config::Config;
use farmwatch::demo::DemoGate;
use farmwatch::live::LiveSession;
use farmwatch::mqtt::{self, MqttSubscriber, PushPublisher};
use farmwatch::rest::{self, AppState};
use farmwatch::storage::FileStore;
use farmwatch::tutorial::{Tutorial, DEFAULT_STEPS};
use farmwatch::{batching, db, metrics};
use rumqttc::QoS;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();

    info!("Starting farmwatch");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));

    metrics::init_metrics();

    let pool = match db::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let advisor = match Advisor::new(config.advisor.clone()) {
        Ok(advisor) => Arc::new(advisor),
        Err(e) => {
            error!("Failed to build advisor client: {}", e);
            std::process::exit(1);
        }
    };

    let client_id = format!("farmwatch-{}", uuid::Uuid::new_v4());
    let (client, eventloop) = mqtt::connect(&config.mqtt_broker, config.mqtt_port, client_id);
    if let Err(e) = client.subscribe(mqtt::SENSOR_DATA_FILTER, QoS::AtLeastOnce).await {
        error!("Failed to subscribe to {}: {}", mqtt::SENSOR_DATA_FILTER, e);
        std::process::exit(1);
    }

    let backend: Arc<dyn Backend> = Arc::new(PgBackend::new(pool.clone()));
    let (session, live) = LiveSession::new(
        Arc::clone(&backend),
        Box::new(MqttSubscriber::new(client.clone())),
        config.channel_capacity,
    );
    let live_handle = tokio::spawn(session.run());

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let mqtt_live = live.clone();
    let mqtt_handle = tokio::spawn(mqtt::run_event_loop(eventloop, mqtt_live, tx));

    let batcher_pool = pool.clone();
    let (batch_size, batch_timeout_ms) = (config.batch_size, config.batch_timeout_ms);
    let batcher_handle = tokio::spawn(async move {
        batching::run_batcher(rx, batcher_pool, batch_size, batch_timeout_ms).await;
    });

    info!("Tutorial state: {}", config.tutorial_state_path.display());
    let tutorial = Tutorial::load(FileStore::new(&config.tutorial_state_path), DEFAULT_STEPS.to_vec());

    let state = AppState {
        pool,
        backend,
        live,
        tutorial: Arc::new(Mutex::new(tutorial)),
        demo: Arc::new(DemoGate::new()),
        advisor,
        publisher: PushPublisher::new(client),
        chart_lookback_hours: config.chart_lookback_hours,
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(state));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = batcher_handle => {
            error!("Batcher task terminated");
        }
        _ = live_handle => {
            error!("Live session terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
