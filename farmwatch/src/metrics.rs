use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::warn;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref PUSH_EVENTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_push_events_total",
        "Push events received on notification and activity channels"
    ))
    .unwrap();
    pub static ref STALE_PUSH_EVENTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_stale_push_events_total",
        "Push events discarded because they target an inactive user"
    ))
    .unwrap();
    pub static ref STALE_READS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_stale_reads_total",
        "Count reads discarded because the session or epoch moved on"
    ))
    .unwrap();
    pub static ref COUNT_READ_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_count_read_failures_total",
        "Count reads that failed and were treated as zero"
    ))
    .unwrap();
    pub static ref MARK_WRITE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_mark_write_failures_total",
        "Mark-as-read/viewed writes that failed"
    ))
    .unwrap();
    pub static ref ADVISOR_LIVE_REPLIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_advisor_live_replies_total",
        "Advisor replies served by the hosted model"
    ))
    .unwrap();
    pub static ref ADVISOR_OFFLINE_REPLIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_advisor_offline_replies_total",
        "Advisor replies served from the offline table"
    ))
    .unwrap();
    pub static ref INGEST_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_ingest_messages_total",
        "Sensor messages received from field nodes"
    ))
    .unwrap();
    pub static ref INGEST_VALID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_ingest_valid_total",
        "Sensor messages accepted after validation"
    ))
    .unwrap();
    pub static ref INGEST_INVALID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_ingest_invalid_total",
        "Sensor messages rejected"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farmwatch_db_failures_total",
        "Transient database failures during ingest"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "farmwatch_ingest_latency_seconds",
            "Time taken to write a reading batch"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5])
    )
    .unwrap();
    pub static ref BATCH_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "farmwatch_batch_size",
        "Current reading batch size being written"
    ))
    .unwrap();
}

pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PUSH_EVENTS_TOTAL.clone()),
        Box::new(STALE_PUSH_EVENTS_TOTAL.clone()),
        Box::new(STALE_READS_TOTAL.clone()),
        Box::new(COUNT_READ_FAILURES_TOTAL.clone()),
        Box::new(MARK_WRITE_FAILURES_TOTAL.clone()),
        Box::new(ADVISOR_LIVE_REPLIES_TOTAL.clone()),
        Box::new(ADVISOR_OFFLINE_REPLIES_TOTAL.clone()),
        Box::new(INGEST_MESSAGES_TOTAL.clone()),
        Box::new(INGEST_VALID_TOTAL.clone()),
        Box::new(INGEST_INVALID_TOTAL.clone()),
        Box::new(DB_FAILURES_TOTAL.clone()),
        Box::new(INGEST_LATENCY_SECONDS.clone()),
        Box::new(BATCH_SIZE.clone()),
    ];

    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
