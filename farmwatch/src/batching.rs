use crate::db::insert_readings;
use crate::metrics::{BATCH_SIZE, INGEST_LATENCY_SECONDS};
use crate::model::FieldReading;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info};

/// Collects readings and writes them in batches, flushing when `max_batch`
/// is reached or every `max_wait_ms`.
pub async fn run_batcher(mut rx: mpsc::Receiver<FieldReading>, pool: PgPool, max_batch: usize, max_wait_ms: u64) {
    info!("Starting reading batcher (max_batch={}, max_wait_ms={})", max_batch, max_wait_ms);

    let max_batch = max_batch.max(1);
    let mut buffer: Vec<FieldReading> = Vec::with_capacity(max_batch);
    let mut ticker = interval(Duration::from_millis(max_wait_ms.max(1)));

    loop {
        tokio::select! {
            reading = rx.recv() => match reading {
                Some(r) => {
                    buffer.push(r);
                    if buffer.len() >= max_batch {
                        flush(&pool, &mut buffer).await;
                    }
                }
                None => {
                    info!("Reading queue closed, flushing remaining batch");
                    flush(&pool, &mut buffer).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&pool, &mut buffer).await;
                }
            }
        }
    }

    info!("Batcher stopped");
}

/// Writes and clears the buffer. A batch that still fails after the insert's
/// own retries is dropped so ingest keeps moving.
async fn flush(pool: &PgPool, buffer: &mut Vec<FieldReading>) {
    if buffer.is_empty() {
        return;
    }

    let batch_len = buffer.len();
    BATCH_SIZE.set(batch_len as f64);
    let start = Instant::now();

    match insert_readings(pool, buffer).await {
        Ok(()) => {
            let elapsed = start.elapsed().as_secs_f64();
            INGEST_LATENCY_SECONDS.observe(elapsed);
            debug!("Wrote {} readings in {:.3}s", batch_len, elapsed);
        }
        Err(e) => {
            error!("Dropping {} readings after persistent write failure: {}", batch_len, e);
        }
    }

    buffer.clear();
    BATCH_SIZE.set(0.0);
}
