//! Field-node readings arriving over MQTT.

use crate::errors::{Error, Result};
use crate::metrics::{INGEST_MESSAGES_TOTAL, INGEST_VALID_TOTAL};
use crate::model::FieldReading;
use crate::validate::validate;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error};

/// Parses and validates one payload, then queues it for the batcher.
/// Waits for room when the queue is full.
pub async fn process_message(payload: &[u8], tx: &mpsc::Sender<FieldReading>) -> Result<()> {
    INGEST_MESSAGES_TOTAL.inc();

    let reading = serde_json::from_slice::<FieldReading>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    validate(&reading)?;

    match tx.try_send(reading) {
        Ok(()) => {}
        Err(TrySendError::Full(reading)) => {
            debug!("Reading queue full, waiting for the batcher");
            tx.send(reading).await.map_err(|_| Error::ChannelSend)?;
        }
        Err(TrySendError::Closed(_)) => {
            error!("Reading queue closed");
            return Err(Error::ChannelSend);
        }
    }

    INGEST_VALID_TOTAL.inc();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SensorId, SensorKind};
    use chrono::Utc;

    fn payload(kind: SensorKind, value: f64) -> Vec<u8> {
        serde_json::to_vec(&FieldReading {
            sensor_id: SensorId::new(),
            kind,
            value,
            timestamp: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn test_process_message_valid() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            assert!(process_message(&payload(SensorKind::Ec, 1.2), &tx).await.is_ok());

            let received = rx.recv().await.unwrap();
            assert_eq!(received.kind, SensorKind::Ec);
            assert_eq!(received.value, 1.2);
        });
    }

    #[test]
    fn test_process_message_invalid_json() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(10);
            assert!(process_message(b"invalid json", &tx).await.is_err());
        });
    }

    #[test]
    fn test_process_message_out_of_range() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            assert!(process_message(&payload(SensorKind::Ph, 20.0), &tx).await.is_err());
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_process_message_closed_queue() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            let result = process_message(&payload(SensorKind::Temperature, 21.0), &tx).await;
            assert!(matches!(result, Err(Error::ChannelSend)));
        });
    }
}
