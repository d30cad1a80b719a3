use crate::errors::Result;
use crate::ingest;
use crate::live::{LiveHandle, PushEvent, PushTable, Subscriber};
use crate::metrics::INGEST_INVALID_TOTAL;
use crate::model::{ActivityLog, FieldReading, Notification, SensorId, UserId};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const TOPIC_ROOT: &str = "farm";
pub const SENSOR_DATA_FILTER: &str = "farm/sensor_data/#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Push(PushTable, UserId),
    SensorData(SensorId),
}

pub fn push_topic(table: PushTable, user: UserId) -> String {
    format!("{}/{}/{}", TOPIC_ROOT, table.as_str(), user)
}

pub fn sensor_topic(sensor: SensorId) -> String {
    format!("{}/sensor_data/{}", TOPIC_ROOT, sensor)
}

pub fn parse_topic(topic: &str) -> Option<Topic> {
    let mut parts = topic.split('/');
    if parts.next()? != TOPIC_ROOT {
        return None;
    }
    let table = parts.next()?;
    let id = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    match table {
        "notifications" => id.parse().ok().map(|u| Topic::Push(PushTable::Notifications, u)),
        "activity_logs" => id.parse().ok().map(|u| Topic::Push(PushTable::ActivityLogs, u)),
        "sensor_data" => id.parse().ok().map(Topic::SensorData),
        _ => None,
    }
}

pub fn connect(broker: &str, port: u16, client_id: String) -> (AsyncClient, EventLoop) {
    info!("Connecting to MQTT broker at {}:{}", broker, port);
    let mut options = MqttOptions::new(client_id, broker, port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(false);
    AsyncClient::new(options, 1000)
}

/// Per-user push subscriptions over MQTT.
#[derive(Clone)]
pub struct MqttSubscriber {
    client: AsyncClient,
}

impl MqttSubscriber {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Subscriber for MqttSubscriber {
    async fn subscribe(&self, user: UserId) -> Result<()> {
        for table in PushTable::ALL {
            let topic = push_topic(table, user);
            self.client.subscribe(&topic, QoS::AtLeastOnce).await?;
            debug!("Subscribed to {}", topic);
        }
        Ok(())
    }

    async fn unsubscribe(&self, user: UserId) -> Result<()> {
        for table in PushTable::ALL {
            let topic = push_topic(table, user);
            self.client.unsubscribe(&topic).await?;
            debug!("Unsubscribed from {}", topic);
        }
        Ok(())
    }
}

/// Announces inserted rows on their owner's push topic.
#[derive(Clone)]
pub struct PushPublisher {
    client: AsyncClient,
}

impl PushPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub async fn notification(&self, row: &Notification) -> Result<()> {
        self.publish(PushTable::Notifications, row.user_id, row).await
    }

    pub async fn activity(&self, row: &ActivityLog) -> Result<()> {
        self.publish(PushTable::ActivityLogs, row.user_id, row).await
    }

    async fn publish<T: Serialize>(&self, table: PushTable, user: UserId, row: &T) -> Result<()> {
        let payload = serde_json::to_vec(row)?;
        self.client
            .publish(push_topic(table, user), QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

/// Drives the MQTT connection, routing push events to the live session and
/// field readings to the ingest batcher. Reconnection is left to rumqttc.
pub async fn run_event_loop(mut eventloop: EventLoop, live: LiveHandle, readings: mpsc::Sender<FieldReading>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => match parse_topic(&publish.topic) {
                Some(Topic::Push(table, user_id)) => {
                    let payload = serde_json::from_slice(&publish.payload).unwrap_or_else(|e| {
                        warn!("Unparseable {} payload: {}", table.as_str(), e);
                        serde_json::Value::Null
                    });
                    let event = PushEvent {
                        table,
                        user_id,
                        payload,
                    };
                    if let Err(e) = live.push(event).await {
                        error!("Live session is gone, dropping push event: {}", e);
                    }
                }
                Some(Topic::SensorData(_)) => {
                    if let Err(e) = ingest::process_message(&publish.payload, &readings).await {
                        warn!("Rejected reading on {}: {}", publish.topic, e);
                        INGEST_INVALID_TOTAL.inc();
                    }
                }
                None => debug!("Ignoring message on {}", publish.topic),
            },
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_topics_round_trip() {
        let user = UserId::new();
        for table in PushTable::ALL {
            assert_eq!(parse_topic(&push_topic(table, user)), Some(Topic::Push(table, user)));
        }
    }

    #[test]
    fn test_sensor_topic_round_trip() {
        let sensor = SensorId::new();
        assert_eq!(parse_topic(&sensor_topic(sensor)), Some(Topic::SensorData(sensor)));
    }

    #[test]
    fn test_foreign_topics_are_ignored() {
        assert_eq!(parse_topic("telemetry/dev-1"), None);
        assert_eq!(parse_topic("farm/notifications/not-a-uuid"), None);
        assert_eq!(parse_topic("farm/profiles/3f8e2c1a-9d4b-4c6e-8f1a-2b3c4d5e6f70"), None);
        let extra = format!("{}/extra", push_topic(PushTable::Notifications, UserId::new()));
        assert_eq!(parse_topic(&extra), None);
    }
}
