//! MQTT transport built on rumqttc
//!
//! A spawned pump task owns the event loop. It stamps every incoming publish
//! on receipt, classifies it by topic and forwards it to the coordinator as a
//! `TransportEvent`. The coordinator only ever sees that channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use shared::{logging, process_debug, process_warn, ProcessId, QosLevel, VoidNotice};

use crate::config::{BenchSettings, TopicSettings};
use crate::error::{ControllerError, ControllerResult};
use crate::traits::{Transport, TransportEvent};

/// Room for bursts of data messages while the coordinator is busy
const EVENT_BUFFER: usize = 65_536;
const REQUEST_BUFFER: usize = 64;
const POLL_BACKOFF: Duration = Duration::from_secs(1);
/// rumqttc rejects keep-alive intervals shorter than this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Routes incoming topics to coordinator events
#[derive(Debug, Clone)]
pub struct TopicMap {
    data_prefix: String,
    done: String,
    void: String,
}

impl TopicMap {
    pub fn new(topics: &TopicSettings) -> Self {
        Self {
            data_prefix: topics.data_prefix().to_string(),
            done: topics.participant_done.clone(),
            void: topics.void_run.clone(),
        }
    }

    /// Control topics the pump keeps subscribed across sessions
    pub fn control_topics(&self) -> [&str; 2] {
        [&self.done, &self.void]
    }

    /// Translate one publish; unknown topics yield `None`
    pub fn classify(&self, topic: &str, payload: &[u8], received_at: DateTime<Utc>) -> Option<TransportEvent> {
        if topic == self.done {
            let participant = String::from_utf8_lossy(payload).trim().parse::<ProcessId>().ok();
            return Some(TransportEvent::ParticipantDone { participant });
        }

        if topic == self.void {
            let notice = VoidNotice::from_payload(payload);
            return Some(TransportEvent::VoidRequested { origin: notice.origin });
        }

        let suffix = topic.strip_prefix(&self.data_prefix)?;
        let participant = match suffix.parse::<ProcessId>() {
            Ok(id) => id.participant_index()?,
            Err(_) => suffix.parse::<u32>().ok()?,
        };
        Some(TransportEvent::DataMessage {
            participant,
            received_at,
        })
    }
}

/// Production transport: one rumqttc session per controller
pub struct RealTransport {
    settings: Arc<BenchSettings>,
    client: Mutex<Option<AsyncClient>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl RealTransport {
    pub fn new(settings: Arc<BenchSettings>) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let broker = &self.settings.broker;
        let mut options = MqttOptions::new(self.settings.client_id.clone(), broker.host.clone(), broker.port);
        options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS)));
        options.set_max_packet_size(broker.max_packet_size, broker.max_packet_size);
        options.set_clean_session(true);
        options
    }

    async fn client(&self) -> ControllerResult<AsyncClient> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| ControllerError::transport("not connected"))
    }
}

#[async_trait]
impl Transport for RealTransport {
    async fn connect(&self) -> ControllerResult<mpsc::Receiver<TransportEvent>> {
        let mut client_slot = self.client.lock().await;
        if client_slot.is_some() {
            return Err(ControllerError::transport("already connected"));
        }

        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_BUFFER);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let topics = TopicMap::new(&self.settings.topics);

        let handle = tokio::spawn(pump(eventloop, client.clone(), topics, tx));
        *self.pump.lock().await = Some(handle);
        *client_slot = Some(client);

        process_debug!(
            ProcessId::current(),
            "🔌 Connecting to {}:{} as {}",
            self.settings.broker.host,
            self.settings.broker.port,
            self.settings.client_id
        );
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel) -> ControllerResult<()> {
        self.client()
            .await?
            .publish(topic, to_mqtt_qos(qos), false, payload)
            .await
            .map_err(|e| ControllerError::transport(format!("publish to {topic} failed: {e}")))
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> ControllerResult<()> {
        self.client()
            .await?
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| ControllerError::transport(format!("subscribe to {topic} failed: {e}")))
    }

    async fn unsubscribe(&self, topic: &str) -> ControllerResult<()> {
        self.client()
            .await?
            .unsubscribe(topic)
            .await
            .map_err(|e| ControllerError::transport(format!("unsubscribe from {topic} failed: {e}")))
    }

    async fn disconnect(&self) -> ControllerResult<()> {
        let client = self.client.lock().await.take();
        let result = match client {
            Some(client) => client
                .disconnect()
                .await
                .map_err(|e| ControllerError::transport(format!("disconnect failed: {e}"))),
            None => Ok(()),
        };

        // Give the pump a moment to flush the disconnect. Without a session
        // it never sees one and would keep reconnecting.
        if let Some(mut handle) = self.pump.lock().await.take() {
            if tokio::time::timeout(POLL_BACKOFF, &mut handle).await.is_err() {
                process_debug!(ProcessId::current(), "Event pump did not stop on its own, aborting it");
                handle.abort();
            }
        }
        result
    }
}

/// Event delivery context: polls the session and forwards classified events
async fn pump(mut eventloop: EventLoop, client: AsyncClient, topics: TopicMap, tx: mpsc::Sender<TransportEvent>) {
    let mut session = 0u32;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let received_at = Utc::now();
                match topics.classify(&publish.topic, &publish.payload, received_at) {
                    Some(event) => event,
                    None => {
                        process_debug!(ProcessId::current(), "Ignoring message on {}", publish.topic);
                        continue;
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    TransportEvent::ConnectionRefused {
                        code: format!("{:?}", ack.code),
                    }
                } else {
                    session += 1;
                    for topic in topics.control_topics() {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtMostOnce) {
                            logging::log_error(ProcessId::current(), "Subscribing control topic", &e);
                        }
                    }
                    TransportEvent::Connected { session }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => TransportEvent::Disconnected {
                reason: "broker sent disconnect".to_string(),
            },
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                process_debug!(ProcessId::current(), "🔌 Disconnect sent, stopping event pump");
                break;
            }
            Ok(_) => continue,
            Err(ConnectionError::ConnectionRefused(code)) => {
                let refused = TransportEvent::ConnectionRefused {
                    code: format!("{code:?}"),
                };
                if !forward_or_stop(&tx, refused).await {
                    break;
                }
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Transport error: {}", e);
                if !forward_or_stop(&tx, TransportEvent::Disconnected { reason: e.to_string() }).await {
                    break;
                }
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }
        };

        if !forward_or_stop(&tx, event).await {
            break;
        }
    }
}

/// False once the coordinator has dropped its receiver
async fn forward_or_stop(tx: &mpsc::Sender<TransportEvent>, event: TransportEvent) -> bool {
    tx.send(event).await.is_ok()
}
