use crate::PresenceService;
use common::domain::{DeviceRecord, Envelope};
use common::mqtt::{MqttPublisher, MqttSettings, TopicScheme, ZoneTopic};
use rumqttc::{Event, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polling loop of the presence manager.
///
/// One loop owns the service (and its store) exclusively: device records
/// and command envelopes are processed one at a time, which is the whole
/// concurrency discipline the store needs. The service is rebuilt on
/// reconnect; the retained device topics replay into the fresh store as
/// soon as the wildcard subscription is back.
#[instrument(name = "presence_manager", skip_all)]
pub async fn run_presence_manager(
    settings: MqttSettings,
    topics: TopicScheme,
    stale_after: i64,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!(zone = %topics.zone(), "starting presence manager");

    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match run_session(&settings, &topics, stale_after, &token).await {
            Ok(()) => {
                info!("presence manager stopped");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_RETRY_ATTEMPTS {
                    return Err(e.context("presence manager gave up reconnecting"));
                }
                warn!(error = %e, attempt = attempts, "presence connection lost, retrying");
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }
}

async fn run_session(
    settings: &MqttSettings,
    topics: &TopicScheme,
    stale_after: i64,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = settings.connect("presence-manager")?;
    let publisher = MqttPublisher::new(client.clone());
    let mut service = PresenceService::new(Arc::new(publisher), topics.clone(), stale_after);
    client
        .subscribe(topics.devices_wildcard(), QoS::AtLeastOnce)
        .await?;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(topics, &mut service, &publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => return Err(anyhow::anyhow!("MQTT event loop error: {e}")),
                }
            }
        }
    }
}

async fn handle_publish(
    topics: &TopicScheme,
    service: &mut PresenceService,
    topic: &str,
    payload: &[u8],
) {
    let now_epoch = chrono::Utc::now().timestamp();

    match topics.classify(topic) {
        ZoneTopic::Device(mac) => {
            let record: DeviceRecord = match serde_json::from_slice(payload) {
                Ok(record) => record,
                Err(e) => {
                    debug!(topic = %topic, error = %e, "undecodable device payload, skipping");
                    return;
                }
            };
            if record.mac != mac {
                warn!(topic = %topic, payload_mac = %record.mac, "topic/payload MAC mismatch, skipping");
                return;
            }
            service.track_device(record, now_epoch);
        }
        ZoneTopic::Command => {
            let envelope: Envelope = match serde_json::from_slice(payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!(error = %e, "malformed command envelope, skipping");
                    return;
                }
            };
            if let Err(e) = service.handle_command(envelope, now_epoch).await {
                warn!(error = %e, "failed to answer command");
            }
        }
        ZoneTopic::Callback | ZoneTopic::Other => {}
    }
}
