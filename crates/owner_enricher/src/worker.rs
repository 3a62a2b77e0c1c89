use crate::EnrichmentService;
use common::domain::{DeviceDirectory, DeviceRecord};
use common::mqtt::{MqttPublisher, MqttSettings, TopicScheme, ZoneTopic};
use rumqttc::{Event, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polling loop of the Owner Enrichment Stage.
///
/// Subscribes to the zone wildcard and feeds pending device records to the
/// [`EnrichmentService`]. A failed message never stops the loop; a lost
/// broker connection is retried a bounded number of times.
#[instrument(name = "owner_enricher", skip_all)]
pub async fn run_owner_enricher(
    settings: MqttSettings,
    topics: TopicScheme,
    directory: Arc<dyn DeviceDirectory>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!(zone = %topics.zone(), "starting owner enricher");

    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match run_session(&settings, &topics, directory.clone(), &token).await {
            Ok(()) => {
                info!("owner enricher stopped");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_RETRY_ATTEMPTS {
                    return Err(e.context("owner enricher gave up reconnecting"));
                }
                warn!(error = %e, attempt = attempts, "enricher connection lost, retrying");
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
    directory: Arc<dyn DeviceDirectory>,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = settings.connect("owner-enricher")?;
    let publisher = MqttPublisher::new(client.clone());
    let service = EnrichmentService::new(directory, Arc::new(publisher), topics.clone());
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
                        handle_publish(topics, &service, &publish.topic, &publish.payload).await;
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
    service: &EnrichmentService,
    topic: &str,
    payload: &[u8],
) {
    let ZoneTopic::Device(mac) = topics.classify(topic) else {
        return;
    };

    let record: DeviceRecord = match serde_json::from_slice(payload) {
        Ok(record) => record,
        Err(e) => {
            // Not our message; the wildcard catches plenty of others.
            debug!(topic = %topic, error = %e, "undecodable device payload, skipping");
            return;
        }
    };

    if record.mac != mac {
        warn!(topic = %topic, payload_mac = %record.mac, "topic/payload MAC mismatch, skipping");
        return;
    }

    if let Err(e) = service.enrich(record).await {
        // Dropped on purpose; the next discovery cycle republishes the
        // device and the lookup happens again.
        warn!(mac = %mac, error = %e, "enrichment failed, dropping observation");
    }
}
