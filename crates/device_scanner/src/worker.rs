use crate::{parse_scan_output, ArpScanner};
use common::domain::DomainResult;
use common::mqtt::{BusPublisher, MqttPublisher, MqttSettings, TopicScheme};
use rumqttc::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polling loop of the device scanner.
///
/// Sweeps the subnet on a fixed interval and publishes a retained
/// discovery record per responding host. The first sweep runs at
/// startup. A failed sweep is logged and the interval keeps ticking.
#[instrument(name = "device_scanner", skip_all)]
pub async fn run_device_scanner(
    settings: MqttSettings,
    topics: TopicScheme,
    scanner: Arc<dyn ArpScanner>,
    scan_interval: Duration,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!(zone = %topics.zone(), interval_secs = scan_interval.as_secs(), "starting device scanner");

    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match run_session(&settings, &topics, scanner.as_ref(), scan_interval, &token).await {
            Ok(()) => {
                info!("device scanner stopped");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_RETRY_ATTEMPTS {
                    return Err(e.context("device scanner gave up reconnecting"));
                }
                warn!(error = %e, attempt = attempts, "scanner connection lost, retrying");
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
    scanner: &dyn ArpScanner,
    scan_interval: Duration,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = settings.connect("device-scanner")?;
    let publisher = MqttPublisher::new(client.clone());

    let mut ticker = tokio::time::interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = client.disconnect().await;
                return Ok(());
            }
            _ = ticker.tick() => {
                match sweep(scanner, &publisher, topics).await {
                    Ok(published) => info!(hosts = published, "sweep finished"),
                    Err(e) => warn!(error = %e, "sweep failed"),
                }
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => return Err(anyhow::anyhow!("MQTT event loop error: {e}")),
                }
            }
        }
    }
}

/// One sweep: run the scanner, publish every discovered host as a
/// retained pending record on its device topic.
async fn sweep(
    scanner: &dyn ArpScanner,
    publisher: &dyn BusPublisher,
    topics: &TopicScheme,
) -> DomainResult<usize> {
    let output = scanner.scan().await?;
    let records = parse_scan_output(&output, chrono::Utc::now());

    let mut published = 0;
    for record in &records {
        let payload = serde_json::to_vec(record)
            .map_err(|e| anyhow::anyhow!("encoding device record: {e}"))?;
        publisher
            .publish(&topics.device_topic(&record.mac), payload, true)
            .await?;
        published += 1;
    }
    Ok(published)
}
