use crate::ChatService;
use common::domain::{DeviceDirectory, Envelope};
use common::mqtt::{MqttPublisher, MqttSettings, TopicScheme};
use rumqttc::{Event, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Polling loop of the chat bridge.
///
/// Subscribes to both the chat firehose and the zone callback topic.
/// The pending-query map lives in the service, so one loop owning the
/// service exclusively is the correlation discipline in its entirety.
/// A reconnect rebuilds the service and forgets in-flight queries; the
/// placeholder reply is then the last the asker hears of them.
#[instrument(name = "chat_api", skip_all)]
pub async fn run_chat_api(
    settings: MqttSettings,
    topics: TopicScheme,
    chat_topic: String,
    directory: Arc<dyn DeviceDirectory>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!(zone = %topics.zone(), chat_topic = %chat_topic, "starting chat api");

    let mut attempts = 0;
    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        match run_session(&settings, &topics, &chat_topic, directory.clone(), &token).await {
            Ok(()) => {
                info!("chat api stopped");
                return Ok(());
            }
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_RETRY_ATTEMPTS {
                    return Err(e.context("chat api gave up reconnecting"));
                }
                warn!(error = %e, attempt = attempts, "chat connection lost, retrying");
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
    chat_topic: &str,
    directory: Arc<dyn DeviceDirectory>,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = settings.connect("chat-api")?;
    let publisher = MqttPublisher::new(client.clone());
    let mut service = ChatService::new(directory, Arc::new(publisher), topics.clone());
    client.subscribe(chat_topic, QoS::AtLeastOnce).await?;
    client
        .subscribe(topics.callback_topic(), QoS::AtLeastOnce)
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
    service: &mut ChatService,
    topic: &str,
    payload: &[u8],
) {
    if topic == topics.callback_topic() {
        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "malformed callback envelope, skipping");
                return;
            }
        };
        if let Err(e) = service.handle_callback(envelope).await {
            warn!(error = %e, "failed to relay presence reply");
        }
        return;
    }

    let text = String::from_utf8_lossy(payload);
    if let Err(e) = service.handle_chat_message(topic, &text).await {
        warn!(topic = %topic, error = %e, "failed to handle chat message");
    }
}
