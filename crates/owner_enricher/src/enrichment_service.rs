use common::domain::{DeviceDirectory, DeviceRecord, DomainResult, Enrichment};
use common::mqtt::{BusPublisher, TopicScheme};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Attaches owner identities to raw discovery records.
///
/// For every record still pending enrichment, the directory is queried
/// exactly once and the outcome is republished retained on the per-device
/// topic. A miss is republished too, marked `NoOwner`, so unregistered
/// devices are never looked up again on later observations.
pub struct EnrichmentService {
    directory: Arc<dyn DeviceDirectory>,
    publisher: Arc<dyn BusPublisher>,
    topics: TopicScheme,
}

impl EnrichmentService {
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        publisher: Arc<dyn BusPublisher>,
        topics: TopicScheme,
    ) -> Self {
        Self {
            directory,
            publisher,
            topics,
        }
    }

    #[instrument(skip(self, record), fields(mac = %record.mac))]
    pub async fn enrich(&self, record: DeviceRecord) -> DomainResult<()> {
        if record.enrichment_attempted() {
            debug!("enrichment already attempted, skipping");
            return Ok(());
        }

        let enrichment = match self.directory.find_by_mac(&record.mac).await? {
            Some(identity) => {
                debug!(uid = %identity.uid, "directory matched device owner");
                Enrichment::Owner {
                    uid: identity.uid,
                    display_name: identity.display_name,
                }
            }
            None => {
                debug!("no owner registered for device");
                Enrichment::NoOwner
            }
        };

        let enriched = DeviceRecord {
            enrichment,
            ..record
        };
        let topic = self.topics.device_topic(&enriched.mac);
        let payload = serde_json::to_vec(&enriched)
            .map_err(|e| anyhow::anyhow!("encoding device record: {e}"))?;
        self.publisher.publish(&topic, payload, true).await
    }
}
