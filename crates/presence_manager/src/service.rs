use crate::PresenceStore;
use common::domain::{DeviceRecord, DomainResult, Envelope, CMD_GET_STATE, OPT_CALLBACK_MODULE};
use common::mqtt::{BusPublisher, TopicScheme};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Module identifier used for recipient addressing on shared topics.
pub const MODULE_NAME: &str = "presence_manager";

/// Owns the presence store and answers `get_state` requests.
///
/// Staleness purging is opportunistic: it runs ahead of every mutation and
/// every snapshot taken for a reply, never on a timer. An idle bus keeps
/// stale entries around until the next message arrives; documented
/// behavior, kept as-is.
pub struct PresenceService {
    store: PresenceStore,
    publisher: Arc<dyn BusPublisher>,
    topics: TopicScheme,
    stale_after: i64,
}

impl PresenceService {
    pub fn new(publisher: Arc<dyn BusPublisher>, topics: TopicScheme, stale_after: i64) -> Self {
        Self {
            store: PresenceStore::new(),
            publisher,
            topics,
            stale_after,
        }
    }

    /// Track an enriched observation. Records without an owner are
    /// enrichment-pending (or ownerless) and stay out of the store.
    #[instrument(skip(self, record), fields(mac = %record.mac))]
    pub fn track_device(&mut self, record: DeviceRecord, now_epoch: i64) {
        let purged = self.store.purge_stale(now_epoch, self.stale_after);
        if purged > 0 {
            debug!(purged, "evicted stale presence entries");
        }

        if self.store.upsert(record) {
            debug!(present = self.store.len(), "tracking device in presence state");
        } else {
            debug!("record has no owner, not tracked");
        }
    }

    /// Handle a command envelope from the shared command topic.
    #[instrument(skip(self, envelope), fields(command = %envelope.command))]
    pub async fn handle_command(&mut self, envelope: Envelope, now_epoch: i64) -> DomainResult<()> {
        if envelope.is_reply() || !envelope.addressed_to(MODULE_NAME) {
            return Ok(());
        }
        if envelope.command != CMD_GET_STATE {
            debug!("command not handled by this module");
            return Ok(());
        }
        if envelope.option_str(OPT_CALLBACK_MODULE).is_none() {
            // Nowhere to send the reply; the original dropped these too.
            warn!("get_state request without callback_module, ignoring");
            return Ok(());
        }

        self.store.purge_stale(now_epoch, self.stale_after);
        let reply = Envelope::reply_to(&envelope, json!({ "state": self.store.snapshot() }));
        let payload = serde_json::to_vec(&reply)
            .map_err(|e| anyhow::anyhow!("encoding callback envelope: {e}"))?;
        self.publisher
            .publish(&self.topics.callback_topic(), payload, false)
            .await
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.store.snapshot()
    }
}
