use common::domain::{DeviceRecord, MacAddress};
use std::collections::BTreeMap;

/// In-memory presence snapshot, one record per hardware address.
///
/// Rebuilt from bus traffic after every restart; the owning worker loop is
/// the only mutator, so no locking discipline is needed.
#[derive(Debug, Default)]
pub struct PresenceStore {
    entries: BTreeMap<MacAddress, DeviceRecord>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the record's hardware address.
    ///
    /// The single gating invariant: records without an owner never enter
    /// the store. Returns whether the record was admitted. Last write
    /// wins for races on the same address.
    pub fn upsert(&mut self, record: DeviceRecord) -> bool {
        if record.owner().is_none() {
            return false;
        }
        self.entries.insert(record.mac.clone(), record);
        true
    }

    /// Drop every record older than `stale_after` seconds at `now`.
    /// Idempotent; returns how many records were evicted.
    pub fn purge_stale(&mut self, now_epoch: i64, stale_after: i64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, record| record.last_seen_epoch + stale_after >= now_epoch);
        before - self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::Enrichment;

    fn owned_record(mac: &str, epoch: i64) -> DeviceRecord {
        let mut record = DeviceRecord::observed(
            mac.parse().unwrap(),
            "10.255.0.2".to_string(),
            Utc::now(),
        );
        record.last_seen_epoch = epoch;
        record.enrichment = Enrichment::Owner {
            uid: "jdoe".to_string(),
            display_name: "Jane Doe".to_string(),
        };
        record
    }

    #[test]
    fn upsert_replaces_entry_for_same_mac() {
        let mut store = PresenceStore::new();
        assert!(store.upsert(owned_record("aa:bb:cc:dd:ee:ff", 100)));
        assert!(store.upsert(owned_record("aa:bb:cc:dd:ee:ff", 200)));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        // Most recent upsert wins.
        assert_eq!(snapshot[0].last_seen_epoch, 200);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = PresenceStore::new();
        let record = owned_record("aa:bb:cc:dd:ee:ff", 100);
        store.upsert(record.clone());
        let first = store.snapshot();
        store.upsert(record);
        assert_eq!(store.snapshot(), first);
    }

    #[test]
    fn unenriched_records_never_enter_a_snapshot() {
        let mut store = PresenceStore::new();

        let pending = DeviceRecord::observed(
            "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            "10.255.0.2".to_string(),
            Utc::now(),
        );
        assert!(!store.upsert(pending));

        let mut no_owner = DeviceRecord::observed(
            "11:22:33:44:55:66".parse().unwrap(),
            "10.255.0.3".to_string(),
            Utc::now(),
        );
        no_owner.enrichment = Enrichment::NoOwner;
        assert!(!store.upsert(no_owner));

        assert!(store.is_empty());
    }

    #[test]
    fn purge_removes_exactly_the_stale_records() {
        let mut store = PresenceStore::new();
        store.upsert(owned_record("aa:bb:cc:dd:ee:01", 100));
        store.upsert(owned_record("aa:bb:cc:dd:ee:02", 500));
        store.upsert(owned_record("aa:bb:cc:dd:ee:03", 800));

        // now=1000, stale_after=300: 100 and 500 are too old, 800 stays
        // (800 + 300 >= 1000).
        assert_eq!(store.purge_stale(1000, 300), 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_seen_epoch, 800);
    }

    #[test]
    fn purge_is_a_noop_when_already_purged() {
        let mut store = PresenceStore::new();
        store.upsert(owned_record("aa:bb:cc:dd:ee:01", 100));
        assert_eq!(store.purge_stale(1000, 300), 1);
        assert_eq!(store.purge_stale(1000, 300), 0);
        assert!(store.is_empty());
    }
}
