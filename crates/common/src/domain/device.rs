use crate::domain::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hardware address in canonical form: lowercase, colon-separated octets.
///
/// The canonical form is the unique key for a device everywhere in the
/// system, including the per-device MQTT topic segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        let octets: Vec<&str> = s.trim().split([':', '-']).collect();
        if octets.len() != 6 {
            return Err(DomainError::InvalidMacAddress(s.to_string()));
        }
        for octet in &octets {
            if octet.len() != 2 || !octet.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DomainError::InvalidMacAddress(s.to_string()));
            }
        }
        Ok(MacAddress(octets.join(":").to_ascii_lowercase()))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = DomainError;

    fn try_from(s: String) -> DomainResult<Self> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enrichment state of a device record.
///
/// Explicit tri-state so that "looked up, no owner registered" is
/// distinguishable from "not looked up yet" and the enricher never
/// repeats directory queries for unregistered devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "enrichment", rename_all = "snake_case")]
pub enum Enrichment {
    /// Raw discovery record, directory not consulted yet.
    Pending,
    /// Directory returned an owning identity.
    Owner { uid: String, display_name: String },
    /// Directory was consulted and had no match.
    NoOwner,
}

/// A device observed in the zone, as published on the per-device topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub mac: MacAddress,
    pub ip: String,
    pub last_seen: DateTime<Utc>,
    pub last_seen_epoch: i64,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl DeviceRecord {
    /// A freshly discovered record, not yet enriched.
    pub fn observed(mac: MacAddress, ip: String, now: DateTime<Utc>) -> Self {
        Self {
            mac,
            ip,
            last_seen: now,
            last_seen_epoch: now.timestamp(),
            enrichment: Enrichment::Pending,
        }
    }

    pub fn owner(&self) -> Option<(&str, &str)> {
        match &self.enrichment {
            Enrichment::Owner { uid, display_name } => Some((uid, display_name)),
            _ => None,
        }
    }

    /// True once the directory has been consulted for this record,
    /// whatever the outcome.
    pub fn enrichment_attempted(&self) -> bool {
        !matches!(self.enrichment, Enrichment::Pending)
    }
}
