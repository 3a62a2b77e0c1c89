use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::domain::{DeviceRecord, DomainError, DomainResult};
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Source of raw ARP sweep output, kept behind a trait so the worker can
/// be exercised without root privileges or a real network.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArpScanner: Send + Sync {
    /// Sweep the subnet once and return the raw scanner output.
    async fn scan(&self) -> DomainResult<String>;
}

/// `ArpScanner` shelling out to the `arp-scan` binary.
pub struct CommandScanner {
    subnet: String,
}

impl CommandScanner {
    pub fn new(subnet: impl Into<String>) -> Self {
        Self {
            subnet: subnet.into(),
        }
    }
}

#[async_trait]
impl ArpScanner for CommandScanner {
    async fn scan(&self) -> DomainResult<String> {
        let output = Command::new("arp-scan")
            .arg(&self.subnet)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DomainError::ScanError(format!("spawning arp-scan: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::ScanError(format!(
                "arp-scan exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `arp-scan` output into discovery records stamped with `now`.
///
/// Host lines are `<ip>\t<mac>\t<vendor>`. Banner and summary lines, and
/// anything else that does not carry a valid IP and MAC pair, are skipped.
pub fn parse_scan_output(output: &str, now: DateTime<Utc>) -> Vec<DeviceRecord> {
    let mut records = Vec::new();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(ip), Some(mac)) = (fields.next(), fields.next()) else {
            continue;
        };
        if ip.trim().parse::<IpAddr>().is_err() {
            continue;
        }
        let Ok(mac) = mac.trim().parse() else {
            debug!(line = %line, "host line with unparseable MAC, skipping");
            continue;
        };
        records.push(DeviceRecord::observed(mac, ip.trim().to_string(), now));
    }
    records
}
