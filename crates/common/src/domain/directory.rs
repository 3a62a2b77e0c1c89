use crate::domain::{DomainResult, MacAddress};
use async_trait::async_trait;

/// An owning identity held by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryIdentity {
    pub uid: String,
    pub display_name: String,
}

/// Directory service mapping hardware addresses and chat nicks to
/// identities.
///
/// "Not found" is a valid outcome (`Ok(None)`), not an error; errors mean
/// the directory itself was unreachable or rejected the operation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Look up the owner of a hardware address.
    async fn find_by_mac(&self, mac: &MacAddress) -> DomainResult<Option<DirectoryIdentity>>;

    /// Resolve a chat nick to an identity.
    async fn find_by_nick(&self, nick: &str) -> DomainResult<Option<DirectoryIdentity>>;

    /// All hardware addresses registered to `uid`.
    async fn devices_for(&self, uid: &str) -> DomainResult<Vec<MacAddress>>;

    /// Register a hardware address to `uid`.
    async fn register_device(&self, uid: &str, mac: &MacAddress) -> DomainResult<()>;

    /// Remove a hardware address from `uid`.
    async fn deregister_device(&self, uid: &str, mac: &MacAddress) -> DomainResult<()>;

    /// Associate a chat nick with the identity `uid`.
    async fn link_nick(&self, uid: &str, nick: &str) -> DomainResult<()>;
}
