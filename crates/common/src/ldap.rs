use crate::domain::{DeviceDirectory, DirectoryIdentity, DomainError, DomainResult, MacAddress};
use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, Mod, Scope, SearchEntry};
use std::collections::HashSet;
use tracing::debug;

const ATTR_MAC: &str = "macAddress";
const ATTR_UID: &str = "uid";
const ATTR_GECOS: &str = "gecos";
const ATTR_NICK: &str = "irc";

#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub url: String,
    pub base_dn: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
}

/// `DeviceDirectory` over an LDAP tree.
///
/// Each call dials the directory, binds, runs one search or modify and
/// disconnects. The handle itself is the process-wide collaborator that
/// gets injected into services; holding no live connection keeps it
/// trivially shareable and lets a dropped directory recover on the next
/// call.
pub struct LdapDirectory {
    settings: LdapSettings,
}

impl LdapDirectory {
    pub fn new(settings: LdapSettings) -> Self {
        Self { settings }
    }

    async fn bind(&self) -> DomainResult<Ldap> {
        let (conn, mut ldap) = LdapConnAsync::new(&self.settings.url)
            .await
            .map_err(|e| DomainError::DirectoryError(format!("connect failed: {e}")))?;
        ldap3::drive!(conn);

        if let (Some(dn), Some(password)) =
            (&self.settings.bind_dn, &self.settings.bind_password)
        {
            ldap.simple_bind(dn, password)
                .await
                .and_then(|r| r.success())
                .map_err(|e| DomainError::DirectoryError(format!("bind failed: {e}")))?;
        }

        Ok(ldap)
    }

    async fn search_one(
        &self,
        filter: &str,
        attrs: &[&str],
    ) -> DomainResult<Option<SearchEntry>> {
        let mut ldap = self.bind().await?;
        let (entries, _) = ldap
            .search(&self.settings.base_dn, Scope::Subtree, filter, attrs)
            .await
            .and_then(|r| r.success())
            .map_err(|e| DomainError::DirectoryError(format!("search failed: {e}")))?;
        let _ = ldap.unbind().await;

        debug!(filter = %filter, hits = entries.len(), "directory search");
        Ok(entries.into_iter().next().map(SearchEntry::construct))
    }

    /// DN of the entry owning `uid`, needed for modify operations.
    async fn dn_for_uid(&self, uid: &str) -> DomainResult<String> {
        let filter = format!("({ATTR_UID}={})", ldap_escape(uid));
        self.search_one(&filter, &[ATTR_UID])
            .await?
            .map(|entry| entry.dn)
            .ok_or_else(|| DomainError::IdentityNotFound(uid.to_string()))
    }

    async fn modify(&self, dn: &str, mods: Vec<Mod<String>>) -> DomainResult<()> {
        let mut ldap = self.bind().await?;
        ldap.modify(dn, mods)
            .await
            .and_then(|r| r.success())
            .map_err(|e| DomainError::DirectoryError(format!("modify failed: {e}")))?;
        let _ = ldap.unbind().await;
        Ok(())
    }
}

fn identity_from(entry: SearchEntry) -> Option<DirectoryIdentity> {
    let uid = entry.attrs.get(ATTR_UID)?.first()?.clone();
    let display_name = entry
        .attrs
        .get(ATTR_GECOS)
        .and_then(|v| v.first())
        .cloned()
        .unwrap_or_else(|| uid.clone());
    Some(DirectoryIdentity { uid, display_name })
}

#[async_trait]
impl DeviceDirectory for LdapDirectory {
    async fn find_by_mac(&self, mac: &MacAddress) -> DomainResult<Option<DirectoryIdentity>> {
        let filter = format!("({ATTR_MAC}={})", ldap_escape(mac.as_str()));
        Ok(self
            .search_one(&filter, &[ATTR_UID, ATTR_GECOS])
            .await?
            .and_then(identity_from))
    }

    async fn find_by_nick(&self, nick: &str) -> DomainResult<Option<DirectoryIdentity>> {
        let filter = format!("({ATTR_NICK}={})", ldap_escape(nick));
        Ok(self
            .search_one(&filter, &[ATTR_UID, ATTR_GECOS])
            .await?
            .and_then(identity_from))
    }

    async fn devices_for(&self, uid: &str) -> DomainResult<Vec<MacAddress>> {
        let filter = format!("({ATTR_UID}={})", ldap_escape(uid));
        let entry = self.search_one(&filter, &[ATTR_MAC]).await?;

        let mut devices = Vec::new();
        if let Some(entry) = entry {
            for raw in entry.attrs.get(ATTR_MAC).into_iter().flatten() {
                // Directory entries predate canonicalization; skip junk
                // values instead of failing the whole listing.
                if let Ok(mac) = raw.parse::<MacAddress>() {
                    devices.push(mac);
                }
            }
        }
        Ok(devices)
    }

    async fn register_device(&self, uid: &str, mac: &MacAddress) -> DomainResult<()> {
        let dn = self.dn_for_uid(uid).await?;
        let values: HashSet<String> = HashSet::from([mac.to_string()]);
        self.modify(&dn, vec![Mod::Add(ATTR_MAC.to_string(), values)])
            .await
    }

    async fn deregister_device(&self, uid: &str, mac: &MacAddress) -> DomainResult<()> {
        let dn = self.dn_for_uid(uid).await?;
        let values: HashSet<String> = HashSet::from([mac.to_string()]);
        self.modify(&dn, vec![Mod::Delete(ATTR_MAC.to_string(), values)])
            .await
    }

    async fn link_nick(&self, uid: &str, nick: &str) -> DomainResult<()> {
        let dn = self.dn_for_uid(uid).await?;
        let values: HashSet<String> = HashSet::from([nick.to_string()]);
        self.modify(&dn, vec![Mod::Replace(ATTR_NICK.to_string(), values)])
            .await
    }
}
