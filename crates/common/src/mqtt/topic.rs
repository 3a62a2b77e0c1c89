use crate::domain::MacAddress;

/// Topic leaf reserved for command requests.
pub const COMMAND_LEAF: &str = "command";
/// Topic leaf reserved for command replies.
pub const CALLBACK_LEAF: &str = "callback";

/// Topic conventions for one zone: every topic is a `/`-joined path under
/// `<root>/<zone>`.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    root: String,
    zone: String,
}

/// What a topic under the zone subscription carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneTopic {
    /// Retained per-device state, leaf is the canonical MAC.
    Device(MacAddress),
    /// Command request envelope.
    Command,
    /// Command reply envelope.
    Callback,
    /// Shares the wildcard but is none of ours.
    Other,
}

impl TopicScheme {
    pub fn new(root: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            zone: zone.into(),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Retained state topic for one device.
    pub fn device_topic(&self, mac: &MacAddress) -> String {
        format!("{}/{}/{}", self.root, self.zone, mac)
    }

    /// Wildcard subscription covering devices, commands and callbacks.
    pub fn devices_wildcard(&self) -> String {
        format!("{}/{}/#", self.root, self.zone)
    }

    pub fn command_topic(&self) -> String {
        format!("{}/{}/{}", self.root, self.zone, COMMAND_LEAF)
    }

    pub fn callback_topic(&self) -> String {
        format!("{}/{}/{}", self.root, self.zone, CALLBACK_LEAF)
    }

    /// Chat reply topic for a room, in the chat bridge's convention.
    pub fn chat_reply_topic(room: &str) -> String {
        format!("hubot/respond/room/{room}")
    }

    /// Classify a topic received on the zone wildcard.
    pub fn classify(&self, topic: &str) -> ZoneTopic {
        let prefix = format!("{}/{}/", self.root, self.zone);
        let leaf = match topic.strip_prefix(&prefix) {
            Some(leaf) if !leaf.is_empty() && !leaf.contains('/') => leaf,
            _ => return ZoneTopic::Other,
        };

        match leaf {
            COMMAND_LEAF => ZoneTopic::Command,
            CALLBACK_LEAF => ZoneTopic::Callback,
            other => match other.parse::<MacAddress>() {
                Ok(mac) => ZoneTopic::Device(mac),
                Err(_) => ZoneTopic::Other,
            },
        }
    }
}
