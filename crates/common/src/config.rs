use crate::ldap::LdapSettings;
use crate::mqtt::{MqttSettings, TopicScheme};
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT configuration
    /// Broker hostname
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    /// Broker port; defaults to 8883 when TLS is on, 1883 otherwise
    #[serde(default)]
    pub mqtt_port: Option<u16>,

    /// Enable TLS to the broker
    #[serde(default)]
    pub mqtt_use_tls: bool,

    /// Path to the broker CA certificate (required with TLS)
    #[serde(default)]
    pub mqtt_ca_cert: Option<String>,

    #[serde(default)]
    pub mqtt_username: Option<String>,

    #[serde(default)]
    pub mqtt_password: Option<String>,

    // LDAP configuration
    /// Directory URL, e.g. ldap://directory.local:389
    #[serde(default = "default_ldap_url")]
    pub ldap_url: String,

    /// Search base DN
    #[serde(default)]
    pub ldap_base_dn: String,

    #[serde(default)]
    pub ldap_bind_dn: Option<String>,

    #[serde(default)]
    pub ldap_bind_password: Option<String>,

    // Zone configuration
    /// Name of the tracked zone
    #[serde(default = "default_zone_name")]
    pub zone_name: String,

    /// Root segment for all zone topics
    #[serde(default = "default_topic_root")]
    pub topic_root: String,

    /// Seconds after which an unseen device stops counting as present
    #[serde(default = "default_device_stale_secs")]
    pub device_stale_secs: i64,

    /// Chat bridge subscription topic
    #[serde(default = "default_chat_topic")]
    pub chat_topic: String,

    // Discovery configuration
    /// Subnet handed to arp-scan
    #[serde(default = "default_scan_subnet")]
    pub scan_subnet: String,

    /// Seconds between discovery scans
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_ldap_url() -> String {
    "ldap://localhost:389".to_string()
}

fn default_zone_name() -> String {
    "hq".to_string()
}

fn default_topic_root() -> String {
    "macme".to_string()
}

fn default_device_stale_secs() -> i64 {
    300
}

fn default_chat_topic() -> String {
    "irc/#".to_string()
}

fn default_scan_subnet() -> String {
    "10.255.0.0/24".to_string()
}

fn default_scan_interval_secs() -> u64 {
    300
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("MACME"))
            .build()?
            .try_deserialize()
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let port = self
            .mqtt_port
            .unwrap_or(if self.mqtt_use_tls { 8883 } else { 1883 });
        MqttSettings {
            host: self.mqtt_host.clone(),
            port,
            use_tls: self.mqtt_use_tls,
            ca_cert_path: self.mqtt_ca_cert.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
        }
    }

    pub fn ldap_settings(&self) -> LdapSettings {
        LdapSettings {
            url: self.ldap_url.clone(),
            base_dn: self.ldap_base_dn.clone(),
            bind_dn: self.ldap_bind_dn.clone(),
            bind_password: self.ldap_bind_password.clone(),
        }
    }

    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(&self.topic_root, &self.zone_name)
    }
}
