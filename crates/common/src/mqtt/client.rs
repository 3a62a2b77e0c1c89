use anyhow::{anyhow, Context, Result};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use std::time::Duration;

/// Broker connection settings, shared by every worker. Each worker opens
/// its own connection with a distinct client id.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub ca_cert_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl MqttSettings {
    /// Build a client and its event loop for one worker.
    pub fn connect(&self, module: &str) -> Result<(AsyncClient, EventLoop)> {
        let client_id = format!("macme-{module}");
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }

        if self.use_tls {
            let ca_path = self
                .ca_cert_path
                .as_ref()
                .ok_or_else(|| anyhow!("MQTT TLS enabled but no CA certificate configured"))?;
            let ca = std::fs::read(ca_path)
                .with_context(|| format!("reading MQTT CA certificate {ca_path}"))?;
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        Ok(AsyncClient::new(options, 100))
    }
}
