use anyhow::Result;
use chat_api::run_chat_api;
use common::config::ServiceConfig;
use common::domain::DeviceDirectory;
use common::ldap::LdapDirectory;
use device_scanner::{run_device_scanner, CommandScanner};
use macme_runner::Runner;
use owner_enricher::run_owner_enricher;
use presence_manager::run_presence_manager;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        zone = %config.zone_name,
        subnet = %config.scan_subnet,
        "starting macme all-in-one"
    );

    let topics = config.topic_scheme();
    let mqtt = config.mqtt_settings();
    let directory: Arc<dyn DeviceDirectory> =
        Arc::new(LdapDirectory::new(config.ldap_settings()));
    let scanner = Arc::new(CommandScanner::new(config.scan_subnet.clone()));

    let runner = Runner::new()
        .with_worker({
            let (mqtt, topics) = (mqtt.clone(), topics.clone());
            let interval = Duration::from_secs(config.scan_interval_secs);
            move |token| run_device_scanner(mqtt, topics, scanner, interval, token)
        })
        .with_worker({
            let (mqtt, topics, directory) = (mqtt.clone(), topics.clone(), directory.clone());
            move |token| run_owner_enricher(mqtt, topics, directory, token)
        })
        .with_worker({
            let (mqtt, topics) = (mqtt.clone(), topics.clone());
            let stale_after = config.device_stale_secs;
            move |token| run_presence_manager(mqtt, topics, stale_after, token)
        })
        .with_worker({
            let chat_topic = config.chat_topic.clone();
            move |token| run_chat_api(mqtt, topics, chat_topic, directory, token)
        })
        .with_closer(|| async {
            info!("workers stopped, shutting down");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10));

    runner.run().await
}
