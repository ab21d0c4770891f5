use std::time::Duration;

use rumqttc::{MqttOptions, Transport};
use tracing::info;

use crate::config::{Config, TopicConfig};

/// Everything the MQTT side needs, resolved from the config file
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub credentials: Option<(String, String)>,
    pub use_ssl: bool,
    pub topics: TopicConfig,
}

impl MqttConfig {
    pub fn from_config(config: &Config) -> Self {
        let broker = &config.broker;
        Self {
            client_id: broker.client_id.clone(),
            host: broker.host.clone(),
            port: broker.port(),
            keepalive: broker.keepalive,
            credentials: broker
                .credentials()
                .map(|(user, pw)| (user.to_string(), pw.to_string())),
            use_ssl: broker.use_ssl,
            topics: config.topics.clone(),
        }
    }

    /// Client options; TLS uses rumqttc's default rustls setup with the system roots
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keepalive);

        if self.use_ssl {
            info!("MQTT SSL Enabled");
            options.set_transport(Transport::tls_with_default_config());
        } else {
            info!("MQTT connection will not be using SSL");
        }

        match &self.credentials {
            Some((user, pw)) => {
                info!("Setting MQTT username and password");
                options.set_credentials(user.clone(), pw.clone());
            }
            None => info!("Setting MQTT to anonymous login"),
        }

        options
    }
}
