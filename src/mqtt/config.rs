use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rumqttc::{MqttOptions, Transport};

use crate::config::ConfigError;

const DEFAULT_TCP_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerTransport {
    Tcp,
    Tls,
}

/// Broker address as given in `MQTT_BROKER`, e.g. `tcp://broker.local:1883`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub transport: BrokerTransport,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let scheme = match self.transport {
            BrokerTransport::Tcp => "tcp",
            BrokerTransport::Tls => "ssl",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

impl FromStr for BrokerAddress {
    type Err = ConfigError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidBroker {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = address.trim();
        let (transport, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "tcp" | "mqtt" => (BrokerTransport::Tcp, rest),
                "ssl" | "tls" | "mqtts" => (BrokerTransport::Tls, rest),
                _ => return Err(invalid("unsupported scheme")),
            },
            None => (BrokerTransport::Tcp, trimmed),
        };
        let rest = rest.trim_end_matches('/');

        let default_port = match transport {
            BrokerTransport::Tcp => DEFAULT_TCP_PORT,
            BrokerTransport::Tls => DEFAULT_TLS_PORT,
        };

        // [v6]:port
        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(invalid("unexpected characters after host")),
            }
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if !rest.starts_with('[') && host.contains(':') {
            return Err(invalid("IPv6 hosts must be bracketed"));
        }

        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
            None => default_port,
        };

        Ok(BrokerAddress {
            host: host.to_string(),
            port,
            transport,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: BrokerAddress,
    pub client_id: String,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Pause between a failed poll and the next reconnect attempt
    pub reconnect_delay: Duration,
    /// Upper bound for in-flight handlers to finish on shutdown
    pub drain_timeout: Duration,
    pub channel_capacity: usize,
}

impl MqttConfig {
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.client_id.clone(),
            self.broker.host.clone(),
            self.broker.port,
        );
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true);

        // A password without a username is never sent
        if let Some(username) = &self.username {
            options.set_credentials(
                username.clone(),
                self.password.clone().unwrap_or_default(),
            );
        }

        if self.broker.transport == BrokerTransport::Tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        options
    }
}
