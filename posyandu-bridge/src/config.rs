use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
    #[error("invalid MQTT url {0:?}")]
    InvalidMqttUrl(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt_url: String,
    /// Filtre d'abonnement télémétrie, ex: `posyandu/suhu/#`.
    pub topic: String,
    /// Topic exact de la commande `set_id`, consommé et publié.
    pub command_topic: String,
    pub port: u16,
    /// Vide = pas de contrôle `x-node-secret`.
    pub node_secret: String,
    pub client_id: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mqtt_url: "mqtt://broker.emqx.io:1883".into(),
            topic: "posyandu/suhu/#".into(),
            command_topic: "posyandu/cmd/set_id".into(),
            port: 3000,
            node_secret: String::new(),
            client_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

impl BridgeConfig {
    /// Hôte et port depuis `mqtt://host:port`, `tcp://host:port` ou `host[:port]`.
    pub fn broker(&self) -> Result<BrokerAddr, ConfigError> {
        parse_mqtt_url(&self.mqtt_url)
    }

    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("posyandu-bridge-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn auth_enabled(&self) -> bool {
        !self.node_secret.is_empty()
    }

    /// Surcharges d'environnement par-dessus ce que le fichier a fourni.
    fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(v) = get("MQTT_URL") {
            self.mqtt_url = v;
        }
        if let Some(v) = get("TOPIC") {
            self.topic = v;
        }
        if let Some(v) = get("CMD_TOPIC") {
            self.command_topic = v;
        }
        if let Some(v) = get("PORT") {
            self.port = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { var: "PORT", value: v.clone() })?;
        }
        if let Some(v) = get("NODE_SECRET") {
            self.node_secret = v;
        }
        if let Some(v) = get("MQTT_CLIENT_ID") {
            self.client_id = Some(v);
        }
        Ok(())
    }
}

fn parse_mqtt_url(url: &str) -> Result<BrokerAddr, ConfigError> {
    let invalid = || ConfigError::InvalidMqttUrl(url.to_string());
    let rest = match url.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (authority, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(BrokerAddr { host: host.to_string(), port })
}

/// Défauts, puis le YAML désigné par `POSYANDU_BRIDGE_CONFIG`
/// (`bridge.yaml` par défaut, ignoré s'il n'existe pas), puis l'environnement.
pub async fn load_config() -> Result<BridgeConfig, ConfigError> {
    let path = std::env::var("POSYANDU_BRIDGE_CONFIG").unwrap_or_else(|_| "bridge.yaml".into());
    let mut cfg = load_file(&path).await?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.broker()?;
    Ok(cfg)
}

async fn load_file(path: &str) -> Result<BridgeConfig, ConfigError> {
    if !Path::new(path).exists() {
        info!("no {path}, using defaults and environment");
        return Ok(BridgeConfig::default());
    }
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        warn!("{path} is empty, using defaults");
        return Ok(BridgeConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> = pairs.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_mqtt_url() {
        assert_eq!(
            parse_mqtt_url("mqtt://broker.emqx.io:1883").unwrap(),
            BrokerAddr { host: "broker.emqx.io".into(), port: 1883 }
        );
        assert_eq!(parse_mqtt_url("tcp://10.0.0.2:2883").unwrap().port, 2883);
        assert_eq!(parse_mqtt_url("localhost").unwrap().port, DEFAULT_MQTT_PORT);
        assert_eq!(parse_mqtt_url("mqtt://localhost/").unwrap().host, "localhost");
        assert!(parse_mqtt_url("ws://localhost:8083").is_err());
        assert!(parse_mqtt_url("mqtt://:1883").is_err());
        assert!(parse_mqtt_url("mqtt://host:port").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_env(env(&[
            ("MQTT_URL", "mqtt://localhost:1884"),
            ("PORT", "8081"),
            ("NODE_SECRET", "rahasia"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8081);
        assert!(cfg.auth_enabled());
        assert_eq!(cfg.broker().unwrap().port, 1884);
        assert_eq!(cfg.topic, "posyandu/suhu/#");
    }

    #[test]
    fn test_bad_port_is_an_error() {
        let mut cfg = BridgeConfig::default();
        assert!(matches!(
            cfg.apply_env(env(&[("PORT", "http")])),
            Err(ConfigError::InvalidVar { var: "PORT", .. })
        ));
    }

    #[test]
    fn test_defaults_disable_auth() {
        let cfg = BridgeConfig::default();
        assert!(!cfg.auth_enabled());
        assert!(cfg.client_id().starts_with("posyandu-bridge-"));
    }

    #[test]
    fn test_yaml_partial_file() {
        let cfg: BridgeConfig = serde_yaml::from_str("port: 4000\nnode_secret: s3\n").unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.node_secret, "s3");
        assert_eq!(cfg.command_topic, "posyandu/cmd/set_id");
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let cfg = load_file("/nonexistent/bridge.yaml").await.unwrap();
        assert_eq!(cfg, BridgeConfig::default());
    }
}
