//! Identité des capteurs.
//!
//! Un capteur s'écrit `<class>_<instanceId>`, dans le dernier segment d'un
//! topic de télémétrie (`posyandu/suhu/bayi_10`) comme dans le payload de la
//! commande `set_id`. Découpage sur le premier `_` seulement :
//! `bayi_10_a` donne `{ class: "bayi", instance_id: "10_a" }`.

use std::fmt;

const SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("missing '_' separator in {0:?}")]
    MissingSeparator(String),
    #[error("empty class or instance id in {0:?}")]
    EmptyPart(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub class: String,
    pub instance_id: String,
}

impl DeviceIdentity {
    /// Construit une identité depuis ses deux parties, toutes deux non vides.
    pub fn new(class: impl Into<String>, instance_id: impl Into<String>) -> Result<Self, IdentityError> {
        let class = class.into();
        let instance_id = instance_id.into();
        if class.is_empty() || instance_id.is_empty() {
            return Err(IdentityError::EmptyPart(format!("{class}{SEPARATOR}{instance_id}")));
        }
        Ok(Self { class, instance_id })
    }

    /// Parse l'encodage `<class>_<instanceId>`.
    pub fn parse(encoded: &str) -> Result<Self, IdentityError> {
        let (class, instance_id) = encoded
            .split_once(SEPARATOR)
            .ok_or_else(|| IdentityError::MissingSeparator(encoded.to_string()))?;
        if class.is_empty() || instance_id.is_empty() {
            return Err(IdentityError::EmptyPart(encoded.to_string()));
        }
        Ok(Self {
            class: class.to_string(),
            instance_id: instance_id.to_string(),
        })
    }

    /// Forme fil, aussi le payload `set_id` sortant.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.class, self.instance_id)
    }
}

/// Identité depuis le dernier segment d'un topic de télémétrie.
pub fn parse_from_topic(topic: &str) -> Result<DeviceIdentity, IdentityError> {
    let last = topic.rsplit('/').next().unwrap_or(topic);
    DeviceIdentity::parse(last)
}

/// Identité depuis le payload d'une commande `set_id`.
pub fn parse_from_payload(payload: &str) -> Result<DeviceIdentity, IdentityError> {
    DeviceIdentity::parse(payload)
}
