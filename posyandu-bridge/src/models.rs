use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dernière mesure d'un capteur, telle que servie par `GET /latest/{type}/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub suhu: f64,
    /// Millisecondes depuis l'epoch Unix, horloge locale à l'ingress.
    pub ts: i64,
    pub topic: String,
}

/// Corps de `POST /set-active-id`. Champs gardés en JSON libre pour accepter
/// les ids numériques (`"id": 7`) comme les chaînes.
#[derive(Debug, Default, Deserialize)]
pub struct SetActiveRequest {
    #[serde(rename = "type")]
    pub class: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivePair {
    #[serde(rename = "type")]
    pub class: String,
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct SetActiveResponse {
    pub ok: bool,
    pub active: ActivePair,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub ok: bool,
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub readings_tracked: usize,
    pub active: BTreeMap<String, String>,
}

/// Message en attente de publication sur le broker.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}
