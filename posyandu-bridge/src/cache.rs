/**
 * CACHE DES MESURES - dernière température connue par capteur
 *
 * Map volatile `DeviceIdentity -> Reading`, remplie par l'ingress MQTT et lue
 * par `GET /latest/{type}/{id}`. Non bornée, pas d'éviction, pas de TTL.
 * Écriture last-write-wins : un message en retard écrase une mesure plus récente.
 */

use crate::identity::DeviceIdentity;
use crate::models::Reading;
use crate::state::{new_state, Shared};
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadingError {
    #[error("non-numeric payload: {0:?}")]
    NotANumber(String),
}

#[derive(Clone)]
pub struct ReadingCache {
    entries: Shared<HashMap<DeviceIdentity, Reading>>,
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingCache {
    pub fn new() -> Self {
        Self {
            entries: new_state(HashMap::new()),
        }
    }

    /// Stocke `raw_value` arrondi à une décimale, horodaté maintenant.
    /// En cas de rejet l'entrée précédente de `identity` reste intacte.
    pub fn update(&self, identity: &DeviceIdentity, raw_value: &str, source_topic: &str) -> Result<Reading, ReadingError> {
        let value = match parse_celsius(raw_value) {
            Some(v) => v,
            None => {
                warn!(device = %identity, payload = raw_value, "ignored non-numeric payload");
                return Err(ReadingError::NotANumber(raw_value.to_string()));
            }
        };

        let reading = Reading {
            suhu: round_one_decimal(value),
            ts: now_millis(),
            topic: source_topic.to_string(),
        };
        self.entries.lock().insert(identity.clone(), reading.clone());
        info!(device = %identity, suhu = reading.suhu, "updated latest reading");
        Ok(reading)
    }

    pub fn get(&self, identity: &DeviceIdentity) -> Option<Reading> {
        self.entries.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

fn parse_celsius(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 2^52 : au-delà un f64 n'a plus de partie fractionnaire.
const NO_FRACTION: f64 = 4_503_599_627_370_496.0;

/// Les grandes valeurs sont rendues telles quelles, `value * 10` déborderait
/// vers l'infini près de f64::MAX.
fn round_one_decimal(value: f64) -> f64 {
    if value.abs() >= NO_FRACTION {
        return value;
    }
    (value * 10.0).round() / 10.0
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
