/**
 * INGRESS - classification des messages MQTT entrants
 *
 * Une transition par message :
 * - topic couvert par le filtre télémétrie (`posyandu/suhu/#`) -> identité depuis
 *   le dernier segment, payload parsé en température, cache mis à jour
 * - topic égal au topic de commande (`posyandu/cmd/set_id`) -> identité depuis
 *   le payload, cible active mise à jour
 * - tout le reste -> ignoré
 *
 * Les messages malformés sont loggés puis jetés, jamais rejoués : les capteurs
 * publient périodiquement, le message suivant répare l'état.
 */

use crate::cache::ReadingCache;
use crate::identity::{parse_from_payload, parse_from_topic, DeviceIdentity};
use crate::state::BridgeState;
use crate::targets::{ActiveTargets, TargetOrigin};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum IngressOutcome {
    ReadingStored(DeviceIdentity),
    TargetSelected(DeviceIdentity),
    Dropped,
    Ignored,
}

#[derive(Clone)]
pub struct Ingress {
    readings: ReadingCache,
    targets: ActiveTargets,
    telemetry_filter: String,
    command_topic: String,
}

impl Ingress {
    pub fn new(state: &BridgeState, telemetry_filter: impl Into<String>, command_topic: impl Into<String>) -> Self {
        Self {
            readings: state.readings.clone(),
            targets: state.targets.clone(),
            telemetry_filter: telemetry_filter.into(),
            command_topic: command_topic.into(),
        }
    }

    pub fn handle(&self, topic: &str, payload: &[u8]) -> IngressOutcome {
        if topic == self.command_topic {
            return self.handle_command(payload);
        }
        if filter_matches(&self.telemetry_filter, topic) {
            return self.handle_telemetry(topic, payload);
        }
        debug!(topic, "ignored message on unrelated topic");
        IngressOutcome::Ignored
    }

    fn handle_telemetry(&self, topic: &str, payload: &[u8]) -> IngressOutcome {
        let identity = match parse_from_topic(topic) {
            Ok(id) => id,
            Err(e) => {
                warn!(topic, error = %e, "malformed telemetry topic");
                return IngressOutcome::Dropped;
            }
        };
        let Some(text) = utf8(topic, payload) else {
            return IngressOutcome::Dropped;
        };
        match self.readings.update(&identity, text, topic) {
            Ok(_) => IngressOutcome::ReadingStored(identity),
            Err(_) => IngressOutcome::Dropped,
        }
    }

    fn handle_command(&self, payload: &[u8]) -> IngressOutcome {
        let Some(text) = utf8(&self.command_topic, payload) else {
            return IngressOutcome::Dropped;
        };
        match parse_from_payload(text) {
            Ok(identity) => {
                self.targets
                    .set_active(&identity.class, &identity.instance_id, TargetOrigin::Mqtt);
                IngressOutcome::TargetSelected(identity)
            }
            Err(e) => {
                warn!(payload = text, error = %e, "ignored malformed set_id payload");
                IngressOutcome::Dropped
            }
        }
    }
}

/// Filtre MQTT : `+` = un niveau, `#` final = zéro ou plusieurs niveaux
/// (`a/#` couvre `a`).
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for f in filter.split('/') {
        if f == "#" {
            return true;
        }
        match levels.next() {
            Some(_) if f == "+" => {}
            Some(level) if level == f => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}

fn utf8<'a>(topic: &str, payload: &'a [u8]) -> Option<&'a str> {
    match std::str::from_utf8(payload) {
        Ok(text) => Some(text),
        Err(_) => {
            warn!(topic, bytes = payload.len(), "ignored non UTF-8 payload");
            None
        }
    }
}
