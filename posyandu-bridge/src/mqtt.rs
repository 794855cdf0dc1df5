/**
 * TRANSPORT MQTT - connexion broker du bridge
 *
 * Une seule task possède l'event loop rumqttc :
 * - (ré)abonnement au filtre télémétrie et au topic de commande à chaque ConnAck,
 *   retenté tant que le canal de requêtes rumqttc le refuse
 * - chaque publish entrant part dans `Ingress::handle`
 * - vide la file sortante remplie par la façade HTTP (commandes `set_id`)
 *
 * Reconnexion laissée à rumqttc : une erreur d'event loop est loggée, comptée
 * dans le health tracker, et le poll suivant reconnecte après une courte pause.
 * Les commandes refusées par le canal de requêtes rumqttc (plein quand le
 * broker est injoignable) restent dans `PendingPublishes` jusqu'au prochain envoi.
 */

use crate::config::{BridgeConfig, ConfigError};
use crate::health::HealthTracker;
use crate::ingress::Ingress;
use crate::models::OutboundMessage;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error("MQTT task stopped, outbound queue closed")]
pub struct OutboxClosed;

/// Côté émetteur de la file sortante, cloné dans l'état HTTP.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<String>) -> Result<(), OutboxClosed> {
        self.tx
            .send(OutboundMessage {
                topic: topic.into(),
                payload: payload.into(),
            })
            .map_err(|_| OutboxClosed)
    }
}

/// Commandes sorties de la file mais pas encore acceptées par le client MQTT.
#[derive(Debug, Default)]
pub struct PendingPublishes {
    queue: VecDeque<OutboundMessage>,
}

impl PendingPublishes {
    pub fn push(&mut self, msg: OutboundMessage) {
        self.queue.push_back(msg);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Envoie dans l'ordre tant que `try_send` accepte ; le premier refus
    /// arrête le flush et le message reste en tête. Retourne le nombre envoyé.
    pub fn flush<F>(&mut self, mut try_send: F) -> usize
    where
        F: FnMut(&OutboundMessage) -> bool,
    {
        let mut sent = 0;
        while let Some(msg) = self.queue.front() {
            if !try_send(msg) {
                break;
            }
            self.queue.pop_front();
            sent += 1;
        }
        sent
    }

    /// Flush vers le client rumqttc (QoS 0, non retenu).
    pub fn flush_to(&mut self, client: &AsyncClient) -> usize {
        let waiting = self.len();
        let sent = self.flush(|msg| {
            match client.try_publish(msg.topic.as_str(), QoS::AtMostOnce, false, msg.payload.clone()) {
                Ok(()) => {
                    info!(topic = msg.topic.as_str(), payload = msg.payload.as_str(), "published");
                    true
                }
                Err(e) => {
                    debug!(topic = msg.topic.as_str(), error = ?e, "publish deferred");
                    false
                }
            }
        });
        if sent < waiting {
            warn!(pending = self.len(), "MQTT request queue full, commands kept for retry");
        }
        sent
    }
}

pub fn mqtt_options(cfg: &BridgeConfig) -> Result<MqttOptions, ConfigError> {
    let broker = cfg.broker()?;
    let mut opts = MqttOptions::new(cfg.client_id(), broker.host, broker.port);
    opts.set_keep_alive(Duration::from_secs(15));
    Ok(opts)
}

pub fn spawn_mqtt_listener(
    cfg: &BridgeConfig,
    ingress: Ingress,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    health: HealthTracker,
) -> Result<JoinHandle<()>, ConfigError> {
    let opts = mqtt_options(cfg)?;
    let broker = format!("{}:{}", opts.broker_address().0, opts.broker_address().1);
    let subscriptions = [cfg.topic.clone(), cfg.command_topic.clone()];

    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    let mut pending = PendingPublishes::default();
    let mut to_subscribe: Vec<String> = Vec::new();

    Ok(task::spawn(async move {
        loop {
            tokio::select! {
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            info!(%broker, "connected to MQTT broker");
                            health.mark_mqtt_connected();
                            to_subscribe = subscriptions.to_vec();
                        }
                        Ok(Event::Incoming(Incoming::Publish(p))) => {
                            let outcome = ingress.handle(&p.topic, &p.payload);
                            debug!(topic = p.topic.as_str(), ?outcome, "message handled");
                        }
                        Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                            debug!(pkid = ack.pkid, codes = ?ack.return_codes, "subscription acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = ?e, "MQTT error");
                            health.increment_reconnects();
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                    // chaque poll a pu libérer de la place dans le canal rumqttc,
                    // les abonnements passent avant les commandes en attente
                    to_subscribe.retain(|topic| match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        Ok(()) => {
                            info!(topic = topic.as_str(), "subscribed");
                            false
                        }
                        Err(e) => {
                            debug!(topic = topic.as_str(), error = ?e, "subscribe deferred");
                            true
                        }
                    });
                    if !pending.is_empty() {
                        pending.flush_to(&client);
                    }
                }
                Some(msg) = outbound.recv() => {
                    pending.push(msg);
                    pending.flush_to(&client);
                }
            }
        }
    }))
}
