/**
 * POSYANDU BRIDGE - pont télémétrie MQTT -> HTTP
 *
 * Les capteurs de température publient sur `posyandu/suhu/<type>_<id>` ; le
 * bridge garde en mémoire la dernière mesure de chaque capteur et la sert en
 * HTTP. L'opérateur choisit le capteur actif d'un type via `POST /set-active-id`,
 * relayé aux capteurs sur `posyandu/cmd/set_id`.
 *
 * État volatile, mono-process : les deux maps sont créées vides ici et vivent
 * aussi longtemps que le process.
 */

mod cache;
mod config;
mod health;
mod http;
mod identity;
mod ingress;
mod models;
mod mqtt;
mod state;
mod targets;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::ingress::Ingress;
use crate::mqtt::Outbox;
use crate::state::BridgeState;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("posyandu_bridge=info")),
        )
        .init();

    let cfg = load_config().await.context("loading configuration")?;
    if !cfg.auth_enabled() {
        info!("NODE_SECRET empty, HTTP routes are unauthenticated");
    }

    let bridge = BridgeState::new();
    let health = HealthTracker::new();
    let (outbox, outbound) = Outbox::channel();

    let ingress = Ingress::new(&bridge, cfg.topic.clone(), cfg.command_topic.clone());
    mqtt::spawn_mqtt_listener(&cfg, ingress, outbound, health.clone()).context("starting MQTT listener")?;
    info!(url = cfg.mqtt_url.as_str(), topic = cfg.topic.as_str(), "MQTT listener started");

    let app = http::build_router(AppState {
        bridge,
        outbox,
        command_topic: cfg.command_topic.clone(),
        health,
        node_secret: Arc::from(cfg.node_secret.as_str()),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {addr}"))?;
    info!("HTTP listener running on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server")?;

    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // pas de handler de signal, on tourne jusqu'au kill
        std::future::pending::<()>().await;
    }
}
