/**
 * FAÇADE HTTP - surface de contrôle synchrone du bridge
 *
 * Routes :
 * - GET  /health                 -> { ok: true }, jamais protégée
 * - POST /set-active-id          -> sélectionne le capteur actif d'un type et
 *                                   publie `<type>_<id>` sur le topic de commande
 * - GET  /latest/{type}/{id}     -> dernière mesure, 204 si rien reçu
 * - GET  /status                 -> état broker, taille du cache, cibles actives
 *
 * SÉCURITÉ :
 * Si un secret est configuré, toutes les routes sauf /health exigent le header
 * `x-node-secret` correspondant, sinon 403 avant tout handler.
 * Secret vide = contrôle désactivé (déploiements locaux).
 */

use crate::health::HealthTracker;
use crate::identity::DeviceIdentity;
use crate::models::{ActivePair, SetActiveRequest, SetActiveResponse, StatusView};
use crate::mqtt::Outbox;
use crate::state::BridgeState;
use crate::targets::TargetOrigin;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

pub const SECRET_HEADER: &str = "x-node-secret";

#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeState,
    pub outbox: Outbox,
    pub command_topic: String,
    pub health: HealthTracker,
    /// Vide = garde désactivée.
    pub node_secret: Arc<str>,
}

pub fn build_router(app_state: AppState) -> Router {
    let guarded = Router::new()
        .route("/set-active-id", post(set_active_id))
        .route("/latest/{type}/{id}", get(get_latest))
        .route("/status", get(get_status))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_node_secret));

    Router::new()
        .route("/health", get(|| async { Json(json!({ "ok": true })) }))
        .merge(guarded)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

fn error_body(code: StatusCode, msg: &str) -> Response {
    (code, Json(json!({ "error": msg }))).into_response()
}

async fn require_node_secret(State(app): State<AppState>, req: Request, next: Next) -> Response {
    if app.node_secret.is_empty() {
        return next.run(req).await;
    }

    let ok = req
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == &*app.node_secret)
        .unwrap_or(false);

    if !ok {
        warn!(path = req.uri().path(), "rejected request without valid node secret");
        return error_body(StatusCode::FORBIDDEN, "forbidden");
    }
    next.run(req).await
}

/// Chaînes et nombres comptent comme présents ; chaîne vide, null et le reste non.
/// Un nombre est rendu en texte (`10` -> `"10"`), `0` compris.
fn field_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// POST /set-active-id
async fn set_active_id(
    State(app): State<AppState>,
    body: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Response {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let (Some(class), Some(id)) = (field_text(req.class.as_ref()), field_text(req.id.as_ref())) else {
        return error_body(StatusCode::BAD_REQUEST, "type & id required");
    };
    let Ok(identity) = DeviceIdentity::new(class, id) else {
        return error_body(StatusCode::BAD_REQUEST, "type & id required");
    };

    app.bridge
        .targets
        .set_active(&identity.class, &identity.instance_id, TargetOrigin::Http);

    if let Err(e) = app.outbox.publish(app.command_topic.as_str(), identity.encode()) {
        error!(error = %e, "set_id not forwarded to devices");
    }

    Json(SetActiveResponse {
        ok: true,
        active: ActivePair {
            class: identity.class,
            id: identity.instance_id,
        },
    })
    .into_response()
}

// GET /latest/{type}/{id}
async fn get_latest(State(app): State<AppState>, Path((class, id)): Path<(String, String)>) -> Response {
    let reading = DeviceIdentity::new(class, id)
        .ok()
        .and_then(|identity| app.bridge.readings.get(&identity));

    match reading {
        Some(r) => Json(r).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// GET /status
async fn get_status(State(app): State<AppState>) -> Json<StatusView> {
    Json(StatusView {
        ok: true,
        uptime_seconds: app.health.uptime_seconds(),
        mqtt_status: app.health.mqtt_status(),
        mqtt_reconnects: app.health.mqtt_reconnects(),
        readings_tracked: app.bridge.readings.len(),
        active: app.bridge.targets.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingress::Ingress;
    use crate::models::OutboundMessage;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    const CMD_TOPIC: &str = "posyandu/cmd/set_id";

    struct Harness {
        state: BridgeState,
        router: Router,
        published: UnboundedReceiver<OutboundMessage>,
    }

    impl Harness {
        fn new(secret: &str) -> Self {
            let state = BridgeState::new();
            let (outbox, published) = Outbox::channel();
            let router = build_router(AppState {
                bridge: state.clone(),
                outbox,
                command_topic: CMD_TOPIC.into(),
                health: HealthTracker::new(),
                node_secret: Arc::from(secret),
            });
            Self { state, router, published }
        }

        fn ingest(&self, topic: &str, payload: &str) {
            Ingress::new(&self.state, "posyandu/suhu/#", CMD_TOPIC).handle(topic, payload.as_bytes());
        }

        fn drain(&mut self) -> Vec<OutboundMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.published.try_recv() {
                out.push(msg);
            }
            out
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(req).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }
    }

    fn post_json(body: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/set-active-id")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(s) = secret {
            builder = builder.header(SECRET_HEADER, s);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(s) = secret {
            builder = builder.header(SECRET_HEADER, s);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = Harness::new("rahasia");
        let (status, body) = h.send(get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_set_active_publishes_once() {
        let mut h = Harness::new("");
        let (status, body) = h.send(post_json(r#"{"type":"balita","id":"7"}"#, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "active": { "type": "balita", "id": "7" } }));
        assert_eq!(h.state.targets.get_active("balita"), Some("7".into()));
        assert_eq!(
            h.drain(),
            vec![OutboundMessage { topic: CMD_TOPIC.into(), payload: "balita_7".into() }]
        );
    }

    #[tokio::test]
    async fn test_set_active_accepts_numeric_id() {
        let mut h = Harness::new("");
        let (status, body) = h.send(post_json(r#"{"type":"bayi","id":10}"#, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"]["id"], "10");
        assert_eq!(h.drain()[0].payload, "bayi_10");
    }

    #[tokio::test]
    async fn test_set_active_zero_id_is_a_device() {
        let mut h = Harness::new("");
        let (status, body) = h.send(post_json(r#"{"type":"bayi","id":0}"#, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"]["id"], "0");
        assert_eq!(h.drain()[0].payload, "bayi_0");

        let (status, _) = h.send(post_json(r#"{"type":"bayi","id":false}"#, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_set_active_missing_field() {
        let mut h = Harness::new("");
        for body in [r#"{"type":"bayi"}"#, r#"{"id":"1"}"#, r#"{"type":"","id":"1"}"#, r#"{"type":"bayi","id":null}"#, "not json", ""] {
            let (status, resp) = h.send(post_json(body, None)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(resp, json!({ "error": "type & id required" }));
        }
        assert!(h.state.targets.snapshot().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_latest_after_telemetry() {
        let h = Harness::new("");
        h.ingest("posyandu/suhu/bayi_10", "36.65");

        let (status, body) = h.send(get_req("/latest/bayi/10", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suhu"], json!(36.7));
        assert_eq!(body["topic"], "posyandu/suhu/bayi_10");
        assert!(body["ts"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_latest_without_data_is_no_content() {
        let h = Harness::new("");
        let (status, body) = h.send(get_req("/latest/balita/99", None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_guard_rejects_without_side_effects() {
        let mut h = Harness::new("rahasia");
        h.ingest("posyandu/suhu/bayi_10", "36.5");

        for secret in [None, Some("salah")] {
            let (status, body) = h.send(post_json(r#"{"type":"balita","id":"7"}"#, secret)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(body, json!({ "error": "forbidden" }));

            let (status, _) = h.send(get_req("/latest/bayi/10", secret)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
        assert!(h.state.targets.snapshot().is_empty());
        assert!(h.drain().is_empty());

        let (status, _) = h.send(post_json(r#"{"type":"balita","id":"7"}"#, Some("rahasia"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(h.drain().len(), 1);

        let (status, body) = h.send(get_req("/latest/bayi/10", Some("rahasia"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suhu"], json!(36.5));
    }

    #[tokio::test]
    async fn test_guard_checked_before_body_validation() {
        let h = Harness::new("rahasia");
        let (status, _) = h.send(post_json("{}", None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_status_reports_active_targets() {
        let h = Harness::new("");
        h.ingest("posyandu/cmd/set_id", "bayi_3");
        h.ingest("posyandu/suhu/bayi_3", "36.8");

        let (status, body) = h.send(get_req("/status", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], json!({ "bayi": "3" }));
        assert_eq!(body["readings_tracked"], 1);
        assert_eq!(body["mqtt_status"], "connecting");
    }
}
