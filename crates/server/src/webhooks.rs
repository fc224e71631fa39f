//! Inbound CRM webhook routes.
//!
//! Every delivery is answered with HTTP 200 and a JSON outcome, whatever happened while
//! reconciling it, so the CRM never retries. Only unsupported methods get a 405.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use leadsync_reconcile::{
    EventContext, EventKind, ReconciliationEngine, SkipReason, WebhookResponse,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

const ALLOWED_METHODS: &str = "POST,GET,HEAD,OPTIONS";
const DEBUG_HEADER: &str = "x-debug";
const REQUEST_ID_HEADER: &str = "x-request-id";
const LOCATION_HEADER: &str = "location-id";

#[derive(Clone)]
pub struct WebhookState {
    engine: Arc<ReconciliationEngine>,
}

pub fn router(engine: Arc<ReconciliationEngine>, max_body_bytes: u64) -> Router {
    Router::new()
        .route("/api/crm/stage-change", event_route(EventKind::StageChange))
        .route("/api/crm/owner-change", event_route(EventKind::OwnerChange))
        .route("/api/crm/webhook", event_route(EventKind::OwnerChange))
        .route("/api/crm/opportunity-lost", event_route(EventKind::OpportunityLost))
        .route("/api/crm/appointment-created", event_route(EventKind::AppointmentCreated))
        .layer(DefaultBodyLimit::max(usize::try_from(max_body_bytes).unwrap_or(usize::MAX)))
        .with_state(WebhookState { engine })
}

/// `GET` also answers `HEAD`.
fn event_route(kind: EventKind) -> MethodRouter<WebhookState> {
    get(acknowledge)
        .options(acknowledge)
        .post(
            move |State(state): State<WebhookState>,
                  headers: HeaderMap,
                  body: Result<Bytes, BytesRejection>| async move {
                receive(state, kind, headers, body).await
            },
        )
        .fallback(method_not_allowed)
}

async fn receive(
    state: WebhookState,
    kind: EventKind,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> (StatusCode, Json<WebhookResponse>) {
    let context = EventContext {
        correlation_id: header_value(&headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        location_header: header_value(&headers, LOCATION_HEADER),
        debug: header_value(&headers, DEBUG_HEADER)
            .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true")),
        replay: false,
    };
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(
                event_name = "http.webhook.body_rejected",
                kind = kind.as_str(),
                correlation_id = %context.correlation_id,
                status = rejection.status().as_u16(),
                error = %rejection.body_text(),
                "webhook body could not be read"
            );
            let reason = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                SkipReason::PayloadTooLarge
            } else {
                SkipReason::InvalidJson
            };
            return (StatusCode::OK, Json(WebhookResponse::skipped(reason)));
        }
    };
    info!(
        event_name = "http.webhook.received",
        kind = kind.as_str(),
        correlation_id = %context.correlation_id,
        bytes = body.len(),
        "webhook delivery received"
    );

    let response = state.engine.handle(kind, &body, &context).await;
    (StatusCode::OK, Json(response))
}

async fn acknowledge() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOWED_METHODS)],
        Json(json!({ "ok": false, "error": "METHOD_NOT_ALLOWED" })),
    )
        .into_response()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use leadsync_core::config::AppConfig;
    use leadsync_core::domain::lead::{Lead, LeadId};
    use leadsync_core::domain::stage::{StageCode, StageMapping};
    use leadsync_db::Repositories;
    use leadsync_reconcile::{
        CrmClientSettings, HttpCrmClient, ReconcileSettings, ReconciliationEngine,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    async fn app() -> (Router, Repositories) {
        let repos = Repositories::in_memory();
        for (code, label, position) in [("PROSPECCION", "Prospección", 1), ("VISITA", "Visita", 2)] {
            repos
                .stages
                .save(StageMapping {
                    code: StageCode(code.to_string()),
                    label: label.to_string(),
                    external_stage_id: None,
                    position,
                })
                .await
                .expect("save stage");
        }
        repos
            .leads
            .save(
                Lead::new(LeadId("L-1".to_string()), StageCode("PROSPECCION".to_string()), Utc::now())
                    .with_opportunity("opp-1"),
            )
            .await
            .expect("save lead");

        let config = AppConfig::default();
        let crm = HttpCrmClient::new(CrmClientSettings::from(&config.crm)).expect("crm client");
        let engine = ReconciliationEngine::new(
            repos.clone(),
            Arc::new(crm),
            ReconcileSettings::from(&config),
        );
        (router(Arc::new(engine), 1024), repos)
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Option<String>, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let allow = response
            .headers()
            .get(header::ALLOW)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, allow, payload)
    }

    #[tokio::test]
    async fn stage_change_is_applied_through_the_route() {
        let (app, repos) = app().await;

        let (status, _, payload) = call(
            app,
            Method::POST,
            "/api/crm/stage-change",
            r#"{"opportunityId":"opp-1","stageName":"Visita"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["ok"], json!(true));
        assert_eq!(payload["saved"], json!(true));
        let lead = repos.leads.find_by_id(&LeadId("L-1".to_string())).await.expect("find").expect("lead");
        assert_eq!(lead.current_stage, StageCode("VISITA".to_string()));
    }

    #[tokio::test]
    async fn malformed_json_still_answers_ok() {
        let (app, _) = app().await;

        let (status, _, payload) =
            call(app, Method::POST, "/api/crm/opportunity-lost", "{not json").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["ok"], json!(true));
        assert_eq!(payload["skip"], json!("INVALID_JSON"));
    }

    #[tokio::test]
    async fn oversized_body_is_acknowledged_unread() {
        let (app, repos) = app().await;
        let padding = "x".repeat(4096);
        let body = format!(r#"{{"opportunityId":"opp-1","stageName":"Visita","note":"{padding}"}}"#);

        let (status, _, payload) = call(app, Method::POST, "/api/crm/stage-change", &body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["ok"], json!(true));
        assert_eq!(payload["skip"], json!("PAYLOAD_TOO_LARGE"));
        let lead = repos.leads.find_by_id(&LeadId("L-1".to_string())).await.expect("find");
        assert_eq!(lead.map(|lead| lead.current_stage), Some(StageCode("PROSPECCION".to_string())));
    }

    #[tokio::test]
    async fn webhook_alias_routes_to_owner_change() {
        let (app, _) = app().await;

        let (status, _, payload) =
            call(app, Method::POST, "/api/crm/webhook", r#"{"opportunityId":"opp-1"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["skip"], json!("NO_ASSIGNED_USER"));
    }

    #[tokio::test]
    async fn probes_are_acknowledged() {
        for method in [Method::GET, Method::OPTIONS] {
            let (app, _) = app().await;
            let (status, _, payload) = call(app, method, "/api/crm/appointment-created", "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(payload, json!({ "ok": true }));
        }

        let (app, _) = app().await;
        let (status, _, _) = call(app, Method::HEAD, "/api/crm/stage-change", "").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected_with_allow_header() {
        let (app, _) = app().await;

        let (status, allow, payload) = call(app, Method::DELETE, "/api/crm/stage-change", "").await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(allow.as_deref(), Some("POST,GET,HEAD,OPTIONS"));
        assert_eq!(payload, json!({ "ok": false, "error": "METHOD_NOT_ALLOWED" }));
    }

    #[tokio::test]
    async fn debug_header_attaches_debug_object() {
        let (app, _) = app().await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/crm/stage-change")
            .header("x-debug", "1")
            .header("x-request-id", "req-42")
            .body(Body::from(r#"{"opportunityId":"opp-1","stageName":"Prospección"}"#))
            .expect("request");

        let response = app.oneshot(request).await.expect("response");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: Value = serde_json::from_slice(&bytes).expect("json body");

        assert_eq!(payload["skip"], json!("SAME_STAGE"));
        assert_eq!(payload["debug"]["correlationId"], json!("req-42"));
        assert_eq!(payload["debug"]["env"]["hasToken"], json!(false));
    }
}
