use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::{Json, Router};
use leadsync_reconcile::{
    fetch_assigned_user, AssignmentRetry, ContactUpsert, CrmApi, CrmClientSettings, CrmLookup,
    HttpCrmClient, NewOpportunity,
};
use secrecy::SecretString;
use serde_json::{json, Value};

#[derive(Clone, Debug)]
struct Seen {
    path: String,
    location: Option<String>,
    authorization: Option<String>,
    version: Option<String>,
    body: Option<Value>,
}

type Behavior = fn(&Seen, usize) -> (StatusCode, Value);

#[derive(Clone)]
struct StandIn {
    seen: Arc<Mutex<Vec<Seen>>>,
    behavior: Behavior,
}

impl StandIn {
    fn hits(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock").clone()
    }
}

async fn answer(
    State(stand_in): State<StandIn>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_string);
    let seen = Seen {
        path: uri.path().to_string(),
        location: header("location-id"),
        authorization: header("authorization"),
        version: header("version"),
        body: serde_json::from_slice(&body).ok(),
    };
    let call_index = {
        let mut hits = stand_in.seen.lock().expect("lock");
        hits.push(seen.clone());
        hits.len()
    };
    let (status, payload) = (stand_in.behavior)(&seen, call_index);
    (status, Json(payload))
}

async fn spawn_crm(behavior: Behavior) -> (String, StandIn) {
    let stand_in = StandIn { seen: Arc::new(Mutex::new(Vec::new())), behavior };
    let router = Router::new().fallback(answer).with_state(stand_in.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
    let address = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (format!("http://{address}"), stand_in)
}

fn settings(hosts: Vec<String>, location: Option<&str>) -> CrmClientSettings {
    CrmClientSettings {
        api_token: Some(SecretString::from("test-token".to_string())),
        location_id: location.map(str::to_string),
        api_hosts: hosts,
        api_version: "2021-07-28".to_string(),
        request_timeout: Duration::from_secs(2),
        pipeline_id: Some("pipe-1".to_string()),
        pipeline_stage_id: Some("stg-1".to_string()),
    }
}

fn client(settings: CrmClientSettings) -> HttpCrmClient {
    HttpCrmClient::new(settings).expect("build client")
}

#[tokio::test]
async fn falls_back_to_the_second_host() {
    let (down, down_stand_in) =
        spawn_crm(|_, _| (StatusCode::SERVICE_UNAVAILABLE, json!({ "message": "maintenance" }))).await;
    let (up, _) = spawn_crm(|_, _| {
        (StatusCode::OK, json!({ "opportunity": { "id": "opp-1", "assignedTo": "user-7" } }))
    })
    .await;
    let crm = client(settings(vec![down, up], None));

    let lookup = crm.fetch_opportunity("opp-1").await;

    let detail = lookup.found().expect("opportunity found on second host");
    assert_eq!(detail.assigned_user_external_id.as_deref(), Some("user-7"));
    assert_eq!(down_stand_in.hits().len(), 1);
}

#[tokio::test]
async fn retries_without_location_header_when_scoped_call_is_rejected() {
    let (host, stand_in) = spawn_crm(|seen, _| match seen.location {
        Some(_) => (StatusCode::UNAUTHORIZED, json!({ "message": "location mismatch" })),
        None => (StatusCode::OK, json!({ "contact": { "id": "ct-1", "phone": "+51987654321" } })),
    })
    .await;
    let crm = client(settings(vec![host], Some("loc-1")));

    let lookup = crm.fetch_contact("ct-1").await;

    let contact = lookup.found().expect("contact found");
    assert_eq!(contact.phone.as_deref(), Some("+51987654321"));
    let hits = stand_in.hits();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].location.as_deref(), Some("loc-1"));
    assert_eq!(hits[1].location, None);
    assert_eq!(hits[0].path, "/contacts/ct-1");
    assert_eq!(hits[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(hits[0].version.as_deref(), Some("2021-07-28"));
}

#[tokio::test]
async fn not_found_everywhere_is_reported_as_not_found() {
    let (first, _) = spawn_crm(|_, _| (StatusCode::NOT_FOUND, json!({}))).await;
    let (second, _) = spawn_crm(|_, _| (StatusCode::NOT_FOUND, json!({}))).await;
    let crm = client(settings(vec![first, second], Some("loc-1")));

    let lookup = crm.fetch_opportunity("missing").await;

    assert_eq!(lookup, CrmLookup::NotFound);
}

#[tokio::test]
async fn failure_detail_is_truncated() {
    let (host, _) = spawn_crm(|_, _| {
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "message": "x".repeat(1_000) }))
    })
    .await;
    let crm = client(settings(vec![host], None));

    match crm.fetch_opportunity("opp-1").await {
        CrmLookup::Unavailable { status, detail } => {
            assert_eq!(status, Some(500));
            assert_eq!(detail.chars().count(), 300);
        }
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_token_short_circuits_without_network() {
    let (host, stand_in) = spawn_crm(|_, _| (StatusCode::OK, json!({}))).await;
    let mut settings = settings(vec![host], None);
    settings.api_token = None;
    let crm = client(settings);

    let lookup = crm.fetch_opportunity("opp-1").await;

    assert!(!crm.is_enabled());
    assert!(matches!(lookup, CrmLookup::Unavailable { status: None, .. }));
    assert!(stand_in.hits().is_empty());
}

#[tokio::test]
async fn create_opportunity_uses_configured_pipeline() {
    let (host, stand_in) =
        spawn_crm(|_, _| (StatusCode::CREATED, json!({ "opportunity": { "id": "opp-new" } }))).await;
    let crm = client(settings(vec![host], Some("loc-1")));

    let report = crm
        .create_opportunity(&NewOpportunity {
            name: "Ana Torres".to_string(),
            contact_external_id: "ct-1".to_string(),
            assigned_user_external_id: None,
            source: Some("feria".to_string()),
        })
        .await;

    assert!(report.ok);
    assert_eq!(report.status, Some(201));
    let hits = stand_in.hits();
    assert_eq!(hits[0].path, "/opportunities/");
    let sent = hits[0].body.clone().expect("json body");
    assert_eq!(sent["pipelineId"], json!("pipe-1"));
    assert_eq!(sent["pipelineStageId"], json!("stg-1"));
    assert_eq!(sent["status"], json!("open"));
    assert_eq!(sent["locationId"], json!("loc-1"));
}

#[tokio::test]
async fn contact_writes_post_to_their_endpoints() {
    let (host, stand_in) = spawn_crm(|_, _| (StatusCode::OK, json!({ "contact": { "id": "ct-1" } }))).await;
    let crm = client(settings(vec![host], Some("loc-1")));

    let upsert = crm
        .upsert_contact(&ContactUpsert {
            first_name: Some("Ana".to_string()),
            phone: Some("+51999111222".to_string()),
            tags: vec!["feria".to_string()],
            ..ContactUpsert::default()
        })
        .await;
    let tags = crm.add_contact_tags("ct-1", &["visita".to_string()]).await;
    let note = crm.add_contact_note("ct-1", "llamar el lunes").await;

    assert!(upsert.ok && tags.ok && note.ok);
    let hits = stand_in.hits();
    let paths: Vec<&str> = hits.iter().map(|hit| hit.path.as_str()).collect();
    assert_eq!(paths, ["/contacts/upsert", "/contacts/ct-1/tags", "/contacts/ct-1/notes"]);

    let sent = hits[0].body.clone().expect("upsert body");
    assert_eq!(sent["firstName"], json!("Ana"));
    assert_eq!(sent["locationId"], json!("loc-1"));
    assert!(sent.get("email").is_none());
    assert_eq!(hits[1].body.clone().expect("tags body")["tags"], json!(["visita"]));
    assert_eq!(hits[2].body.clone().expect("note body")["body"], json!("llamar el lunes"));
}

#[tokio::test]
async fn assignment_retry_stops_at_first_hit() {
    let (host, stand_in) = spawn_crm(|_, call_index| {
        if call_index < 2 {
            (StatusCode::OK, json!({ "opportunity": { "id": "opp-1" } }))
        } else {
            (StatusCode::OK, json!({ "opportunity": { "id": "opp-1", "assignedTo": "user-9" } }))
        }
    })
    .await;
    let crm = client(settings(vec![host], None));

    let lookup = fetch_assigned_user(
        &crm,
        "opp-1",
        AssignmentRetry { attempts: 4, delay: Duration::from_millis(5) },
    )
    .await;

    assert_eq!(lookup.assigned_user_external_id.as_deref(), Some("user-9"));
    assert_eq!(lookup.attempts, 2);
    assert_eq!(stand_in.hits().len(), 2);
}
