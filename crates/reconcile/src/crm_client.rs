//! REST client for the external CRM.
//!
//! Every call walks the configured API hosts, and for each host first sends the
//! `Location-Id` scoped variant (when a location is configured) and then the plain one.
//! The first 2xx answer wins. Failures come back as data, never as `Err`: callers treat
//! an unavailable CRM as "field still unknown" and carry on with what they have.

use std::time::Duration;

use async_trait::async_trait;
use leadsync_core::config::CrmConfig;
use leadsync_core::envelope::{coerce_id, coerce_text, lookup};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Longest diagnostic text kept from a failed CRM answer.
pub const MAX_DETAIL_CHARS: usize = 300;

const LOCATION_HEADER: &str = "Location-Id";
const VERSION_HEADER: &str = "Version";

#[derive(Debug, Error)]
pub enum CrmClientError {
    #[error("failed to build CRM http client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CrmLookup<T> {
    Found(T),
    NotFound,
    Unavailable { status: Option<u16>, detail: String },
}

impl<T> CrmLookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// Outcome of a write-style CRM call.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CrmCallReport {
    pub ok: bool,
    pub status: Option<u16>,
    pub host: Option<String>,
    pub attempts: u32,
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpportunityDetail {
    pub id: Option<String>,
    pub assigned_user_external_id: Option<String>,
    pub stage_external_id: Option<String>,
    pub pipeline_external_id: Option<String>,
    pub contact_external_id: Option<String>,
    pub raw: Value,
}

impl OpportunityDetail {
    /// Reads an opportunity answer, which may or may not be wrapped in `opportunity`.
    pub fn from_json(raw: Value) -> Self {
        let inner = lookup(&raw, "opportunity").filter(|value| value.is_object()).unwrap_or(&raw);
        let id = |keys: &[&str]| keys.iter().find_map(|key| lookup(inner, key).and_then(coerce_id));

        Self {
            id: id(&["id", "_id"]),
            assigned_user_external_id: extract_assigned_user(&raw),
            stage_external_id: id(&["pipelineStageId", "stageId"]),
            pipeline_external_id: id(&["pipelineId"]),
            contact_external_id: id(&["contactId", "contact.id", "contact"]),
            raw,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContactDetail {
    pub id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub raw: Value,
}

impl ContactDetail {
    pub fn from_json(raw: Value) -> Self {
        let inner = lookup(&raw, "contact").filter(|value| value.is_object()).unwrap_or(&raw);
        let text = |key: &str| lookup(inner, key).and_then(coerce_text);

        Self {
            id: lookup(inner, "id").and_then(coerce_id),
            phone: text("phone"),
            email: text("email"),
            first_name: text("firstName"),
            last_name: text("lastName"),
            raw,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewOpportunity {
    pub name: String,
    pub contact_external_id: String,
    pub assigned_user_external_id: Option<String>,
    pub source: Option<String>,
}

/// The narrow CRM surface the reconciliation paths use.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// `false` when calls would short-circuit without touching the network.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn fetch_opportunity(&self, external_id: &str) -> CrmLookup<OpportunityDetail>;
    async fn fetch_contact(&self, external_id: &str) -> CrmLookup<ContactDetail>;
    async fn upsert_contact(&self, contact: &ContactUpsert) -> CrmCallReport;
    async fn create_opportunity(&self, opportunity: &NewOpportunity) -> CrmCallReport;
    async fn add_contact_tags(&self, contact_external_id: &str, tags: &[String]) -> CrmCallReport;
    async fn add_contact_note(&self, contact_external_id: &str, body: &str) -> CrmCallReport;
}

#[derive(Clone, Debug)]
pub struct CrmClientSettings {
    pub api_token: Option<SecretString>,
    pub location_id: Option<String>,
    pub api_hosts: Vec<String>,
    pub api_version: String,
    pub request_timeout: Duration,
    pub pipeline_id: Option<String>,
    pub pipeline_stage_id: Option<String>,
}

impl From<&CrmConfig> for CrmClientSettings {
    fn from(config: &CrmConfig) -> Self {
        Self {
            api_token: config.api_token.clone(),
            location_id: config.location_id.clone(),
            api_hosts: config.api_hosts.clone(),
            api_version: config.api_version.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            pipeline_id: config.pipeline_id.clone(),
            pipeline_stage_id: config.pipeline_stage_id.clone(),
        }
    }
}

pub struct HttpCrmClient {
    client: Client,
    settings: CrmClientSettings,
}

#[derive(Debug)]
enum CallOutcome {
    Success { status: u16, host: String, attempts: u32, body: Value },
    Failed { status: Option<u16>, all_not_found: bool, attempts: u32, detail: String },
}

impl HttpCrmClient {
    pub fn new(settings: CrmClientSettings) -> Result<Self, CrmClientError> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &CrmClientSettings {
        &self.settings
    }

    fn header_variants(&self) -> Vec<Option<&str>> {
        match self.settings.location_id.as_deref().filter(|value| !value.trim().is_empty()) {
            Some(location) => vec![Some(location), None],
            None => vec![None],
        }
    }

    async fn call(&self, method: Method, segments: &[&str], body: Option<&Value>) -> CallOutcome {
        let Some(token) = self.settings.api_token.as_ref() else {
            return CallOutcome::Failed {
                status: None,
                all_not_found: false,
                attempts: 0,
                detail: "crm api token is not configured".to_string(),
            };
        };

        let mut attempts = 0_u32;
        let mut last_status = None;
        let mut last_detail = String::from("no crm api host configured");
        let mut all_not_found = true;

        for host in &self.settings.api_hosts {
            let Some(url) = endpoint(host, segments) else {
                all_not_found = false;
                last_detail = truncate_detail(&format!("invalid crm api host `{host}`"));
                continue;
            };

            for location in self.header_variants() {
                attempts += 1;
                let mut request = self
                    .client
                    .request(method.clone(), url.clone())
                    .timeout(self.settings.request_timeout)
                    .header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
                    .header(VERSION_HEADER, &self.settings.api_version)
                    .header(ACCEPT, "application/json");
                if let Some(location) = location {
                    request = request.header(LOCATION_HEADER, location);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        let status = response.status().as_u16();
                        let text = response.text().await.unwrap_or_default();
                        let body = if text.trim().is_empty() {
                            Value::Null
                        } else {
                            serde_json::from_str(&text).unwrap_or(Value::String(text))
                        };
                        debug!(
                            event_name = "crm.call.succeeded",
                            host = %host,
                            status,
                            attempts,
                            scoped = location.is_some(),
                            "crm call succeeded"
                        );
                        return CallOutcome::Success { status, host: host.clone(), attempts, body };
                    }
                    Ok(response) => {
                        let status = response.status();
                        if status != StatusCode::NOT_FOUND {
                            all_not_found = false;
                        }
                        let text = response.text().await.unwrap_or_default();
                        last_status = Some(status.as_u16());
                        last_detail = truncate_detail(&text);
                        warn!(
                            event_name = "crm.call.rejected",
                            host = %host,
                            status = status.as_u16(),
                            scoped = location.is_some(),
                            detail = %last_detail,
                            "crm call returned non-success status"
                        );
                    }
                    Err(error) => {
                        all_not_found = false;
                        last_status = None;
                        last_detail = truncate_detail(&error.to_string());
                        warn!(
                            event_name = "crm.call.failed",
                            host = %host,
                            scoped = location.is_some(),
                            error = %error,
                            "crm call failed"
                        );
                    }
                }
            }
        }

        CallOutcome::Failed {
            status: last_status,
            all_not_found: all_not_found && attempts > 0,
            attempts,
            detail: last_detail,
        }
    }

    async fn lookup<T>(&self, segments: &[&str], parse: fn(Value) -> T) -> CrmLookup<T> {
        match self.call(Method::GET, segments, None).await {
            CallOutcome::Success { body, .. } => CrmLookup::Found(parse(body)),
            CallOutcome::Failed { all_not_found: true, .. } => CrmLookup::NotFound,
            CallOutcome::Failed { status, detail, .. } => CrmLookup::Unavailable { status, detail },
        }
    }

    async fn report(&self, method: Method, segments: &[&str], body: &Value) -> CrmCallReport {
        match self.call(method, segments, Some(body)).await {
            CallOutcome::Success { status, host, attempts, body } => CrmCallReport {
                ok: true,
                status: Some(status),
                host: Some(host),
                attempts,
                detail: None,
                body: Some(body),
            },
            CallOutcome::Failed { status, attempts, detail, .. } => CrmCallReport {
                ok: false,
                status,
                host: None,
                attempts,
                detail: Some(detail),
                body: None,
            },
        }
    }

    fn with_location(&self, mut body: Value) -> Value {
        if let (Some(location), Some(object)) =
            (self.settings.location_id.as_ref(), body.as_object_mut())
        {
            object.insert("locationId".to_string(), Value::String(location.clone()));
        }
        body
    }
}

#[async_trait]
impl CrmApi for HttpCrmClient {
    fn is_enabled(&self) -> bool {
        self.settings.api_token.is_some() && !self.settings.api_hosts.is_empty()
    }

    async fn fetch_opportunity(&self, external_id: &str) -> CrmLookup<OpportunityDetail> {
        self.lookup(&["opportunities", external_id], OpportunityDetail::from_json).await
    }

    async fn fetch_contact(&self, external_id: &str) -> CrmLookup<ContactDetail> {
        self.lookup(&["contacts", external_id], ContactDetail::from_json).await
    }

    async fn upsert_contact(&self, contact: &ContactUpsert) -> CrmCallReport {
        let body = self.with_location(json!(contact));
        self.report(Method::POST, &["contacts", "upsert"], &body).await
    }

    async fn create_opportunity(&self, opportunity: &NewOpportunity) -> CrmCallReport {
        let mut body = json!({
            "name": opportunity.name,
            "contactId": opportunity.contact_external_id,
            "status": "open",
        });
        if let Some(object) = body.as_object_mut() {
            let optional = [
                ("pipelineId", self.settings.pipeline_id.as_ref()),
                ("pipelineStageId", self.settings.pipeline_stage_id.as_ref()),
                ("assignedTo", opportunity.assigned_user_external_id.as_ref()),
                ("source", opportunity.source.as_ref()),
            ];
            for (key, value) in optional {
                if let Some(value) = value {
                    object.insert(key.to_string(), Value::String(value.clone()));
                }
            }
        }
        let body = self.with_location(body);
        self.report(Method::POST, &["opportunities", ""], &body).await
    }

    async fn add_contact_tags(&self, contact_external_id: &str, tags: &[String]) -> CrmCallReport {
        self.report(Method::POST, &["contacts", contact_external_id, "tags"], &json!({ "tags": tags }))
            .await
    }

    async fn add_contact_note(&self, contact_external_id: &str, body: &str) -> CrmCallReport {
        self.report(Method::POST, &["contacts", contact_external_id, "notes"], &json!({ "body": body }))
            .await
    }
}

/// Reads the assigned CRM user from an opportunity answer, wrapped or not.
pub fn extract_assigned_user(raw: &Value) -> Option<String> {
    const KEYS: [&str; 5] =
        ["assignedTo", "assignedUserId", "userId", "assigned_to.id", "assignedTo.id"];
    const WRAPPERS: [&str; 4] = ["", "opportunity.", "data.", "result."];

    WRAPPERS.iter().find_map(|wrapper| {
        KEYS.iter().find_map(|key| lookup(raw, &format!("{wrapper}{key}")).and_then(coerce_id))
    })
}

fn endpoint(host: &str, segments: &[&str]) -> Option<Url> {
    let mut url = Url::parse(host.trim()).ok()?;
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    Some(url)
}

pub fn truncate_detail(text: &str) -> String {
    text.chars().take(MAX_DETAIL_CHARS).collect()
}
