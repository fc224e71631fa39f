//! Canonical envelopes for inbound CRM webhook payloads.
//!
//! The CRM delivers the same logical event in several layouts depending on the workflow
//! that fired it. Each layout is a [`PayloadShape`] with its own key table; a field is taken
//! from the first shape (in priority order) that carries it.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::appointment::ContactSnapshot;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Parses a raw request body. An empty body is read as an empty object.
pub fn parse_body(body: &[u8]) -> Result<Value, EnvelopeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|error| EnvelopeError::InvalidJson(error.to_string()))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    TopLevel,
    CustomData,
    Opportunity,
    NestedOpportunity,
    PairList,
    BareOpportunity,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub opportunity_external_id: Option<String>,
    pub stage_name_raw: Option<String>,
    pub stage_external_id: Option<String>,
    pub assigned_user_external_id: Option<String>,
    pub contact_external_id: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub pipeline_external_id: Option<String>,
    pub location_external_id: Option<String>,
    pub lead_hint: Option<String>,
    pub owner_hint: Option<String>,
    pub lost_source: Option<String>,
    pub reason_not_interested: Option<String>,
    pub reason_not_reachable: Option<String>,
    pub shapes: Vec<PayloadShape>,
}

impl EventEnvelope {
    pub fn from_payload(payload: &Value) -> Self {
        let views = shape_views(payload);
        let id = |field: fn(&FieldKeys) -> &'static [&'static str]| first_match(&views, field, coerce_id);
        let text =
            |field: fn(&FieldKeys) -> &'static [&'static str]| first_match(&views, field, coerce_text);

        Self {
            opportunity_external_id: id(|keys| keys.opportunity_id),
            stage_name_raw: text(|keys| keys.stage_name),
            stage_external_id: id(|keys| keys.stage_id),
            assigned_user_external_id: id(|keys| keys.assigned_user),
            contact_external_id: id(|keys| keys.contact_id),
            contact_phone: text(|keys| keys.phone),
            contact_email: text(|keys| keys.email),
            pipeline_external_id: id(|keys| keys.pipeline_id),
            location_external_id: id(|keys| keys.location_id),
            lead_hint: id(|keys| keys.lead_hint),
            owner_hint: id(|keys| keys.owner_hint),
            lost_source: text(|keys| keys.lost_source),
            reason_not_interested: text(|keys| keys.reason_not_interested),
            reason_not_reachable: text(|keys| keys.reason_not_reachable),
            shapes: views.iter().map(|view| view.shape).collect(),
        }
    }

    /// Fills the location from a transport-level header when the body carried none.
    pub fn with_location_fallback(mut self, location: Option<&str>) -> Self {
        if self.location_external_id.is_none() {
            self.location_external_id =
                location.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string);
        }
        self
    }

    /// `true` when no location is expected or the event carries the expected one.
    pub fn location_matches(&self, expected: Option<&str>) -> bool {
        match expected.map(str::trim).filter(|value| !value.is_empty()) {
            Some(expected) => self.location_external_id.as_deref() == Some(expected),
            None => true,
        }
    }
}

struct FieldKeys {
    opportunity_id: &'static [&'static str],
    stage_name: &'static [&'static str],
    stage_id: &'static [&'static str],
    assigned_user: &'static [&'static str],
    contact_id: &'static [&'static str],
    phone: &'static [&'static str],
    email: &'static [&'static str],
    pipeline_id: &'static [&'static str],
    location_id: &'static [&'static str],
    lead_hint: &'static [&'static str],
    owner_hint: &'static [&'static str],
    lost_source: &'static [&'static str],
    reason_not_interested: &'static [&'static str],
    reason_not_reachable: &'static [&'static str],
}

const FLAT_KEYS: FieldKeys = FieldKeys {
    opportunity_id: &["opportunityId", "opportunity_id", "hl_opportunity_id"],
    stage_name: &["pipelineStageName", "stageName", "stage_name", "hl_stage_name"],
    stage_id: &["pipelineStageId", "stageId", "stage_id", "hl_stage"],
    assigned_user: &[
        "assignedUserId",
        "userId",
        "user.id",
        "assigned_to",
        "assigned_to.id",
        "assignedTo",
        "assignedTo.id",
    ],
    contact_id: &["contactId", "contact_id", "contact.id"],
    phone: &["phone", "contactPhone", "celular", "contact.phone"],
    email: &["email", "contactEmail", "contact.email"],
    pipeline_id: &["pipelineId", "pipeline_id", "hl_pipeline"],
    location_id: &["locationId", "location_id", "Location-Id", "location.id"],
    lead_hint: &["prospecto_id", "leadId", "lead_id"],
    owner_hint: &["asesor_id", "ownerId", "owner_id"],
    lost_source: &["source"],
    reason_not_interested: &["razon_no_interesado"],
    reason_not_reachable: &["razon_no_contactable"],
};

const OPPORTUNITY_KEYS: FieldKeys = FieldKeys {
    opportunity_id: &["id", "opportunityId"],
    stage_name: &["pipelineStageName", "stageName", "stage_name"],
    stage_id: &["pipelineStageId", "stageId"],
    assigned_user: &[
        "assignedUserId",
        "userId",
        "user.id",
        "assigned_to",
        "assigned_to.id",
        "assignedTo",
        "assignedTo.id",
    ],
    contact_id: &["contactId", "contact.id"],
    phone: &["contact.phone", "phone"],
    email: &["contact.email", "email"],
    pipeline_id: &["pipelineId"],
    location_id: &["locationId"],
    lead_hint: &[],
    owner_hint: &[],
    lost_source: &[],
    reason_not_interested: &[],
    reason_not_reachable: &[],
};

const PAIR_LIST_CONTAINERS: [&str; 3] = ["customData", "customFields", "fields"];

struct ShapeView<'a> {
    shape: PayloadShape,
    root: Cow<'a, Value>,
    keys: &'static FieldKeys,
}

fn shape_views(payload: &Value) -> Vec<ShapeView<'_>> {
    let mut views = Vec::new();
    if !payload.is_object() {
        return views;
    }

    views.push(ShapeView { shape: PayloadShape::TopLevel, root: Cow::Borrowed(payload), keys: &FLAT_KEYS });

    if let Some(custom) = payload.get("customData").filter(|value| value.is_object()) {
        views.push(ShapeView {
            shape: PayloadShape::CustomData,
            root: Cow::Borrowed(custom),
            keys: &FLAT_KEYS,
        });
    }

    let opportunity = payload.get("opportunity").filter(|value| value.is_object());
    if let Some(opportunity) = opportunity {
        views.push(ShapeView {
            shape: PayloadShape::Opportunity,
            root: Cow::Borrowed(opportunity),
            keys: &OPPORTUNITY_KEYS,
        });
    }

    let nested = lookup(payload, "payload.opportunity").filter(|value| value.is_object());
    if let Some(nested) = nested {
        views.push(ShapeView {
            shape: PayloadShape::NestedOpportunity,
            root: Cow::Borrowed(nested),
            keys: &OPPORTUNITY_KEYS,
        });
    }

    if let Some(pairs) = flatten_pair_list(payload) {
        views.push(ShapeView {
            shape: PayloadShape::PairList,
            root: Cow::Owned(Value::Object(pairs)),
            keys: &FLAT_KEYS,
        });
    }

    if opportunity.is_none() && nested.is_none() {
        views.push(ShapeView {
            shape: PayloadShape::BareOpportunity,
            root: Cow::Borrowed(payload),
            keys: &OPPORTUNITY_KEYS,
        });
    }

    views
}

fn flatten_pair_list(payload: &Value) -> Option<Map<String, Value>> {
    let entries = PAIR_LIST_CONTAINERS
        .iter()
        .find_map(|container| payload.get(*container).and_then(Value::as_array))?;

    let mut flattened = Map::new();
    for entry in entries {
        let Some(key) = ["key", "name"].iter().find_map(|field| entry.get(*field)?.as_str()) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || flattened.contains_key(key) {
            continue;
        }
        if let Some(value) = entry.get("value").filter(|value| !value.is_null()) {
            flattened.insert(key.to_string(), value.clone());
        }
    }

    (!flattened.is_empty()).then_some(flattened)
}

fn first_match(
    views: &[ShapeView<'_>],
    field: fn(&FieldKeys) -> &'static [&'static str],
    coerce: fn(&Value) -> Option<String>,
) -> Option<String> {
    views.iter().find_map(|view| {
        field(view.keys).iter().find_map(|key| lookup(&view.root, key).and_then(coerce))
    })
}

/// Dotted-path lookup; `null` counts as absent.
pub fn lookup<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

/// Strings, numbers and objects carrying a scalar `id` all count as identifiers.
pub fn coerce_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("id").and_then(coerce_text),
        other => coerce_text(other),
    }
}

pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Appointment-created payload. The root is `customData` when present, with
/// `appointment.*` and `contact.*` paths read from the full body as fallbacks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentEnvelope {
    pub appointment_external_id: Option<String>,
    pub calendar_external_id: Option<String>,
    pub calendar_key: Option<String>,
    pub calendar_name: Option<String>,
    pub status: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub meeting_url: Option<String>,
    pub location: Option<String>,
    pub opportunity_external_id: Option<String>,
    pub assigned_user_external_id: Option<String>,
    pub contact: ContactSnapshot,
}

impl AppointmentEnvelope {
    pub fn from_payload(payload: &Value) -> Self {
        let root = payload.get("customData").filter(|value| value.is_object()).unwrap_or(payload);

        let pick = |root_keys: &[&str], body_keys: &[&str], coerce: fn(&Value) -> Option<String>| {
            root_keys
                .iter()
                .find_map(|key| lookup(root, key).and_then(coerce))
                .or_else(|| body_keys.iter().find_map(|key| lookup(payload, key).and_then(coerce)))
        };
        let pick_time = |root_keys: &[&str], body_keys: &[&str]| {
            root_keys
                .iter()
                .find_map(|key| lookup(root, key).and_then(parse_timestamp))
                .or_else(|| body_keys.iter().find_map(|key| lookup(payload, key).and_then(parse_timestamp)))
        };

        Self {
            appointment_external_id: pick(
                &["hl_appointment_id", "appointmentId"],
                &["appointment.id"],
                coerce_id,
            ),
            calendar_external_id: pick(
                &["hl_calendar_id", "calendarId"],
                &["appointment.calendar_id", "appointment.calendarId"],
                coerce_id,
            ),
            calendar_key: pick(&["calendar_key"], &[], coerce_text)
                .map(|key| key.to_lowercase()),
            calendar_name: pick(&["calendar_name"], &["appointment.calendar_name"], coerce_text),
            status: pick(&["status"], &["appointment.status", "appointment.appointmentStatus"], coerce_text),
            starts_at: pick_time(
                &["start_time", "startTime"],
                &["appointment.start_time", "appointment.startTime"],
            ),
            ends_at: pick_time(&["end_time", "endTime"], &["appointment.end_time", "appointment.endTime"]),
            meeting_url: pick(&["meeting_url"], &["appointment.meeting_url"], coerce_text),
            location: pick(&["location"], &["appointment.location"], coerce_text),
            opportunity_external_id: pick(
                &["hl_opportunity_id"],
                &["opportunity.id", "payload.opportunityId", "opportunityId"],
                coerce_id,
            ),
            assigned_user_external_id: pick(
                &[],
                &["user.id", "assignedUserId", "assigned_to.id"],
                coerce_id,
            ),
            contact: ContactSnapshot {
                external_id: pick(&[], &["contact.id"], coerce_id),
                first_name: pick(
                    &[],
                    &["contact.firstName", "contact.first_name", "first_name"],
                    coerce_text,
                ),
                last_name: pick(
                    &[],
                    &["contact.lastName", "contact.last_name", "last_name"],
                    coerce_text,
                ),
                email: pick(&[], &["contact.email", "email"], coerce_text),
                phone: pick(&[], &["contact.phone", "phone"], coerce_text),
            },
        }
    }

    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.appointment_external_id.is_none() {
            missing.push("hl_appointment_id");
        }
        if self.starts_at.is_none() {
            missing.push("start_time");
        }
        if self.calendar_key.is_none() {
            missing.push("calendar_key");
        }
        missing
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (read as UTC) or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(naive.and_utc());
                }
            }
            text.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
        }
        _ => None,
    }
}
