use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::lead::LeadId;
use crate::domain::owner::OwnerId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(pub String);

/// Contact fields captured alongside an appointment, kept as a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub external_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    pub id: AppointmentId,
    pub external_appointment_id: String,
    pub external_opportunity_id: Option<String>,
    pub external_calendar_id: Option<String>,
    pub calendar_key: String,
    pub calendar_name: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub status: String,
    pub location: Option<String>,
    pub meeting_url: Option<String>,
    pub lead_id: Option<LeadId>,
    pub owner_id: Option<OwnerId>,
    pub contact: ContactSnapshot,
    pub raw_payload: Value,
    pub created_at: DateTime<Utc>,
}
