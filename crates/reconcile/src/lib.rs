mod appointment;
pub mod crm_client;
pub mod engine;
pub mod enrichment;
pub mod identity;
mod lost;
pub mod outcome;
pub mod owner;
mod owner_change;
mod stage;

pub use crm_client::{
    ContactDetail, ContactUpsert, CrmApi, CrmCallReport, CrmClientError, CrmClientSettings,
    CrmLookup, HttpCrmClient, NewOpportunity, OpportunityDetail,
};
pub use engine::{EventContext, EventKind, ReconcileSettings, ReconciliationEngine};
pub use enrichment::{fetch_assigned_user, AssignmentLookup, AssignmentRetry};
pub use identity::{resolve_lead, MatchedBy, Resolution};
pub use outcome::{ReconcileError, SkipReason, WebhookResponse};
pub use owner::{resolve_owner, OwnerResolution, OwnerSource};
