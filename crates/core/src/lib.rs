pub mod config;
pub mod domain;
pub mod envelope;
pub mod errors;
pub mod stage_machine;

pub use domain::appointment::{AppointmentId, AppointmentRecord, ContactSnapshot};
pub use domain::history::{HistorySource, StageHistoryId, StageHistoryRecord};
pub use domain::lead::{Lead, LeadId};
pub use domain::lost::{LostOpportunityId, LostOpportunityRecord, LostSource};
pub use domain::owner::{Owner, OwnerId};
pub use domain::stage::{StageCode, StageMapping, StageMatch, StageMatchKind};
pub use envelope::{AppointmentEnvelope, EnvelopeError, EventEnvelope, PayloadShape};
pub use errors::DomainError;
pub use stage_machine::{decide_transition, DedupWindows, SuppressionTier, TransitionDecision};
