use chrono::{DateTime, Utc};
use leadsync_core::domain::lead::Lead;
use leadsync_core::domain::owner::OwnerId;
use leadsync_db::repositories::{LeadRepository, OwnerRepository};
use serde::Serialize;
use tracing::{info, warn};

use crate::outcome::{lookup_failed, write_failed, ReconcileError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerSource {
    Directory,
    LeadOwner,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerResolution {
    pub target: Option<OwnerId>,
    pub source: OwnerSource,
    /// The lead row was updated to `target`.
    pub changed: bool,
    /// An external user id was given but the directory has no such owner.
    pub directory_miss: bool,
}

/// Picks the owner an event implies for `lead` and applies it to the lead when it differs.
///
/// A directory hit on `external_user_id` wins; otherwise the lead keeps its owner.
/// No owner is ever invented.
pub async fn resolve_owner(
    owners: &dyn OwnerRepository,
    leads: &dyn LeadRepository,
    external_user_id: Option<&str>,
    lead: &mut Lead,
    now: DateTime<Utc>,
) -> Result<OwnerResolution, ReconcileError> {
    let mut directory_miss = false;
    let mut directory_hit = None;

    if let Some(external_user_id) = external_user_id {
        match owners.find_by_external_user_id(external_user_id).await.map_err(lookup_failed)? {
            Some(owner) => {
                if !owner.active {
                    warn!(
                        event_name = "reconcile.owner.inactive",
                        owner_id = %owner.id,
                        external_user_id,
                        "resolved owner is marked inactive"
                    );
                }
                directory_hit = Some(owner.id);
            }
            None => directory_miss = true,
        }
    }

    let Some(target) = directory_hit else {
        let source =
            if lead.owner_id.is_some() { OwnerSource::LeadOwner } else { OwnerSource::Unknown };
        return Ok(OwnerResolution {
            target: lead.owner_id.clone(),
            source,
            changed: false,
            directory_miss,
        });
    };

    let changed = lead.owner_id.as_ref() != Some(&target);
    if changed {
        leads.update_owner(&lead.id, &target, now).await.map_err(write_failed)?;
        info!(
            event_name = "reconcile.owner.changed",
            lead_id = %lead.id,
            previous_owner = ?lead.owner_id.as_ref().map(|owner| owner.0.as_str()),
            owner_id = %target,
            "lead owner updated"
        );
        lead.owner_id = Some(target.clone());
        lead.updated_at = now;
    }

    Ok(OwnerResolution { target: Some(target), source: OwnerSource::Directory, changed, directory_miss })
}
