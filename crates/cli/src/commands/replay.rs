use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use leadsync_core::config::AppConfig;
use leadsync_core::domain::lead::{Lead, LeadId};
use leadsync_core::domain::owner::{Owner, OwnerId};
use leadsync_core::domain::stage::StageCode;
use leadsync_core::envelope::{parse_body, AppointmentEnvelope, EventEnvelope};
use leadsync_db::Repositories;
use leadsync_reconcile::{
    CrmClientSettings, EventContext, EventKind, HttpCrmClient, ReconcileSettings,
    ReconciliationEngine,
};
use uuid::Uuid;

use crate::commands::seed_stages::{load_stage_file, save_stages};
use crate::commands::{migrated_pool, prepare, CommandResult, StepError};

pub fn run(kind: &str, file: &Path, in_memory: bool, stages: Option<&Path>) -> CommandResult {
    let Some(kind) = EventKind::parse(kind) else {
        let known = EventKind::ALL.map(|kind| kind.as_str()).join(", ");
        return CommandResult::failure(
            "replay",
            "invalid_kind",
            format!("unknown event kind `{kind}` (expected one of: {known})"),
            6,
        );
    };
    let body = match fs::read(file) {
        Ok(body) => body,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "payload_file",
                format!("could not read `{}`: {error}", file.display()),
                6,
            )
        }
    };
    let (config, runtime) = match prepare("replay") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let crm = HttpCrmClient::new(CrmClientSettings::from(&config.crm))
            .map_err(|error| ("crm_client", error.to_string(), 7u8))?;
        let context = EventContext {
            correlation_id: format!("replay-{}", Uuid::new_v4()),
            location_header: None,
            debug: true,
            replay: true,
        };

        if in_memory {
            let repos = Repositories::in_memory();
            if let Some(stages) = stages {
                save_stages(&repos, load_stage_file(stages)?).await?;
            }
            seed_from_payload(&repos, &config, kind, &body).await?;
            let engine = ReconciliationEngine::new(
                repos,
                Arc::new(crm),
                ReconcileSettings::from(&config),
            );
            return Ok(engine.handle(kind, &body, &context).await);
        }

        let pool = migrated_pool(&config).await?;
        let engine = ReconciliationEngine::new(
            Repositories::sql(pool.clone()),
            Arc::new(crm),
            ReconcileSettings::from(&config),
        );
        let response = engine.handle(kind, &body, &context).await;
        pool.close().await;
        Ok::<_, StepError>(response)
    });

    match result {
        Ok(response) => {
            let outcome = response.outcome_label();
            match serde_json::to_string(&response) {
                Ok(rendered) => CommandResult::success("replay", format!("{outcome}: {rendered}")),
                Err(error) => CommandResult::failure("replay", "serialization", error.to_string(), 8),
            }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("replay", error_class, message, exit_code)
        }
    }
}

/// An empty store resolves nothing, so the in-memory replay creates the lead the payload
/// points at (at the configured initial stage) and a directory entry for its assigned user.
async fn seed_from_payload(
    repos: &Repositories,
    config: &AppConfig,
    kind: EventKind,
    body: &[u8],
) -> Result<(), StepError> {
    let Ok(payload) = parse_body(body) else {
        return Ok(());
    };
    let now = Utc::now();
    let persistence = |error: leadsync_db::RepositoryError| ("persistence", error.to_string(), 5u8);

    let envelope = match kind {
        EventKind::AppointmentCreated => {
            let appointment = AppointmentEnvelope::from_payload(&payload);
            EventEnvelope {
                opportunity_external_id: appointment.opportunity_external_id,
                assigned_user_external_id: appointment.assigned_user_external_id,
                contact_phone: appointment.contact.phone,
                contact_email: appointment.contact.email,
                ..EventEnvelope::default()
            }
        }
        _ => EventEnvelope::from_payload(&payload),
    };

    if let Some(user) = envelope.assigned_user_external_id.as_deref() {
        repos
            .owners
            .save(Owner {
                id: OwnerId(format!("replay-{user}")),
                external_user_id: user.to_string(),
                display_name: None,
                active: true,
                created_at: now,
            })
            .await
            .map_err(persistence)?;
    }

    let has_identity = envelope.opportunity_external_id.is_some()
        || envelope.contact_phone.is_some()
        || envelope.contact_email.is_some();
    if !has_identity {
        return Ok(());
    }

    let mut lead = Lead::new(
        LeadId(envelope.lead_hint.clone().unwrap_or_else(|| format!("replay-{}", Uuid::new_v4()))),
        StageCode(config.reconcile.initial_stage.clone()),
        now,
    );
    if let Some(opportunity) = envelope.opportunity_external_id.as_deref() {
        lead = lead.with_opportunity(opportunity);
    }
    if let Some(phone) = envelope.contact_phone.as_deref() {
        lead = lead.with_phone(phone);
    }
    if let Some(email) = envelope.contact_email.as_deref() {
        lead = lead.with_email(email);
    }
    repos.leads.save(lead).await.map_err(persistence)
}
