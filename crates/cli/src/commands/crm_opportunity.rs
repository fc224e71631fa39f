use leadsync_reconcile::{CrmApi, CrmClientSettings, CrmLookup, HttpCrmClient};

use crate::commands::{prepare, CommandResult};

pub fn run(opportunity_id: &str) -> CommandResult {
    let (config, runtime) = match prepare("crm-opportunity") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let crm = match HttpCrmClient::new(CrmClientSettings::from(&config.crm)) {
        Ok(crm) => crm,
        Err(error) => {
            return CommandResult::failure("crm-opportunity", "crm_client", error.to_string(), 7)
        }
    };
    if !crm.is_enabled() {
        return CommandResult::failure(
            "crm-opportunity",
            "config_validation",
            "crm.api_token is not configured",
            2,
        );
    }

    match runtime.block_on(crm.fetch_opportunity(opportunity_id)) {
        CrmLookup::Found(detail) => {
            let id = detail.id.as_deref().unwrap_or(opportunity_id);
            let assigned = detail.assigned_user_external_id.as_deref().unwrap_or("<none>");
            let stage = detail.stage_external_id.as_deref().unwrap_or("<none>");
            CommandResult::success(
                "crm-opportunity",
                format!("opportunity {id} assigned_to={assigned} stage={stage} raw={}", detail.raw),
            )
        }
        CrmLookup::NotFound => CommandResult::failure(
            "crm-opportunity",
            "crm_not_found",
            format!("opportunity `{opportunity_id}` was not found on any configured host"),
            7,
        ),
        CrmLookup::Unavailable { status, detail } => CommandResult::failure(
            "crm-opportunity",
            "crm_unavailable",
            match status {
                Some(status) => format!("crm answered {status}: {detail}"),
                None => format!("crm unreachable: {detail}"),
            },
            8,
        ),
    }
}
