use std::fs;
use std::path::Path;

use leadsync_core::domain::stage::StageMapping;
use leadsync_db::Repositories;
use serde::Deserialize;

use crate::commands::{migrated_pool, prepare, CommandResult, StepError};

#[derive(Debug, Deserialize)]
struct StageFile {
    #[serde(default, rename = "stage")]
    stages: Vec<StageMapping>,
}

/// Reads a `[[stage]]` TOML document. Codes must be non-empty and unique.
pub fn load_stage_file(path: &Path) -> Result<Vec<StageMapping>, StepError> {
    let raw = fs::read_to_string(path).map_err(|error| {
        ("stage_file", format!("could not read `{}`: {error}", path.display()), 6u8)
    })?;
    let parsed: StageFile = toml::from_str(&raw).map_err(|error| {
        ("stage_file", format!("could not parse `{}`: {error}", path.display()), 6u8)
    })?;

    if parsed.stages.is_empty() {
        return Err(("stage_file", format!("`{}` defines no [[stage]] entries", path.display()), 6));
    }
    let mut seen = std::collections::HashSet::new();
    for stage in &parsed.stages {
        let code = stage.code.as_str().trim();
        if code.is_empty() || stage.label.trim().is_empty() {
            return Err(("stage_file", "every stage needs a code and a label".to_string(), 6));
        }
        if !seen.insert(code.to_string()) {
            return Err(("stage_file", format!("stage code `{code}` is listed twice"), 6));
        }
    }

    Ok(parsed.stages)
}

pub async fn save_stages(
    repos: &Repositories,
    stages: Vec<StageMapping>,
) -> Result<usize, StepError> {
    let count = stages.len();
    for stage in stages {
        repos.stages.save(stage).await.map_err(|error| ("persistence", error.to_string(), 5u8))?;
    }
    Ok(count)
}

pub fn run(path: &Path) -> CommandResult {
    let stages = match load_stage_file(path) {
        Ok(stages) => stages,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("seed-stages", error_class, message, exit_code)
        }
    };
    let (config, runtime) = match prepare("seed-stages") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let saved = save_stages(&Repositories::sql(pool.clone()), stages).await;
        pool.close().await;
        saved
    });

    match result {
        Ok(count) => CommandResult::success("seed-stages", format!("saved {count} canonical stages")),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed-stages", error_class, message, exit_code)
        }
    }
}
