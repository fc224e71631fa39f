use leadsync_db::{connect_with_settings, migrations};

use crate::commands::{prepare, CommandResult, StepError};
use crate::MigrationDirection;

pub fn run(direction: MigrationDirection) -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let applied = match direction {
            MigrationDirection::Up => migrations::run_pending(&pool).await,
            MigrationDirection::Down => migrations::undo_all(&pool).await,
        };
        pool.close().await;
        applied.map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok::<(), StepError>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "migrate",
            match direction {
                MigrationDirection::Up => "applied pending migrations",
                MigrationDirection::Down => "reverted all applied migrations",
            },
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
