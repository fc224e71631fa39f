use std::process::ExitCode;

fn main() -> ExitCode {
    leadsync_cli::run()
}
