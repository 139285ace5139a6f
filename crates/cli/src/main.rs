use std::process::ExitCode;

fn main() -> ExitCode {
    cadence_cli::run()
}
