use std::process::ExitCode;

fn main() -> ExitCode {
    callsight_cli::run()
}
