pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "callsight",
    about = "Callsight operator CLI",
    long_about = "Operate Callsight storage, readiness checks, config inspection, and customer memory lookup.",
    after_help = "Examples:\n  callsight doctor --json\n  callsight config\n  callsight memory --email sarah@bigco.com --history 5"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM endpoint, tool wiring, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the current memory record for a customer")]
    Memory {
        #[arg(long, help = "Customer email address (case-insensitive)")]
        email: String,
        #[arg(long, default_value_t = 0, help = "Also list up to N historical records, newest first")]
        history: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Memory { email, history } => commands::memory::run(&email, history),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
