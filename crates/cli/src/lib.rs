pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "carepath",
    about = "CarePath operator CLI",
    long_about = "Apply migrations, inspect configuration, validate protocol rule documents, and report escalation deadlines.",
    after_help = "Examples:\n  carepath migrate\n  carepath protocol-check rules/hf.json\n  carepath sla-report --breached-only"
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
    #[command(about = "Validate a protocol rule document, reporting every rejected rule")]
    ProtocolCheck {
        #[arg(help = "Path to the JSON rule document")]
        file: PathBuf,
    },
    #[command(about = "List unresolved escalations with their deadline status")]
    SlaReport {
        #[arg(long, help = "Only include tasks past their deadline")]
        breached_only: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::ProtocolCheck { file } => commands::protocol_check::run(&file),
        Command::SlaReport { breached_only } => commands::sla_report::run(breached_only),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
