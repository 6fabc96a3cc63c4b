use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use chat_token_monitor::app;
use chat_token_monitor::cli::{Cli, Commands};
use chat_token_monitor::config::{self, MonitorConfig};
use chat_token_monitor::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("chat-token-monitor error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let config = MonitorConfig::load_or_init()?;

    match cli.command.unwrap_or(Commands::Watch { document: None }) {
        Commands::Watch { document } => {
            let document = app::resolve_document(document, &config)?;
            let runtime = config::runtime_settings();
            app::run_watch(&config, &runtime, &document)?;
            Ok(0)
        }
        Commands::Scan { document } => {
            let document = app::resolve_document(document, &config)?;
            app::scan_once(&config, &document)
        }
        Commands::Status { check } => app::print_status(&config, check),
        Commands::Report { range } => {
            app::print_report(&config, range)?;
            Ok(0)
        }
        Commands::Export { out } => {
            app::export(&config, out)?;
            Ok(0)
        }
        Commands::Clear { yes } => app::clear(&config, yes),
    }
}
