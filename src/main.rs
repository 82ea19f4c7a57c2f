mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use commands::Lifecycle;
use local_nexus::config::Settings;
use local_nexus::{Controller, Error as NexusError};
use output::CliOutput;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(nexus_error) = e.downcast_ref::<NexusError>() {
            eprintln!("Error: {}", nexus_error);
            if let Some(suggestion) = nexus_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let work_dir = match cli.workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let settings = Settings::from_env(&work_dir)?;
    tracing::debug!("Using registry at {}", settings.db_path.display());
    let controller = Controller::open(settings).await?;
    let out = &CliOutput;

    match &cli.command {
        Commands::Import { file } => commands::run_import(&controller, file, out).await,
        Commands::List {
            category,
            status,
            json,
        } => commands::run_list(&controller, category.clone(), status.clone(), *json, out).await,
        Commands::Show { service, json } => {
            commands::run_show(&controller, service, *json, out).await
        }
        Commands::Start { service } => {
            commands::run_lifecycle(&controller, Lifecycle::Start, service, out).await
        }
        Commands::Stop { service } => {
            commands::run_lifecycle(&controller, Lifecycle::Stop, service, out).await
        }
        Commands::Restart { service } => {
            commands::run_lifecycle(&controller, Lifecycle::Restart, service, out).await
        }
        Commands::Refresh { service } => {
            commands::run_lifecycle(&controller, Lifecycle::Refresh, service, out).await
        }
        Commands::Logs { service, lines } => {
            commands::run_logs(&controller, service, *lines, out).await
        }
        Commands::Delete { service } => commands::run_delete(&controller, service, out).await,
        Commands::Ports(cmd) => commands::run_ports(&controller, cmd, out).await,
        Commands::Db(cmd) => commands::run_db(&controller, cmd, out).await,
        Commands::Keys(cmd) => commands::run_keys(&controller, cmd, out).await,
        Commands::Summary { json } => commands::run_summary(&controller, *json, out).await,
        Commands::EnvExample => commands::run_env_example(&controller, out).await,
        Commands::Watch { folder, interval } => {
            commands::run_watch(&controller, folder.clone(), *interval, out).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
