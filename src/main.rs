/// Version injected at compile time via GCPSNIP_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("GCPSNIP_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::Parser;
use gcpsnip::cli::{self, Args, LogLevel};
use gcpsnip::config::Config;
use gcpsnip::gcp::auth::GcpCredentials;
use gcpsnip::gcp::client::{format_gcp_error, ClientOptions, GcpClient};
use gcpsnip::gcp::endpoints::ServiceEndpoints;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::fmt::writer::MakeWriterExt;

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled: cannot open {}: {}", log_path.display(), e);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcpsnip {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(dir) = Config::app_dir() {
        return dir.join("gcpsnip.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcpsnip").join("gcpsnip.log");
    }
    PathBuf::from("gcpsnip.log")
}

/// Build the client from flags, falling back to saved config and gcloud
async fn build_client(args: &Args, config: &Config) -> Result<GcpClient> {
    let project_id = args
        .project
        .clone()
        .unwrap_or_else(|| config.effective_project());
    if project_id.is_empty() {
        return Err(anyhow::anyhow!(
            "No GCP project configured. Set GOOGLE_CLOUD_PROJECT or use --project flag"
        ));
    }
    let zone = args.zone.clone().unwrap_or_else(|| config.effective_zone());
    let location = args
        .location
        .clone()
        .unwrap_or_else(|| config.effective_location());
    let endpoints = match &args.endpoint {
        Some(base) => ServiceEndpoints::all(base),
        None => config.endpoints.clone(),
    };

    tracing::info!(
        "Using project: {}, zone: {}, location: {}",
        project_id,
        zone,
        location
    );

    let options = ClientOptions {
        project_id,
        zone,
        location,
        endpoints,
    };
    match &args.token {
        Some(token) => {
            GcpClient::with_credentials(GcpCredentials::from_static_token(token), options)
        },
        None => GcpClient::new(options).await,
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load();

    if let cli::Command::Config(command) = &args.command {
        return cli::run_config(command, &mut config);
    }

    let client = build_client(&args, &config)
        .await
        .context("Failed to set up the GCP client")?;
    cli::run(&args.command, &client, config.poll_config()).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("Command failed: {:#}", err);
            eprintln!("Error: {}", format_gcp_error(&err));
            ExitCode::FAILURE
        },
    }
}
