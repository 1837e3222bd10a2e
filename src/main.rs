use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

use grafana_snapshot::config::{ConfigManager, SnapshotSettings};
use grafana_snapshot::{ConnectionConfig, Result, SnapClient, SnapshotError, TakeRequest};

const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_GRAFANA_URL: &str = "http://localhost:3000/";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML settings file (defaults to ~/.grafana-snapshot/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Turns on debug logging
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// The address of the Grafana instance to snapshot
    #[arg(long)]
    grafana_url: Option<String>,
    /// Grafana API key with admin rights
    #[arg(long, env = "GRAFANA_API_KEY", hide_env_values = true)]
    grafana_api_key: Option<String>,
    /// Where to submit the snapshot. Defaults to the Grafana address
    #[arg(long)]
    snapshot_url: Option<String>,
    /// API key for the snapshot host. Defaults to the Grafana API key
    #[arg(long, env = "SNAPSHOT_API_KEY", hide_env_values = true)]
    snapshot_api_key: Option<String>,
    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,
    /// Per request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a dashboard and publish it
    Take {
        #[command(flatten)]
        connection: ConnectionArgs,
        /// The url friendly version of the dashboard title
        #[arg(long, default_value = "home")]
        dashboard_slug: String,
        /// Range start, "YYYY-MM-DD HH:MM:SS" in UTC. Defaults to start of day
        #[arg(long)]
        from: Option<String>,
        /// Range end, "YYYY-MM-DD HH:MM:SS" in UTC. Defaults to now
        #[arg(long)]
        to: Option<String>,
        /// Template variables as 'key1=val1;key2=val2'
        #[arg(long, default_value = "")]
        template_vars: String,
        /// How long to keep the snapshot (60s, 1h, 10d, ...). Defaults to never
        #[arg(long, value_parser = humantime::parse_duration)]
        snapshot_expires: Option<Duration>,
        /// Snapshot name. Defaults to the "to" date plus the dashboard slug
        #[arg(long)]
        snapshot_name: Option<String>,
        /// Do not embed annotations
        #[arg(long)]
        no_annotations: bool,
        /// Drop template variables from the published dashboard
        #[arg(long)]
        clear_templating: bool,
        /// Maximum number of datasource queries in flight
        #[arg(long, default_value_t = 1)]
        query_concurrency: usize,
    },
    /// List the datasources visible to the Grafana API key
    Datasources {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let result = match cli.command {
        Commands::Take {
            connection,
            dashboard_slug,
            from,
            to,
            template_vars,
            snapshot_expires,
            snapshot_name,
            no_annotations,
            clear_templating,
            query_concurrency,
        } => {
            let request = match build_take_request(
                dashboard_slug,
                from,
                to,
                &template_vars,
                snapshot_expires,
                snapshot_name,
            ) {
                Ok(request) => TakeRequest {
                    include_annotations: Some(!no_annotations),
                    clear_templating,
                    query_concurrency: Some(query_concurrency),
                    ..request
                },
                Err(e) => {
                    error!("Invalid arguments: {}", e);
                    std::process::exit(2);
                }
            };
            handle_take(cli.config, connection, request, &cancel).await
        }
        Commands::Datasources { connection } => {
            handle_datasources(cli.config, connection, &cancel).await
        }
    };

    if let Err(e) = &result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
    result
}

fn connection_config(config_file: Option<PathBuf>, args: ConnectionArgs) -> Result<ConnectionConfig> {
    let manager = ConfigManager::load(config_file.as_deref())?;
    let mut config = manager.connection_config(SnapshotSettings {
        grafana_url: args.grafana_url,
        grafana_api_key: args.grafana_api_key,
        snapshot_url: args.snapshot_url,
        snapshot_api_key: args.snapshot_api_key,
        accept_invalid_certs: args.insecure.then_some(true),
        request_timeout_secs: args.timeout,
    });
    if config.grafana_url.is_empty() {
        config.grafana_url = DEFAULT_GRAFANA_URL.to_string();
    }
    Ok(config)
}

async fn handle_take(
    config_file: Option<PathBuf>,
    args: ConnectionArgs,
    request: TakeRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = SnapClient::new(connection_config(config_file, args)?)?;
    info!("Grafana Address: {}", client.config().grafana_url);
    info!("Snapshot Address: {}", client.config().snapshot_url);
    info!("Dashboard Slug: {}", request.dashboard_slug);

    let snapshot = client.take_with_cancel(request, cancel).await?;
    info!("Snapshot URL: {}", snapshot.url);
    info!("Snapshot Key: {}", snapshot.key);
    info!("Snapshot Delete URL: {}", snapshot.delete_url);
    info!("Snapshot Delete Key: {}", snapshot.delete_key);
    Ok(())
}

async fn handle_datasources(
    config_file: Option<PathBuf>,
    args: ConnectionArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = SnapClient::new(connection_config(config_file, args)?)?;
    client.refresh_datasources(cancel).await?;
    for ds in client.cached_datasources().await {
        println!("{}\t{}\t{}", ds.id, ds.kind, ds.name);
    }
    Ok(())
}

fn build_take_request(
    dashboard_slug: String,
    from: Option<String>,
    to: Option<String>,
    template_vars: &str,
    snapshot_expires: Option<Duration>,
    snapshot_name: Option<String>,
) -> Result<TakeRequest> {
    let now = Utc::now();
    let from = match from {
        Some(raw) => parse_timestamp(&raw)?,
        None => now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|start| start.and_utc())
            .unwrap_or(now),
    };
    let to = match to {
        Some(raw) => parse_timestamp(&raw)?,
        None => now,
    };
    let expires = match snapshot_expires {
        Some(d) => chrono::Duration::from_std(d)
            .map_err(|e| SnapshotError::ConfigInvalid(format!("snapshot_expires: {}", e)))?,
        None => chrono::Duration::zero(),
    };

    Ok(TakeRequest {
        template_vars: Some(parse_template_vars(template_vars)?),
        expires,
        snapshot_name,
        ..TakeRequest::new(dashboard_slug, from, to)
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIME_LAYOUT)
        .map(|t| t.and_utc())
        .map_err(|e| {
            SnapshotError::ConfigInvalid(format!(
                "Invalid timestamp \"{}\", expected \"YYYY-MM-DD HH:MM:SS\": {}",
                raw, e
            ))
        })
}

/// Parse `key1=val1;key2=val2`. Fragments of two characters or fewer are
/// ignored.
fn parse_template_vars(raw: &str) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in raw.split(';') {
        if pair.len() <= 2 {
            continue;
        }
        let parts: Vec<&str> = pair.split('=').collect();
        if parts.len() != 2 {
            return Err(SnapshotError::ConfigInvalid(format!(
                "\"template_vars\" contained an invalid pairing: \"{}\"",
                pair
            )));
        }
        vars.insert(parts[0].to_string(), parts[1].to_string());
    }
    Ok(vars)
}
