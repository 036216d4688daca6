use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dx_admin::auth::Credentials;
use dx_admin::client::{summarize, AdminClient};
use dx_admin::config::LogConfig;
use dx_admin::{server, AdminConfig, HealOpts, ServiceSignal};
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dx-admin")]
#[command(about = "Administrative control plane for a distributed object store", version)]
#[command(after_help = "Admin Features:
- Heal orchestration per bucket or prefix with resumable status polling
- Keep-alive streaming for long running admin calls
- Cluster-wide service signals, IAM reloads and profiling
- Server, drive, CPU and memory telemetry from every node")]
struct Cli {
    /// Admin endpoint for client commands
    #[arg(long, global = true, default_value = "http://localhost:9000", env = "DX_ADMIN_ENDPOINT")]
    endpoint: String,

    #[arg(long, global = true, env = "DX_ADMIN_ACCESS_KEY", default_value = "dxadmin")]
    access_key: String,

    #[arg(long, global = true, env = "DX_ADMIN_SECRET_KEY", default_value = "dxadmin-secret")]
    secret_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admin server
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Heal a bucket, a prefix, or the whole cluster
    Heal {
        /// Bucket to heal; the whole cluster when omitted
        bucket: Option<String>,

        /// Object or prefix inside the bucket
        prefix: Option<String>,

        #[arg(short, long)]
        recursive: bool,

        #[arg(long)]
        dry_run: bool,

        /// Replace a running sequence for the same scope
        #[arg(long)]
        force_start: bool,

        /// Stop the running sequence instead of starting one
        #[arg(long)]
        stop: bool,
    },

    /// Show cluster service status, or send a signal
    Service {
        /// restart or stop
        #[arg(long)]
        signal: Option<String>,
    },

    /// Show per-node server information
    Info,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 10)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let log = AdminConfig::load(config.as_deref())?.log;
            let _guard = init_tracing(&log)?;
            println!("{}", "🌐 Starting admin server...".cyan().bold());
            server::serve(config).await?;
        }

        Commands::Heal {
            bucket,
            prefix,
            recursive,
            dry_run,
            force_start,
            stop,
        } => {
            let client = client(&cli.endpoint, &cli.access_key, &cli.secret_key)?;
            let bucket = bucket.unwrap_or_default();
            let prefix = prefix.unwrap_or_default();
            let scope = if bucket.is_empty() {
                "<cluster>".to_string()
            } else {
                format!("{bucket}/{prefix}")
            };

            if stop {
                let stopped = client.heal_stop(&bucket, &prefix).await?;
                println!(
                    "{} Stopped heal {} (token {})",
                    "✓".green(),
                    scope.bright_white(),
                    stopped.client_token.bright_yellow()
                );
                return Ok(());
            }

            let opts = HealOpts { recursive, dry_run };
            let started = client.heal_start(&bucket, &prefix, &opts, force_start).await?;
            println!(
                "{} Heal of {} started (token {})",
                "✓".green(),
                scope.bright_white(),
                started.client_token.bright_yellow()
            );

            loop {
                let status = client
                    .heal_status(&bucket, &prefix, &started.client_token)
                    .await?;
                for item in &status.items {
                    println!(
                        "  {:>5} {:<8} {}/{} {} drive(s) healed",
                        item.result_index,
                        format!("{:?}", item.item_type).to_lowercase(),
                        item.bucket,
                        item.object,
                        item.healed_drives().to_string().bright_green()
                    );
                }
                if status.summary.is_terminal() {
                    if status.failure_detail.is_empty() {
                        println!("{} Heal {}", "✓".green(), status.summary);
                    } else {
                        println!(
                            "{} Heal {}: {}",
                            "✗".red(),
                            status.summary,
                            status.failure_detail
                        );
                    }
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        Commands::Service { signal } => {
            let client = client(&cli.endpoint, &cli.access_key, &cli.secret_key)?;
            match signal.as_deref() {
                None => {
                    let status = client.service_status().await?;
                    println!("  Version: {}", status.server_version.bright_white());
                    println!("  Commit:  {}", status.commit_id);
                    println!("  Uptime:  {}s", status.uptime_secs);
                }
                Some(name) => {
                    let signal: ServiceSignal = serde_json::from_value(serde_json::json!(name))
                        .with_context(|| format!("Unknown service signal: {name}"))?;
                    let results = client.service_signal(signal).await?;
                    let (ok, failed) = summarize(&results);
                    println!(
                        "{} Sent {} to {} node(s), {} failed",
                        "✓".green(),
                        signal.to_string().bright_yellow(),
                        ok,
                        failed
                    );
                }
            }
        }

        Commands::Info => {
            let client = client(&cli.endpoint, &cli.access_key, &cli.secret_key)?;
            for node in client.server_info().await? {
                match (node.data, node.error) {
                    (Some(info), _) => println!(
                        "{} {} uptime {}s, {} drive(s) online, {} offline",
                        "●".green(),
                        node.host.bright_white(),
                        info.properties.uptime_secs,
                        info.storage.backend.online_disks,
                        info.storage.backend.offline_disks
                    ),
                    (None, error) => println!(
                        "{} {} {}",
                        "●".red(),
                        node.host.bright_white(),
                        error.unwrap_or_default()
                    ),
                }
            }
        }
    }

    Ok(())
}

fn client(endpoint: &str, access_key: &str, secret_key: &str) -> Result<AdminClient> {
    AdminClient::new(endpoint, Credentials::new(access_key, secret_key))
        .context("Failed to build admin client")
}

/// Log to stderr, and to a daily-rolling file when a directory is configured
fn init_tracing(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dx-admin.log");
            let (file, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr.and(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
            Ok(None)
        }
    }
}
