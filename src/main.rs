mod collectors;
mod config;
mod http;
mod metrics;
mod scheduler;
mod state;
mod store;

use axum::serve;
use clap::Parser;
use config::Config;
use http::ApiSnapshot;
use metrics::Metrics;
use scheduler::Scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use store::SnapshotStore;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostpulse")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Collect a single snapshot, print it as JSON and exit.
    #[arg(long)]
    once: bool,
    /// Overrides `listen` from the config.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "invalid --listen override");
            std::process::exit(1);
        }
    }

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let store = Arc::new(SnapshotStore::new());
    let probes = collectors::build_probes(&cfg);
    let mut scheduler = Scheduler::new(&cfg, probes, store, metrics.clone());

    if cli.once {
        let snapshot = scheduler.tick(true).await;
        match serde_json::to_string_pretty(&ApiSnapshot::from(snapshot.as_ref())) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(error = %err, "failed to serialise snapshot");
                std::process::exit(1);
            }
        }
        return;
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        "starting hostpulse"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = scheduler.handle();

    let http_task = {
        let listen = cfg.listen.clone();
        let metrics = metrics.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, handle);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, %addr, "failed to bind HTTP listener");
                    return;
                }
            };
            info!(%addr, "HTTP endpoint listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let collector_task = tokio::spawn(scheduler.run(shutdown_rx));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout stays clean for --once output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
