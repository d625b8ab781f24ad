//! Service entrypoint: load configuration, wire the engine, serve the API.

use clap::Parser;
use rollwatch::alerts::{AlertRouter, PagerDutySink, RouterSettings, SlackSink};
use rollwatch::cancellation::CancelToken;
use rollwatch::chain::{ChainSources, HttpChainSource};
use rollwatch::config::AppConfig;
use rollwatch::errors::{ErrorKind, Result};
use rollwatch::etl::EtlManager;
use rollwatch::observability::{init_tracing, Metrics};
use rollwatch::pipeline::PipelineSettings;
use rollwatch::session::SessionManager;
use rollwatch::state::MemoryStateStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Rollup invariant monitoring service.
#[derive(Debug, Parser)]
#[command(name = "rollwatch", version, about)]
struct Cli {
    /// Path to a TOML configuration file; the environment overrides it.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Err(e) = init_tracing(&config.log_level, config.log_json) {
        eprintln!("configuration error: {e}");
        return ExitCode::from(1);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.kind() == ErrorKind::Config => {
            error!("configuration error: {e}");
            ExitCode::from(1)
        }
        Err(e) => {
            error!("unrecoverable runtime error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let addr = config.listen_addr()?;
    let root = CancelToken::new();
    let metrics = Arc::new(Metrics::new());
    let settings = PipelineSettings::default();

    let sources = ChainSources::new(
        Arc::new(HttpChainSource::new(&config.l1_rpc)),
        Arc::new(HttpChainSource::new(&config.l2_rpc)),
    );

    let etl = EtlManager::new(sources.clone(), settings.clone(), metrics.clone(), &root);
    let router = Arc::new(AlertRouter::new(
        RouterSettings::default(),
        metrics.clone(),
        &root,
    ));

    if let Some(url) = &config.slack_url {
        router.register_sink(Arc::new(SlackSink::new("slack", url)));
    }
    if let Some(key) = &config.pagerduty_key_low {
        router.register_sink(Arc::new(PagerDutySink::new("pagerduty_low", key)));
    }
    if let Some(key) = &config.pagerduty_key_high {
        router.register_sink(Arc::new(PagerDutySink::new("pagerduty_high", key)));
    }

    let manager = SessionManager::new(
        etl,
        router,
        sources,
        Arc::new(MemoryStateStore::new()),
        &settings,
        metrics.clone(),
        &root,
    );

    {
        let root = root.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                root.cancel("interrupt");
            }
        });
    }

    let served = rollwatch::api::serve(addr, manager.clone(), metrics, root.clone()).await;
    root.cancel("server stopped");
    manager.shutdown().await;
    served
}
