pub mod channels;
pub mod collector;
pub mod config;
pub mod cycle_cache;
pub mod cycle_log;
pub mod metrics_sink;
pub mod options;
pub mod poller;
pub mod prelude;
pub mod solivia;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::cycle_cache::CycleCache;
use crate::cycle_log::CycleLog;
use crate::metrics_sink::MetricsSink;
use crate::poller::{open_serial, Poller};
use crate::prelude::*;

use std::io::Write;

/// Sets up env_logger with `level` as the default filter. `RUST_LOG` still
/// takes precedence. Calling it twice is harmless.
pub fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Main application entry point. Runs until `shutdown_tx` fires, the
/// runtime limit passes, or after a single cycle with `--once`.
pub async fn app(shutdown_tx: broadcast::Sender<()>, options: Options) -> Result<()> {
    let shutdown_rx = shutdown_tx.subscribe();

    let config = ConfigWrapper::new(options.config_file.clone())?;
    init_logging(config.loglevel());

    info!("solivia-exporter {} starting with config file: {}", CARGO_PKG_VERSION, options.config_file);
    config.log_settings();

    let catalog = Arc::new(config.catalog()?);
    let commands = config.commands(&catalog)?;
    info!("catalog has {} commands, polling {}", catalog.len(), commands.len());

    let channels = Channels::new();
    let poller = Poller::new(config.clone(), channels.clone(), catalog, commands);

    if options.once {
        let serial = config.serial().clone();
        let cycle = poller.poll_once(|| std::future::ready(open_serial(&serial))).await?;
        println!("{}", serde_json::to_string_pretty(&cycle)?);
        if !cycle.healthy {
            bail!("cycle was unhealthy: {:?}", cycle.failures);
        }
        return Ok(());
    }

    info!("Initializing components...");
    let mut handles = Vec::new();

    info!("  Creating CycleCache...");
    let cache = CycleCache::new();
    {
        let cache = cache.clone();
        let receiver = channels.from_poller.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = cache.start(receiver).await {
                error!("CycleCache error: {}", e);
            }
        }));
    }

    if config.metrics().enabled() {
        #[cfg(feature = "prometheus")]
        if let Some(listen) = config.metrics().listen() {
            metrics_sink::install_prometheus(listen)?;
        }
        #[cfg(not(feature = "prometheus"))]
        if let Some(listen) = config.metrics().listen() {
            warn!("metrics.listen {} ignored, built without the prometheus feature", listen);
        }

        info!("  Creating MetricsSink...");
        let sink = MetricsSink::new(&config);
        let receiver = channels.from_poller.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = sink.start(receiver).await {
                error!("MetricsSink error: {}", e);
            }
        }));
    } else {
        info!("metrics disabled, skipping");
    }

    if let Some(path) = config.cycle_log() {
        info!("  Creating CycleLog...");
        let log = CycleLog::new(path)?;
        let receiver = channels.from_poller.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = log.start(receiver).await {
                error!("CycleLog error: {}", e);
            }
        }));
    }

    if let Some(secs) = options.runtime {
        info!("runtime limit {}s", secs);
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            info!("runtime limit reached, shutting down");
            let _ = tx.send(());
        });
    }

    let result = poller.start(shutdown_rx).await;

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Error waiting for task: {}", e);
        }
    }

    match cache.latest() {
        Some(cycle) => info!(
            "last cycle {}: healthy={}, {} samples, {} cycles seen",
            cycle.started_at,
            cycle.healthy,
            cycle.samples.len(),
            cache.cycles()
        ),
        None => info!("no cycles completed"),
    }

    info!("Application shutdown complete");
    result
}
