use crate::prelude::*;

use std::future::Future;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

#[derive(Clone, Debug)]
pub enum ChannelData {
    Cycle(Arc<Cycle>),
    Shutdown,
}

#[derive(Clone, Debug, Default)]
pub struct PollerStats {
    pub cycles: u64,
    pub healthy_cycles: u64,
    pub port_opens: u64,
    pub open_failures: u64,
    pub session: SessionStats,
}

impl PollerStats {
    pub fn print_summary(&self) {
        info!("Poller statistics:");
        info!("  Cycles: {}", self.cycles);
        info!("  Healthy cycles: {}", self.healthy_cycles);
        info!("  Unhealthy cycles: {}", self.cycles - self.healthy_cycles);
        info!("  Serial port opens: {}", self.port_opens);
        info!("  Serial port open failures: {}", self.open_failures);
        self.session.print_summary();
    }
}

/// Opens the configured serial port, 8N1 with no flow control.
pub fn open_serial(serial: &config::Serial) -> Result<SerialStream> {
    let port = tokio_serial::new(serial.device(), serial.baud_rate())
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(serial.read_timeout())
        .open_native_async()
        .map_err(|err| anyhow!("failed to open serial port {}: {}", serial.device(), err))?;

    Ok(port)
}

/// Owns the device session and runs one collection cycle per tick.
#[derive(Clone)]
pub struct Poller {
    config: ConfigWrapper,
    channels: Channels,
    catalog: Arc<Catalog>,
    collector: Collector,
    stats: Arc<Mutex<PollerStats>>,
}

impl Poller {
    pub fn new(config: ConfigWrapper, channels: Channels, catalog: Arc<Catalog>, commands: Vec<CommandCode>) -> Self {
        Self {
            config,
            channels,
            catalog,
            collector: Collector::new(commands),
            stats: Arc::new(Mutex::new(PollerStats::default())),
        }
    }

    pub fn stats(&self) -> PollerStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_stats<F: FnOnce(&mut PollerStats)>(&self, f: F) {
        f(&mut self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions::from(self.config.serial())
    }

    pub async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let serial = self.config.serial().clone();
        self.run_with(move || std::future::ready(open_serial(&serial)), shutdown)
            .await
    }

    /// Polls until `shutdown` fires, opening a channel with `open` whenever
    /// there is no usable session.
    pub async fn run_with<C, F, Fut>(&self, mut open: F, mut shutdown: broadcast::Receiver<()>) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let period = self.config.poll_interval();
        info!(
            "poller starting: {} commands every {:?} on {}",
            self.collector.commands().len(),
            period,
            self.config.serial().device()
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut session: Option<Session<C>> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {}
            }

            let cycle = tokio::select! {
                _ = shutdown.recv() => {
                    info!("shutdown during poll, abandoning cycle");
                    break;
                }
                cycle = self.poll(&mut open, &mut session) => cycle,
            };

            self.publish(cycle);
        }

        if let Some(session) = session.take() {
            self.retire(session).await;
        }

        let _ = self.channels.from_poller.send(ChannelData::Shutdown);
        self.stats().print_summary();
        info!("poller stopped");

        Ok(())
    }

    /// Opens a channel, runs a single cycle and closes it again.
    pub async fn poll_once<C, F, Fut>(&self, mut open: F) -> Result<Cycle>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let channel = open().await?;
        self.update_stats(|s| s.port_opens += 1);

        let mut session = Session::new(channel, self.catalog.clone(), self.session_options());
        let cycle = self.collector.collect(&mut session).await;
        self.retire(session).await;

        Ok(cycle)
    }

    async fn poll<C, F, Fut>(&self, open: &mut F, session: &mut Option<Session<C>>) -> Cycle
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        if session.is_none() {
            match open().await {
                Ok(channel) => {
                    info!("serial channel {} open", self.config.serial().device());
                    self.update_stats(|s| s.port_opens += 1);
                    *session = Some(Session::new(channel, self.catalog.clone(), self.session_options()));
                }
                Err(err) => {
                    error!("{}", err);
                    self.update_stats(|s| s.open_failures += 1);
                    return Cycle::unavailable(self.collector.commands().len());
                }
            }
        }

        let Some(active) = session.as_mut() else {
            return Cycle::unavailable(self.collector.commands().len());
        };
        let cycle = self.collector.collect(active).await;

        if active.is_faulted() {
            warn!("serial channel faulted, reopening on next tick");
            if let Some(faulted) = session.take() {
                self.retire(faulted).await;
            }
        }

        cycle
    }

    async fn retire<C>(&self, session: Session<C>)
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let stats = session.close().await;
        self.update_stats(|s| s.session.merge(&stats));
    }

    fn publish(&self, cycle: Cycle) {
        if cycle.healthy {
            info!(
                "cycle: {} samples in {}ms, {} soft failures",
                cycle.samples.len(),
                cycle.duration_ms,
                cycle.failures.total()
            );
        } else {
            warn!(
                "cycle unhealthy: {} samples, {} failures, {} skipped",
                cycle.samples.len(),
                cycle.failures.total(),
                cycle.failures.skipped
            );
        }

        let healthy = cycle.healthy;
        self.update_stats(|s| {
            s.cycles += 1;
            if healthy {
                s.healthy_cycles += 1;
            }
        });

        // no receivers is fine, e.g. with every sink disabled
        let _ = self.channels.from_poller.send(ChannelData::Cycle(Arc::new(cycle)));
    }
}
