use crate::poller::ChannelData;
use crate::prelude::*;

use metrics::Label;

/// One gauge reading derived from a cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub name: String,
    pub labels: Vec<Label>,
    pub value: f64,
}

/// Publishes every cycle through the `metrics` facade. With no recorder
/// installed the calls are no-ops.
#[derive(Clone)]
pub struct MetricsSink {
    namespace: String,
}

impl MetricsSink {
    pub fn new(config: &ConfigWrapper) -> Self {
        Self::with_namespace(config.metrics().namespace())
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    pub fn describe(&self) {
        metrics::describe_gauge!(self.name("up"), "1 if the last poll cycle reached the inverter");
        metrics::describe_gauge!(self.name("info"), "inverter identity strings as labels");
        metrics::describe_gauge!(
            self.name("cycle_duration_seconds"),
            metrics::Unit::Seconds,
            "time taken by the last poll cycle"
        );
        metrics::describe_counter!(self.name("cycles_total"), "poll cycles completed");
        metrics::describe_counter!(self.name("errors_total"), "failed requests by kind");
    }

    fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.namespace, suffix)
    }

    /// Gauges for one cycle: `up`, one per numeric sample, and `info` when
    /// the cycle carried any text samples.
    pub fn readings(&self, cycle: &Cycle) -> Vec<Reading> {
        let mut r = Vec::with_capacity(cycle.samples.len() + 3);

        r.push(Reading {
            name: self.name("up"),
            labels: Vec::new(),
            value: if cycle.healthy { 1.0 } else { 0.0 },
        });
        r.push(Reading {
            name: self.name("cycle_duration_seconds"),
            labels: Vec::new(),
            value: cycle.duration_ms as f64 / 1000.0,
        });

        for (sample, value) in cycle.numeric() {
            r.push(Reading {
                name: self.name(&crate::solivia::catalog::metric_name(&sample.name)),
                labels: vec![
                    Label::new("unit", sample.unit.clone()),
                    Label::new("code", sample.command.to_string()),
                ],
                value,
            });
        }

        let info: Vec<Label> = cycle
            .text()
            .map(|(sample, text)| Label::new(crate::solivia::catalog::metric_name(&sample.name), text.to_string()))
            .collect();
        if !info.is_empty() {
            r.push(Reading {
                name: self.name("info"),
                labels: info,
                value: 1.0,
            });
        }

        r
    }

    pub fn publish(&self, cycle: &Cycle) {
        for reading in self.readings(cycle) {
            metrics::gauge!(reading.name, reading.labels).set(reading.value);
        }

        metrics::counter!(self.name("cycles_total")).increment(1);

        let failures = &cycle.failures;
        for (kind, count) in [
            ("unknown_command", failures.unknown_commands),
            ("decode", failures.decode_errors),
            ("transport", failures.transport_errors),
            ("channel_fault", failures.channel_faults),
        ] {
            if count > 0 {
                metrics::counter!(self.name("errors_total"), "kind" => kind).increment(u64::from(count));
            }
        }

        trace!("published cycle from {} ({} samples)", cycle.started_at, cycle.samples.len());
    }

    pub async fn start(&self, mut receiver: broadcast::Receiver<ChannelData>) -> Result<()> {
        info!("metrics sink started, namespace {}", self.namespace);
        self.describe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Cycle(cycle)) => self.publish(&cycle),
                Ok(ChannelData::Shutdown) => {
                    info!("metrics sink received shutdown signal");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("metrics sink lagged, {} cycles skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(())
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(listen: &str) -> Result<()> {
    let addr: std::net::SocketAddr = listen.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|err| anyhow!("failed to start prometheus listener on {}: {}", listen, err))?;
    info!("prometheus metrics listening on http://{}/metrics", addr);
    Ok(())
}
