use crate::prelude::*;
use crate::solivia::{CommandCode, DecodedSample, RequestError, Session};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub unknown_commands: u32,
    pub decode_errors: u32,
    pub transport_errors: u32,
    pub channel_faults: u32,
    /// Commands not attempted because the channel faulted earlier in the cycle.
    pub skipped: u32,
}

impl FailureCounts {
    pub fn total(&self) -> u32 {
        self.unknown_commands + self.decode_errors + self.transport_errors + self.channel_faults
    }
}

/// Result of one poll. Never modified once built.
#[derive(Clone, Debug, Serialize)]
pub struct Cycle {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub healthy: bool,
    pub samples: Vec<DecodedSample>,
    pub failures: FailureCounts,
}

impl Cycle {
    /// A cycle for when the serial port could not even be opened.
    pub fn unavailable(commands: usize) -> Self {
        Self {
            started_at: chrono::Utc::now(),
            duration_ms: 0,
            healthy: false,
            samples: Vec::new(),
            failures: FailureCounts {
                channel_faults: 1,
                skipped: commands as u32,
                ..Default::default()
            },
        }
    }

    pub fn sample(&self, name: &str) -> Option<&DecodedSample> {
        self.samples.iter().find(|s| s.name == name)
    }

    pub fn numeric(&self) -> impl Iterator<Item = (&DecodedSample, f64)> {
        self.samples.iter().filter_map(|s| s.value.as_f64().map(|v| (s, v)))
    }

    pub fn text(&self) -> impl Iterator<Item = (&DecodedSample, &str)> {
        self.samples.iter().filter_map(|s| s.value.as_str().map(|v| (s, v)))
    }
}

#[derive(Clone, Debug)]
pub struct Collector {
    commands: Vec<CommandCode>,
}

impl Collector {
    pub fn new(commands: Vec<CommandCode>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[CommandCode] {
        &self.commands
    }

    pub async fn collect<C>(&self, session: &mut Session<C>) -> Cycle
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let started_at = chrono::Utc::now();
        let start = std::time::Instant::now();
        let mut samples = Vec::with_capacity(self.commands.len());
        let mut failures = FailureCounts::default();

        for (i, &command) in self.commands.iter().enumerate() {
            match session.request(command).await {
                Ok(sample) => samples.push(sample),
                Err(RequestError::UnknownCommand(_)) => failures.unknown_commands += 1,
                Err(RequestError::Decode(_)) => failures.decode_errors += 1,
                Err(RequestError::Transport { .. }) => failures.transport_errors += 1,
                Err(RequestError::ChannelFault(reason)) => {
                    failures.channel_faults += 1;
                    failures.skipped = (self.commands.len() - i - 1) as u32;
                    warn!(
                        "abandoning cycle after {} of {} commands: {}",
                        i + 1,
                        self.commands.len(),
                        reason
                    );
                    break;
                }
            }
        }

        let healthy = failures.transport_errors == 0 && failures.channel_faults == 0;
        let cycle = Cycle {
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            healthy,
            samples,
            failures,
        };

        debug!(
            "cycle complete: {} samples, {} failures, healthy={}, {}ms",
            cycle.samples.len(),
            cycle.failures.total(),
            cycle.healthy,
            cycle.duration_ms
        );

        cycle
    }
}
