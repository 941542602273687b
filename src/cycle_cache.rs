use crate::poller::ChannelData;
use crate::prelude::*;

use std::sync::RwLock;

/// Holds the most recent completed cycle. Readers get whatever finished
/// last and never wait on the serial link.
#[derive(Clone, Default)]
pub struct CycleCache {
    latest: Arc<RwLock<Option<Arc<Cycle>>>>,
    cycles: Arc<RwLock<u64>>,
}

impl CycleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<Cycle>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of cycles stored since startup.
    pub fn cycles(&self) -> u64 {
        *self.cycles.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self, cycle: Arc<Cycle>) {
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cycle);
        *self.cycles.write().unwrap_or_else(|poisoned| poisoned.into_inner()) += 1;
    }

    pub async fn start(&self, mut receiver: broadcast::Receiver<ChannelData>) -> Result<()> {
        debug!("cycle_cache starting");

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Cycle(cycle)) => self.store(cycle),
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("cycle_cache lagged, {} cycles skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        debug!("cycle_cache stopped after {} cycles", self.cycles());
        Ok(())
    }
}
