use crate::poller::ChannelData;
use crate::prelude::*;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Appends each cycle to a file as one JSON object per line.
#[derive(Debug, Clone)]
pub struct CycleLog {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    written: Arc<Mutex<u64>>,
}

impl CycleLog {
    pub fn new(path: &str) -> Result<Self> {
        info!("Opening cycle log at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open cycle log {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on cycle log {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            written: Arc::new(Mutex::new(0)),
        })
    }

    pub fn write_cycle(&self, cycle: &Cycle) -> Result<()> {
        let line = serde_json::to_string(cycle)?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock cycle log file"))?;
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            error!("Failed to write to cycle log {}: {}", self.path, e);
            return Err(e.into());
        }

        let mut written = self
            .written
            .lock()
            .map_err(|_| anyhow!("Failed to lock cycle counter"))?;
        *written += 1;
        debug!("{} cycles written to {}", *written, self.path);

        Ok(())
    }

    pub async fn start(&self, mut receiver: broadcast::Receiver<ChannelData>) -> Result<()> {
        info!("cycle log writer started");

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Cycle(cycle)) => {
                    // logged and dropped, polling carries on
                    if let Err(e) = self.write_cycle(&cycle) {
                        warn!("cycle not logged: {}", e);
                    }
                }
                Ok(ChannelData::Shutdown) => break,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("cycle log lagged, {} cycles not written", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("cycle log writer stopped");
        Ok(())
    }
}
