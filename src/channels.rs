use crate::prelude::*;
use crate::poller::ChannelData;

#[derive(Debug, Clone)]
pub struct Channels {
    /// Completed cycles from the poller, plus the shutdown marker.
    pub from_poller: broadcast::Sender<ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_poller: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
