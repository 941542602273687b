pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::sync::Arc;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    collector::{Collector, Cycle},
    config::{self, Config, ConfigWrapper},
    options::Options,
    solivia::{Catalog, CommandCode, Session, SessionOptions, SessionStats},
};
