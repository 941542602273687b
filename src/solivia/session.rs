use crate::prelude::*;
use crate::solivia::catalog::{Catalog, CommandCode, DecodeError, DecodedSample};
use crate::solivia::frame::{decode_response, encode_request, Frame, FrameDecoder, FrameError, MAX_FRAME_LEN};

use bytes::BytesMut;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Requesting,
    AwaitingReply,
    Retrying,
    /// The channel reported a hard error and has been released. Terminal.
    Faulted,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub address: u8,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            address: 1,
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(1000),
            retries: 2,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl From<&config::Serial> for SessionOptions {
    fn from(serial: &config::Serial) -> Self {
        Self {
            address: serial.address(),
            read_timeout: serial.read_timeout(),
            write_timeout: serial.write_timeout(),
            retries: serial.retries(),
            retry_backoff: serial.retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCause {
    Timeout,
    Frame(FrameError),
}

impl std::fmt::Display for TransportCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportCause::Timeout => write!(f, "timed out"),
            TransportCause::Frame(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("command {0} is not known to the catalog")]
    UnknownCommand(CommandCode),
    #[error(transparent)]
    Decode(DecodeError),
    #[error("command {command}: no valid reply after {attempts} attempts, last error: {cause}")]
    Transport {
        command: CommandCode,
        attempts: u32,
        cause: TransportCause,
    },
    #[error("channel fault: {0}")]
    ChannelFault(String),
}

impl RequestError {
    /// Soft failures lose one sample but say nothing about link health.
    pub fn is_soft(&self) -> bool {
        matches!(self, RequestError::UnknownCommand(_) | RequestError::Decode(_))
    }
}

impl From<DecodeError> for RequestError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnknownCommand(code) => RequestError::UnknownCommand(code),
            other => RequestError::Decode(other),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub requests: u64,
    pub transmissions: u64,
    pub replies: u64,
    pub timeouts: u64,
    pub checksum_errors: u64,
    pub malformed_frames: u64,
    pub stale_replies: u64,
    pub unknown_commands: u64,
    pub decode_errors: u64,
    pub transport_failures: u64,
    pub channel_faults: u64,
}

impl SessionStats {
    pub fn merge(&mut self, other: &SessionStats) {
        self.requests += other.requests;
        self.transmissions += other.transmissions;
        self.replies += other.replies;
        self.timeouts += other.timeouts;
        self.checksum_errors += other.checksum_errors;
        self.malformed_frames += other.malformed_frames;
        self.stale_replies += other.stale_replies;
        self.unknown_commands += other.unknown_commands;
        self.decode_errors += other.decode_errors;
        self.transport_failures += other.transport_failures;
        self.channel_faults += other.channel_faults;
    }

    pub fn print_summary(&self) {
        info!("Serial link statistics:");
        info!("  Requests: {}", self.requests);
        info!("  Frames sent: {}", self.transmissions);
        info!("  Valid replies: {}", self.replies);
        info!("  Errors:");
        info!("    Timeouts: {}", self.timeouts);
        info!("    Checksum mismatches: {}", self.checksum_errors);
        info!("    Malformed frames: {}", self.malformed_frames);
        info!("    Stale replies discarded: {}", self.stale_replies);
        info!("    Unknown commands: {}", self.unknown_commands);
        info!("    Decode errors: {}", self.decode_errors);
        info!("    Transport failures: {}", self.transport_failures);
        info!("    Channel faults: {}", self.channel_faults);
    }
}

enum AttemptError {
    Retry(TransportCause),
    Unknown(CommandCode),
    Fault(String),
}

enum WriteError {
    Timeout,
    Fault(String),
}

/// Sole owner of one serial channel. `request` takes `&mut self`, so there
/// is never more than one request on the wire.
pub struct Session<C> {
    channel: Option<C>,
    catalog: Arc<Catalog>,
    options: SessionOptions,
    decoder: FrameDecoder,
    buf: BytesMut,
    state: State,
    stats: SessionStats,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(channel: C, catalog: Arc<Catalog>, options: SessionOptions) -> Self {
        Self {
            channel: Some(channel),
            catalog,
            options,
            decoder: FrameDecoder::new(),
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            state: State::Idle,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_faulted(&self) -> bool {
        self.state == State::Faulted
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn request(&mut self, command: CommandCode) -> Result<DecodedSample, RequestError> {
        if self.state == State::Faulted {
            return Err(RequestError::ChannelFault("session is faulted".to_string()));
        }

        self.stats.requests += 1;
        let frame = encode_request(self.options.address, command);
        let attempts = self.options.retries.saturating_add(1);
        let mut cause = TransportCause::Timeout;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.state = State::Retrying;
                debug!(
                    "command {}: retry {}/{} in {:?} ({})",
                    command,
                    attempt - 1,
                    self.options.retries,
                    self.options.retry_backoff,
                    cause
                );
                tokio::time::sleep(self.options.retry_backoff).await;
            }

            self.state = State::Requesting;
            // whatever is left over belongs to an abandoned exchange
            self.buf.clear();

            match self.transmit(command, &frame).await {
                Ok(()) => {}
                Err(WriteError::Timeout) => {
                    cause = TransportCause::Timeout;
                    continue;
                }
                Err(WriteError::Fault(reason)) => return Err(self.fault(reason)),
            }

            self.state = State::AwaitingReply;
            match self.await_reply(command).await {
                Ok(reply) => {
                    self.state = State::Idle;
                    self.stats.replies += 1;
                    return self.decode_reply(reply);
                }
                Err(AttemptError::Retry(c)) => {
                    warn!("command {}: attempt {}/{} failed: {}", command, attempt, attempts, c);
                    cause = c;
                }
                Err(AttemptError::Unknown(code)) => return Err(self.unknown(code)),
                Err(AttemptError::Fault(reason)) => return Err(self.fault(reason)),
            }
        }

        self.state = State::Idle;
        self.stats.transport_failures += 1;
        error!("command {}: giving up after {} attempts: {}", command, attempts, cause);
        Err(RequestError::Transport {
            command,
            attempts,
            cause,
        })
    }

    /// Shuts the channel down and hands back the counters.
    pub async fn close(mut self) -> SessionStats {
        if let Some(mut channel) = self.channel.take() {
            if let Err(err) = channel.shutdown().await {
                debug!("error shutting down serial channel: {}", err);
            }
        }
        self.state = State::Faulted;
        std::mem::take(&mut self.stats)
    }

    async fn transmit(&mut self, command: CommandCode, frame: &[u8]) -> Result<(), WriteError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| WriteError::Fault("channel released".to_string()))?;

        trace!("TX {} {:02X?}", command, frame);
        self.stats.transmissions += 1;

        let write = async {
            channel.write_all(frame).await?;
            channel.flush().await
        };
        match tokio::time::timeout(self.options.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(WriteError::Fault(format!("write failed: {}", err))),
            Err(_) => {
                self.stats.timeouts += 1;
                Err(WriteError::Timeout)
            }
        }
    }

    async fn await_reply(&mut self, command: CommandCode) -> Result<Frame, AttemptError> {
        let deadline = tokio::time::Instant::now() + self.options.read_timeout;

        loop {
            while let Some(raw) = self
                .decoder
                .decode(&mut self.buf)
                .map_err(|err| AttemptError::Fault(err.to_string()))?
            {
                trace!("RX {:02X?}", &raw[..]);

                match decode_response(&raw, &self.catalog) {
                    Ok(frame) if frame.command == command => {
                        if frame.address != self.options.address {
                            debug!(
                                "command {}: reply carries address {}, expected {}",
                                command, frame.address, self.options.address
                            );
                        }
                        return Ok(frame);
                    }
                    Ok(frame) => {
                        self.stats.stale_replies += 1;
                        debug!("command {}: discarding reply for {}", command, frame.command);
                    }
                    Err(FrameError::UnknownCommand(code)) if code == command => {
                        return Err(AttemptError::Unknown(code));
                    }
                    Err(FrameError::UnknownCommand(code)) => {
                        self.stats.stale_replies += 1;
                        debug!("command {}: discarding reply for unknown {}", command, code);
                    }
                    Err(err @ FrameError::ChecksumMismatch { .. }) => {
                        self.stats.checksum_errors += 1;
                        self.buf.clear();
                        return Err(AttemptError::Retry(TransportCause::Frame(err)));
                    }
                    Err(err) => {
                        self.stats.malformed_frames += 1;
                        self.buf.clear();
                        return Err(AttemptError::Retry(TransportCause::Frame(err)));
                    }
                }
            }

            let channel = self
                .channel
                .as_mut()
                .ok_or_else(|| AttemptError::Fault("channel released".to_string()))?;

            match tokio::time::timeout_at(deadline, channel.read_buf(&mut self.buf)).await {
                Ok(Ok(0)) => return Err(AttemptError::Fault("serial channel closed".to_string())),
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(AttemptError::Fault(format!("read failed: {}", err))),
                Err(_) if self.buf.is_empty() => {
                    self.stats.timeouts += 1;
                    return Err(AttemptError::Retry(TransportCause::Timeout));
                }
                Err(_) => {
                    let available = self.buf.len();
                    let needed = if available >= 4 { 4 + self.buf[3] as usize + 2 } else { 6 };
                    self.stats.malformed_frames += 1;
                    self.buf.clear();
                    return Err(AttemptError::Retry(TransportCause::Frame(FrameError::Truncated {
                        needed,
                        available,
                    })));
                }
            }
        }
    }

    fn decode_reply(&mut self, frame: Frame) -> Result<DecodedSample, RequestError> {
        match self.catalog.decode(frame.command, &frame.payload) {
            Ok(sample) => {
                debug!("{} ({}) = {} {}", sample.name, sample.command, sample.value, sample.unit);
                Ok(sample)
            }
            Err(err) => {
                let err = RequestError::from(err);
                match &err {
                    RequestError::UnknownCommand(_) => self.stats.unknown_commands += 1,
                    _ => self.stats.decode_errors += 1,
                }
                warn!("{}", err);
                Err(err)
            }
        }
    }

    fn unknown(&mut self, code: CommandCode) -> RequestError {
        self.state = State::Idle;
        self.stats.unknown_commands += 1;
        warn!("command {}: device replied but the command is not in the catalog", code);
        RequestError::UnknownCommand(code)
    }

    fn fault(&mut self, reason: String) -> RequestError {
        error!("serial channel fault: {}", reason);
        self.state = State::Faulted;
        self.stats.channel_faults += 1;
        // dropping the handle releases the port
        self.channel = None;
        RequestError::ChannelFault(reason)
    }
}
