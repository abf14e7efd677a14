//! Transfer state machine with sliding-window flow control.
//!
//! One firmware delivery walks the phases
//!
//! ```text
//! INIT -> AWAIT_READY -> SENDING -> AWAIT_COMMIT_ACK -> DONE
//! ```
//!
//! with `FAILED` reachable from every non-terminal phase. During `SENDING`
//! up to `window` chunks are in flight at once, but acknowledgments must
//! arrive strictly in sequence order: an ACK for anything other than the
//! oldest unacknowledged chunk aborts the transfer rather than masking bus
//! contention or a device restart as a truncated-but-"successful" upload.

pub mod reader;
pub mod source;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::envelope::Envelope;
use crate::protocol::framing;
use crate::protocol::status::{self, StatusMessage};
use log::{debug, info, warn};
use reader::LineReader;
use source::ChunkSource;
use std::collections::VecDeque;
use std::io::Read;
use std::time::{Duration, Instant};

/// Protocol ceiling for the chunk size; matches the receiver's line buffer.
pub const MAX_CHUNK_SIZE: usize = 174;

/// Protocol ceiling for the window size.
pub const MAX_WINDOW: usize = 16;

/// Poll interval for the blocking status reads.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Tuning knobs for one transfer.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Maximum chunk size in bytes; the device may negotiate it down in
    /// its READY response, never up.
    pub chunk_size: usize,
    /// Maximum number of unacknowledged chunks in flight.
    pub window: usize,
    /// How long to wait for READY after BEGIN.
    pub ready_timeout: Duration,
    /// How long to wait for each ACK.
    pub ack_timeout: Duration,
    /// How long to wait for DONE after COMMIT. Longer than the ACK
    /// timeout because the device may be persisting the image.
    pub done_timeout: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: MAX_CHUNK_SIZE,
            window: 8,
            ready_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(8),
            done_timeout: Duration::from_secs(15),
        }
    }
}

impl TransferOptions {
    /// Check the options against the protocol ceilings.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE} bytes, got {}",
                self.chunk_size
            )));
        }
        if self.window == 0 || self.window > MAX_WINDOW {
            return Err(Error::Config(format!(
                "window size must be between 1 and {MAX_WINDOW}, got {}",
                self.window
            )));
        }
        Ok(())
    }
}

/// Phases of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Created, BEGIN not yet sent.
    Init,
    /// BEGIN sent, waiting for READY.
    AwaitReady,
    /// Chunks in flight.
    Sending,
    /// COMMIT sent, waiting for DONE.
    AwaitCommitAck,
    /// Image accepted and persisted.
    Done,
    /// Terminal failure; the session is discarded.
    Failed,
}

/// One firmware delivery to one target.
///
/// Owns the mutable session state: the sliding window counters, the
/// negotiated chunk size and the current phase. The session is one-shot;
/// after [`Transfer::run`] returns it is only good for inspecting the
/// final phase.
pub struct Transfer<'a, P: Port, R: Read> {
    port: &'a mut P,
    envelope: Envelope,
    source: ChunkSource<R>,
    image_size: u64,
    opts: TransferOptions,
    reader: LineReader,
    phase: Phase,
    chunk_size: usize,
    /// Next sequence number to send; sequence numbers are dense from 1.
    next_seq: u32,
    /// Oldest unacknowledged sequence number.
    next_ack: u32,
    /// Sizes of in-flight chunks, oldest first.
    inflight: VecDeque<usize>,
    acked_bytes: u64,
    eof: bool,
}

impl<'a, P: Port, R: Read> Transfer<'a, P, R> {
    /// Create a session for delivering `image_size` bytes from `source`
    /// through `envelope`.
    pub fn new(
        port: &'a mut P,
        envelope: Envelope,
        source: ChunkSource<R>,
        image_size: u64,
        opts: TransferOptions,
    ) -> Self {
        let chunk_size = opts.chunk_size;
        Self {
            port,
            envelope,
            source,
            image_size,
            opts,
            reader: LineReader::new(),
            phase: Phase::Init,
            chunk_size,
            next_seq: 1,
            next_ack: 1,
            inflight: VecDeque::new(),
            acked_bytes: 0,
            eof: false,
        }
    }

    /// The session's current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the transfer to completion.
    ///
    /// Blocks until the session reaches `Done` or fails. The progress
    /// callback receives `(acknowledged_bytes, image_size)` after every
    /// ACK. If the transfer goes through a broadcast expander, its
    /// traffic is paused up front and resumed on every exit path.
    pub fn run<F>(&mut self, mut progress: F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        self.opts.validate()?;
        self.port.set_timeout(POLL_TIMEOUT)?;
        self.port.clear_buffers()?;

        if let Some(pause) = self.envelope.pause_command() {
            debug!("pausing expander broadcasts");
            self.write_line(pause.as_bytes())?;
        }

        let result = self.run_phases(&mut progress);

        if let Some(resume) = self.envelope.resume_command() {
            debug!("resuming expander broadcasts");
            if let Err(e) = self.write_line(resume.as_bytes()) {
                warn!("failed to resume expander broadcasts: {e}");
            }
        }

        if result.is_err() {
            self.phase = Phase::Failed;
        }
        result
    }

    fn run_phases<F>(&mut self, progress: &mut F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        info!(
            "starting transfer of {} bytes via {}",
            self.image_size,
            self.port.name()
        );

        self.send_command(status::begin_command(self.image_size).as_bytes())?;
        self.phase = Phase::AwaitReady;
        match self.await_ready() {
            Ok(()) => {},
            // The device never entered transfer mode unless we were
            // interrupted mid-handshake; only then is ABORT worth sending.
            Err(Error::Interrupted) => {
                self.send_abort();
                return Err(Error::Interrupted);
            },
            Err(e) => return Err(e),
        }

        self.phase = Phase::Sending;
        if let Err(e) = self.pump_chunks(progress) {
            match e {
                // The channel itself is unusable; an ABORT cannot get through.
                Error::Io(_) => {},
                #[cfg(feature = "native")]
                Error::Serial(_) => {},
                _ => self.send_abort(),
            }
            return Err(e);
        }

        self.phase = Phase::AwaitCommitAck;
        self.send_command(status::commit_command().as_bytes())?;
        self.await_done()?;

        self.phase = Phase::Done;
        info!("transfer complete: {} bytes acknowledged", self.acked_bytes);
        Ok(())
    }

    /// Wait for READY and clamp the chunk size to the device's answer.
    fn await_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.opts.ready_timeout;

        loop {
            match self.next_status(deadline)? {
                None => {
                    return Err(Error::Timeout(format!(
                        "no READY within {:?} of BEGIN",
                        self.opts.ready_timeout
                    )));
                },
                Some(StatusMessage::Ready {
                    negotiated_chunk_size,
                }) => {
                    if let Some(negotiated) = negotiated_chunk_size {
                        if negotiated == 0 {
                            return Err(Error::Protocol(
                                "device negotiated a zero chunk size".to_string(),
                            ));
                        }
                        self.chunk_size = self.chunk_size.min(negotiated);
                    }
                    debug!("device ready, using chunk size {}", self.chunk_size);
                    return Ok(());
                },
                Some(StatusMessage::Error { reason }) => {
                    return Err(Error::Device(format!("transfer rejected: {reason}")));
                },
                // Stale statuses from an earlier session may still be in
                // flight; keep waiting for READY.
                Some(other) => debug!("ignoring status while waiting for READY: {other}"),
            }
        }
    }

    /// Keep the window full and consume ACKs until the image is drained.
    fn pump_chunks<F>(&mut self, progress: &mut F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        loop {
            while !self.eof && self.inflight.len() < self.opts.window {
                match self.source.next_chunk(self.chunk_size)? {
                    None => self.eof = true,
                    Some(chunk) => {
                        let command = status::chunk_command(
                            self.next_seq,
                            &chunk,
                            self.envelope.chunk_encoding(),
                        );
                        self.send_command(&command)?;
                        self.inflight.push_back(chunk.len());
                        self.next_seq += 1;
                    },
                }
            }

            debug_assert_eq!(self.inflight.len(), (self.next_seq - self.next_ack) as usize);

            if self.inflight.is_empty() {
                return Ok(());
            }
            self.wait_for_ack(progress)?;
        }
    }

    /// Block for exactly one in-order ACK.
    fn wait_for_ack<F>(&mut self, progress: &mut F) -> Result<()>
    where
        F: FnMut(u64, u64),
    {
        let deadline = Instant::now() + self.opts.ack_timeout;
        let expected = self.next_ack;

        match self.next_status(deadline)? {
            None => Err(Error::Timeout(format!(
                "no ACK for chunk {expected} within {:?}",
                self.opts.ack_timeout
            ))),
            Some(StatusMessage::Ack { seq, bytes }) => {
                if seq != expected {
                    return Err(Error::Protocol(format!(
                        "out-of-order ACK: expected {expected}, got {seq}"
                    )));
                }
                let chunk_len = self.inflight.pop_front().unwrap_or_default();
                self.next_ack += 1;
                self.acked_bytes += chunk_len as u64;
                if let Some(device_bytes) = bytes {
                    if device_bytes != self.acked_bytes {
                        debug!(
                            "device reports {device_bytes} bytes written, sender counts {}",
                            self.acked_bytes
                        );
                    }
                }
                progress(self.acked_bytes, self.image_size);
                Ok(())
            },
            Some(StatusMessage::Error { reason }) => Err(Error::Device(format!(
                "device aborted at chunk {expected}: {reason}"
            ))),
            Some(other) => Err(Error::Protocol(format!(
                "unexpected status while waiting for ACK {expected}: {other}"
            ))),
        }
    }

    /// Wait for DONE after COMMIT.
    ///
    /// Silence here is a failure: the legacy assume-success-if-silent
    /// fallback hides truncated transfers.
    fn await_done(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.opts.done_timeout;

        match self.next_status(deadline)? {
            None => Err(Error::Timeout(format!(
                "no DONE within {:?} of COMMIT",
                self.opts.done_timeout
            ))),
            Some(StatusMessage::Done) => Ok(()),
            Some(StatusMessage::Error { reason }) => {
                Err(Error::Device(format!("commit rejected: {reason}")))
            },
            Some(other) => Err(Error::Protocol(format!(
                "unexpected status while waiting for DONE: {other}"
            ))),
        }
    }

    /// Read status lines until one classifies, or the deadline passes.
    fn next_status(&mut self, deadline: Instant) -> Result<Option<StatusMessage>> {
        loop {
            match self.reader.next_line(self.port, deadline)? {
                None => return Ok(None),
                Some(line) => {
                    if let Some(message) = status::classify(&line, &self.envelope) {
                        return Ok(Some(message));
                    }
                },
            }
        }
    }

    /// Address a protocol command to the target and put it on the wire.
    fn send_command(&mut self, command: &[u8]) -> Result<()> {
        let wrapped = self.envelope.wrap_outbound(command);
        self.write_line(&wrapped)
    }

    /// Frame a payload with its checksum tag and write it out.
    fn write_line(&mut self, payload: &[u8]) -> Result<()> {
        let line = framing::encode(payload);
        self.port.write_all(&line)?;
        self.port.flush()?;
        Ok(())
    }

    /// Best-effort ABORT; the session is failing either way.
    fn send_abort(&mut self) {
        debug!("sending abort");
        if let Err(e) = self.send_command(status::abort_command().as_bytes()) {
            warn!("failed to send abort: {e}");
        }
    }
}
