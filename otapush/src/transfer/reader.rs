//! Line assembly over a polled serial port.

use crate::error::{Error, Result};
use crate::port::Port;
use log::trace;
use std::io::ErrorKind;
use std::time::Instant;

/// Assembles complete lines from a byte-oriented port.
///
/// Serial reads frequently deliver partial lines; bytes are buffered
/// across calls until a terminator arrives. The underlying port's read
/// timeout acts as the poll interval, the `deadline` bounds the whole
/// wait. Interrupt requests are honored between polls.
#[derive(Default)]
pub struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next complete line, or `None` once the deadline passes.
    ///
    /// The returned line has its `\n` terminator and any preceding `\r`
    /// stripped. Non-UTF-8 bytes are replaced, never dropped.
    pub fn next_line<P: Port>(&mut self, port: &mut P, deadline: Instant) -> Result<Option<String>> {
        let mut buf = [0u8; 256];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            if crate::interrupt_requested() {
                return Err(Error::Interrupted);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            match port.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Pop one complete line off the pending buffer, if any.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        trace!("received line: {line:?}");
        Some(line)
    }
}
