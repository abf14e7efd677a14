//! # otapush
//!
//! A library for pushing over-the-air firmware updates to microcontroller
//! nodes over a serial link.
//!
//! This crate provides the core transfer machinery:
//!
//! - Newline-delimited framing with XOR checksum tags
//! - Transport envelopes for direct, bus-forwarded and relay-expanded targets
//! - Status line classification over noisy device log output
//! - A sliding-window transfer state machine with in-order acknowledgments
//!
//! ## Transports
//!
//! - **Direct**: the target is on the other end of the UART
//! - **Bus**: the target sits on a shared serial bus behind a coordinator
//! - **Relayed**: like Bus, with a broadcast expander paused for the transfer
//!
//! ## Features
//!
//! - `native` (default): native serial port support via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use otapush::{ChunkSource, Envelope, SerialConfig, Transfer, TransferOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (source, size) = ChunkSource::from_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut port = otapush::NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!         let envelope = Envelope::Bus {
//!             module: "bus".to_string(),
//!             target: 5,
//!         };
//!         let mut transfer =
//!             Transfer::new(&mut port, envelope, source, size, TransferOptions::default());
//!         transfer.run(|acked, total| println!("{acked}/{total} bytes"))?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod port;
pub mod protocol;
pub mod transfer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). An interrupted
/// transfer still aborts cleanly and resumes any paused expander.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn interrupt_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    // Per-thread flag so tests toggling interruption cannot disturb each
    // other under the parallel test runner.
    thread_local! {
        static TEST_INTERRUPT_FLAG: Cell<bool> = const { Cell::new(false) };
    }

    static INSTALL: OnceLock<()> = OnceLock::new();
    INSTALL.get_or_init(|| {
        set_interrupt_checker(|| TEST_INTERRUPT_FLAG.with(Cell::get));
    });

    TEST_INTERRUPT_FLAG.with(|flag| flag.set(value));
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{ChunkEncoding, Envelope, StatusMessage},
    transfer::{
        MAX_CHUNK_SIZE, MAX_WINDOW, Phase, Transfer, TransferOptions, reader::LineReader,
        source::ChunkSource,
    },
};
