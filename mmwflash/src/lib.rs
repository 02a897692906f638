//! # mmwflash
//!
//! A library for flashing mmWave radar devices through their ROM bootloader.
//!
//! This crate provides the host side of the bootloader protocol:
//!
//! - Packet framing with the 8-bit additive checksum
//! - Break handshake, version query and revision detection
//! - Firmware header classification per part family and silicon revision
//! - Storage erase and chunked download with progress and cancellation
//!
//! ## Supported Parts
//!
//! AWR12, AWR14, AWR16, AWR18, AWR68, IWR12, IWR14, IWR16, IWR18, IWR68.
//!
//! ## Features
//!
//! - `native` (default): Serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mmwflash::{BootloaderSession, FlashOptions, Flasher, NativePortOpener};
//! use mmwflash::{NoopReporter, PartNumber, SerialConfig};
//! use std::path::PathBuf;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115_200);
//!     let session = BootloaderSession::new(NativePortOpener, NoopReporter, config);
//!     let mut flasher = Flasher::new(session, FlashOptions::default());
//!
//!     let files = vec![PathBuf::from("demo.bin")];
//!     let outcome = flasher.run(PartNumber::new("IWR68"), &files)?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod reporter;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, NativePortOpener};
pub use {
    error::{
        ConnectionError, DeviceError, Error, FileError, FlashError, ProtocolError, Result, Stage,
    },
    image::{FileType, FirmwareImage, MAX_APP_FILE_SIZE, MAX_FILE_SIZE},
    port::{Port, PortEnumerator, PortInfo, PortOpener, SerialConfig},
    progress::{ProgressBudget, compute_budget},
    reporter::{NoopReporter, Reporter},
    target::{
        PartFamily, PartNumber, RevisionEra,
        mmwave::{
            BootloaderSession, FlashOptions, Flasher, Opcode, Outcome, SessionState, StorageTarget,
        },
    },
};
