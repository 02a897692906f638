//! Error types for mmwflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for mmwflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mmwflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Malformed or unexpected data on the wire.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Firmware image file rejected.
    #[error("File error: {0}")]
    File(#[from] FileError),

    /// Device rejected a well-formed request.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Failures while acquiring or handshaking with the bootloader.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The serial port could not be opened.
    #[error("port {port} does not exist, is already open, or permission is denied")]
    PortUnavailable {
        /// Port name.
        port: String,
    },

    /// The device never answered the break handshake.
    #[error("no response from device; power cycle it before re-flashing")]
    NoResponse,

    /// Cancellation was requested while waiting for the device.
    #[error("connection cancelled")]
    Cancelled,

    /// The board reset command could not be started.
    #[error("reset command `{command}` could not be run: {source}")]
    ResetCommand {
        /// Command line as given.
        command: String,
        /// Spawn failure.
        #[source]
        source: io::Error,
    },

    /// An operation that needs a connected device was attempted first.
    #[error("not connected to a device")]
    NotConnected,
}

/// Framing-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Received payload does not sum to the header checksum.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum carried in the packet header.
        expected: u8,
        /// Checksum computed over the received payload.
        actual: u8,
    },

    /// Declared packet length differs from the requested size.
    #[error("length mismatch: requested {expected} bytes, header declares {actual}")]
    LengthMismatch {
        /// Payload length the caller asked for.
        expected: usize,
        /// Payload length declared by the header.
        actual: usize,
    },

    /// A control byte other than ACK/NACK was found where one was required.
    #[error("unexpected control byte {0:#04x}")]
    UnexpectedControlByte(u8),

    /// A host frame did not start with the sync byte.
    #[error("invalid sync byte {0:#04x}")]
    InvalidSync(u8),

    /// The device did not acknowledge within the retry budget.
    #[error("no ACK received from device")]
    NoAck,

    /// Payload too long for the 16-bit length field.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge {
        /// Payload length that was requested.
        len: usize,
        /// Largest payload a frame can carry.
        max: usize,
    },

    /// A frame ended before its declared length.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected byte count.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}

/// Firmware image file problems.
#[derive(Debug, Error)]
pub enum FileError {
    /// The file does not exist.
    #[error("file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The file is shorter than its magic header.
    #[error("file {} is too small: size = {size}", path.display())]
    TooSmall {
        /// File path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
    },

    /// The file exceeds the transfer limit.
    #[error("file {} is too large: size = {size}, limit = {limit}", path.display())]
    TooLarge {
        /// File path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Limit that was exceeded.
        limit: u64,
    },

    /// The file is empty.
    #[error("file {} is empty", .0.display())]
    Empty(PathBuf),

    /// The magic header is not valid for this device.
    #[error("header {magic:#010x} of {} is not valid for {part}", path.display())]
    UnrecognizedHeader {
        /// File path.
        path: PathBuf,
        /// Magic read from the file.
        magic: u32,
        /// Part number the file was checked against.
        part: String,
    },

    /// Declared transfer order is outside 1..=4.
    #[error("file order {0} is not in valid range (1-4)")]
    InvalidOrder(usize),

    /// Nothing left to download after classification.
    #[error("no valid image files to download")]
    NoImages,
}

/// Rejections reported by the device itself.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// NACK returned for a command.
    #[error("device returned NACK for opcode {opcode:#04x}")]
    Nack {
        /// Opcode of the rejected command.
        opcode: u8,
    },

    /// The bootloader version could not be read.
    #[error("could not determine bootloader version")]
    VersionUnavailable,

    /// The configured part number has no header table.
    #[error("unsupported part number: {0}")]
    UnsupportedPart(String),
}

/// Step of a flash run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Break handshake.
    Connect,
    /// Part number and bootloader version.
    Identify,
    /// Header classification of the candidate files.
    Classify,
    /// Storage erase.
    Erase,
    /// File download.
    Download,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Identify => "identify",
            Self::Classify => "classify",
            Self::Erase => "erase",
            Self::Download => "download",
        };
        f.write_str(name)
    }
}

/// A failed flash run, tagged with the step that failed.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct FlashError {
    /// Failing step.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub source: Error,
}

impl FlashError {
    /// Tag `source` with `stage`.
    pub fn new(stage: Stage, source: impl Into<Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
