//! mmWave ROM bootloader commands.
//!
//! Every command is a packet (see [`crate::protocol::packet`]) whose payload
//! starts with a one-byte opcode followed by big-endian 32-bit arguments.
//!
//! ## ACK frame
//!
//! ```text
//! +----------+----------+---------+-------------+
//! |  Length  | Checksum | Padding | ACK or NACK |
//! +----------+----------+---------+-------------+
//! | 2 bytes  |    1     |    1    |      1      |
//! +----------+----------+---------+-------------+
//! ```

use {
    crate::{
        error::{ProtocolError, Result},
        image::FileType,
        protocol::{ACK, MAX_PAYLOAD_LEN, NACK, encode_command, retry},
    },
    byteorder::{BigEndian, WriteBytesExt},
    log::trace,
    std::{
        fmt,
        io::{self, Read},
        str::FromStr,
    },
};

/// Default payload bytes per SEND_DATA command.
pub const DEFAULT_CHUNK_SIZE: usize = 240;

/// Largest chunk that still fits one frame next to the opcode.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_LEN - 1;

/// Attempts at reading the ACK frame length before giving up.
pub const ACK_HEADER_ATTEMPTS: usize = 10;

/// Extra single-byte reads allowed while scanning for ACK/NACK.
pub const ACK_SCAN_LIMIT: usize = 10;

/// Bootloader opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Liveness check.
    Ping = 0x20,
    /// Open a file for download.
    StartDownload = 0x21,
    /// Close the open file.
    FileClose = 0x22,
    /// Fetch the status of the previous command.
    GetLastStatus = 0x23,
    /// Data chunk for non-volatile storage.
    SendData = 0x24,
    /// Data chunk for SRAM.
    SendDataRam = 0x26,
    /// End the bootloader session.
    Disconnect = 0x27,
    /// Erase a storage region.
    Erase = 0x28,
    /// Erase a single file.
    FileErase = 0x2E,
    /// Read the bootloader version.
    GetVersionInfo = 0x2F,
}

impl Opcode {
    /// Wire value.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Status codes returned by GET_LAST_STATUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Previous command succeeded.
    Success,
    /// Storage access still in progress.
    AccessInProgress,
    /// Anything else.
    Other(u8),
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x40 => Self::Success,
            0x4B => Self::AccessInProgress,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "RET_SUCCESS"),
            Self::AccessInProgress => write!(f, "RET_ACCESS_IN_PROGRESS"),
            Self::Other(code) => write!(f, "{code:#04x}"),
        }
    }
}

/// Storage the bootloader writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageTarget {
    /// External SDRAM.
    Sdram,
    /// Internal flash.
    Flash,
    /// Serial flash.
    #[default]
    Sflash,
    /// EEPROM.
    Eeprom,
    /// On-chip SRAM.
    Sram,
}

impl StorageTarget {
    /// 32-bit wire code.
    pub fn code(self) -> u32 {
        match self {
            Self::Sdram => 0,
            Self::Flash => 1,
            Self::Sflash => 2,
            Self::Eeprom => 3,
            Self::Sram => 4,
        }
    }

    /// Width in bytes of the GET_LAST_STATUS payload for this target.
    pub fn status_width(self) -> usize {
        if self == Self::Sram { 4 } else { 1 }
    }

    /// Opcode that carries data chunks to this target.
    pub fn data_opcode(self) -> Opcode {
        if self == Self::Sram {
            Opcode::SendDataRam
        } else {
            Opcode::SendData
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sdram => write!(f, "SDRAM"),
            Self::Flash => write!(f, "FLASH"),
            Self::Sflash => write!(f, "SFLASH"),
            Self::Eeprom => write!(f, "EEPROM"),
            Self::Sram => write!(f, "SRAM"),
        }
    }
}

impl FromStr for StorageTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SDRAM" => Ok(Self::Sdram),
            "FLASH" => Ok(Self::Flash),
            "SFLASH" => Ok(Self::Sflash),
            "EEPROM" => Ok(Self::Eeprom),
            "SRAM" => Ok(Self::Sram),
            _ => Err(format!("unknown storage target: {s}")),
        }
    }
}

/// Command builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    args: Vec<u8>,
}

impl Command {
    /// Command with no arguments.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
        }
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn push_u32(mut self, value: u32) -> Self {
        self.args.write_u32::<BigEndian>(value).unwrap();
        self
    }

    /// PING.
    pub fn ping() -> Self {
        Self::new(Opcode::Ping)
    }

    /// GET_LAST_STATUS.
    pub fn get_last_status() -> Self {
        Self::new(Opcode::GetLastStatus)
    }

    /// GET_VERSION_INFO.
    pub fn get_version() -> Self {
        Self::new(Opcode::GetVersionInfo)
    }

    /// START_DOWNLOAD: size, storage, file type, mirror flag.
    pub fn start_download(size: u32, storage: StorageTarget, file_type: FileType, mirror: bool) -> Self {
        Self::new(Opcode::StartDownload)
            .push_u32(size)
            .push_u32(storage.code())
            .push_u32(file_type.code())
            .push_u32(u32::from(mirror))
    }

    /// FILE_CLOSE for `file_type`.
    pub fn file_close(file_type: FileType) -> Self {
        Self::new(Opcode::FileClose).push_u32(file_type.code())
    }

    /// ERASE: storage, offset, capacity.
    pub fn erase(storage: StorageTarget, offset: u32, capacity: u32) -> Self {
        Self::new(Opcode::Erase)
            .push_u32(storage.code())
            .push_u32(offset)
            .push_u32(capacity)
    }

    /// One data chunk for `storage`.
    pub fn data(storage: StorageTarget, chunk: &[u8]) -> Self {
        Self {
            opcode: storage.data_opcode(),
            args: chunk.to_vec(),
        }
    }

    /// Opcode of this command.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Argument bytes.
    pub fn args(&self) -> &[u8] {
        &self.args
    }

    /// Framed packet bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_command(self.opcode.code(), &self.args)
    }
}

/// Read `buf.len()` bytes, treating a read timeout as "nothing yet".
pub(crate) fn try_read_exact<R: Read>(port: &mut R, buf: &mut [u8]) -> Result<bool> {
    match port.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof
            ) =>
        {
            Ok(false)
        },
        Err(e) => Err(e.into()),
    }
}

/// Read the rest of an ACK frame once its length field has arrived.
///
/// Returns `true` for ACK and `false` for NACK.
pub(crate) fn read_ack_body<R: Read>(port: &mut R) -> Result<bool> {
    let mut skip = [0u8; 2]; // checksum, padding
    if !try_read_exact(port, &mut skip)? {
        return Err(ProtocolError::NoAck.into());
    }

    let mut last = None;
    for _ in 0..=ACK_SCAN_LIMIT {
        let mut byte = [0u8; 1];
        if !try_read_exact(port, &mut byte)? {
            break;
        }
        match byte[0] {
            ACK => {
                trace!("Received ACK");
                return Ok(true);
            },
            NACK => {
                trace!("Received NACK");
                return Ok(false);
            },
            other => last = Some(other),
        }
    }

    Err(match last {
        Some(byte) => ProtocolError::UnexpectedControlByte(byte).into(),
        None => ProtocolError::NoAck.into(),
    })
}

/// Wait for an ACK frame without cancellation polling.
///
/// Returns `true` for ACK and `false` for NACK.
pub fn read_ack<R: Read>(port: &mut R) -> Result<bool> {
    let header = retry(ACK_HEADER_ATTEMPTS, |_| {
        let mut len = [0u8; 2];
        Ok(try_read_exact(&mut *port, &mut len)?.then_some(len))
    })?;
    if header.is_none() {
        return Err(ProtocolError::NoAck.into());
    }
    read_ack_body(port)
}
