//! Bootloader packet framing.
//!
//! ## Host to device
//!
//! ```text
//! +------+----------+----------+---------------------+
//! | Sync |  Length  | Checksum |       Payload       |
//! +------+----------+----------+---------------------+
//! |  1   | 2 (BE)   |    1     | opcode + arguments  |
//! +------+----------+----------+---------------------+
//! | 0xAA | len + 2  | sum & FF |                     |
//! +------+----------+----------+---------------------+
//! ```
//!
//! ## Device to host
//!
//! Responses use the same layout without the sync byte. Every successfully
//! received response is acknowledged with a single ACK byte.

use {
    crate::error::{ProtocolError, Result},
    byteorder::{BigEndian, WriteBytesExt},
    log::trace,
    std::io::{self, Read, Write},
};

/// Sync byte that starts every host frame.
pub const SYNC: u8 = 0xAA;

/// Positive acknowledgement.
pub const ACK: u8 = 0xCC;

/// Negative acknowledgement.
pub const NACK: u8 = 0x33;

/// The length field counts the payload plus this offset.
pub const LENGTH_OFFSET: usize = 2;

/// Sync + length + checksum.
pub const HOST_HEADER_LEN: usize = 4;

/// Length + checksum of a device response.
const RESPONSE_HEADER_LEN: usize = 3;

/// Largest payload whose length still fits the 16-bit field.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - LENGTH_OFFSET;

/// 8-bit truncated sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Frame an already assembled payload.
///
/// Fails with [`ProtocolError::PayloadTooLarge`] when the payload does not
/// fit the 16-bit length field.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_packet(payload: &[u8]) -> Result<Vec<u8>> {
    let declared = u16::try_from(payload.len() + LENGTH_OFFSET).map_err(|_| {
        ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        }
    })?;

    let mut buf = Vec::with_capacity(HOST_HEADER_LEN + payload.len());
    buf.push(SYNC);
    buf.write_u16::<BigEndian>(declared).unwrap();
    buf.push(checksum(payload));
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Frame an opcode and its argument bytes.
pub fn encode_command(opcode: u8, args: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(1 + args.len());
    payload.push(opcode);
    payload.extend_from_slice(args);
    encode_packet(&payload)
}

/// Parse a host frame back into `(opcode, args)`.
///
/// This is the device-side view of [`encode_command`]; the length field is
/// checked before the checksum.
pub fn decode_command(frame: &[u8]) -> Result<(u8, Vec<u8>)> {
    if frame.len() < HOST_HEADER_LEN + 1 {
        return Err(ProtocolError::Truncated {
            expected: HOST_HEADER_LEN + 1,
            actual: frame.len(),
        }
        .into());
    }
    if frame[0] != SYNC {
        return Err(ProtocolError::InvalidSync(frame[0]).into());
    }

    let declared = usize::from(u16::from_be_bytes([frame[1], frame[2]]));
    let available = frame.len() - HOST_HEADER_LEN;
    if declared < LENGTH_OFFSET || declared - LENGTH_OFFSET != available {
        return Err(ProtocolError::LengthMismatch {
            expected: available,
            actual: declared.saturating_sub(LENGTH_OFFSET),
        }
        .into());
    }

    let payload = &frame[HOST_HEADER_LEN..];
    let actual = checksum(payload);
    if actual != frame[3] {
        return Err(ProtocolError::ChecksumMismatch {
            expected: frame[3],
            actual,
        }
        .into());
    }

    Ok((payload[0], payload[1..].to_vec()))
}

/// Read one response of exactly `expected_len` payload bytes and ACK it.
pub fn decode_response<P: Read + Write>(port: &mut P, expected_len: usize) -> Result<Vec<u8>> {
    read_response(port, Some(expected_len))
}

/// Read one response of any length and ACK it.
///
/// A device that stops sending partway through is reported as
/// [`ProtocolError::Truncated`].
pub fn read_response<P: Read + Write>(port: &mut P, expected_len: Option<usize>) -> Result<Vec<u8>> {
    let mut header = [0u8; RESPONSE_HEADER_LEN];
    fill(port, &mut header)?;
    let declared = usize::from(u16::from_be_bytes([header[0], header[1]]));
    let header_checksum = header[2];
    let len = declared.saturating_sub(LENGTH_OFFSET);

    if let Some(expected) = expected_len {
        if expected != len {
            return Err(ProtocolError::LengthMismatch {
                expected,
                actual: len,
            }
            .into());
        }
    }

    let mut payload = vec![0u8; len];
    fill(port, &mut payload)?;

    let actual = checksum(&payload);
    if actual != header_checksum {
        return Err(ProtocolError::ChecksumMismatch {
            expected: header_checksum,
            actual,
        }
        .into());
    }

    trace!("Received payload {payload:02X?}");
    port.write_all(&[ACK])?;
    port.flush()?;
    Ok(payload)
}

/// Fill `buf` completely. Running out of data is a truncated frame.
fn fill<R: Read>(port: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match port.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof
                ) =>
            {
                break;
            },
            Err(e) => return Err(e.into()),
        }
    }

    if filled < buf.len() {
        return Err(ProtocolError::Truncated {
            expected: buf.len(),
            actual: filled,
        }
        .into());
    }
    Ok(())
}
