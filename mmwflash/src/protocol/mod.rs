//! Wire-level building blocks.

pub mod packet;
pub mod retry;

// Re-export common items
pub use packet::{
    ACK, MAX_PAYLOAD_LEN, NACK, SYNC, checksum, decode_command, decode_response, encode_command, encode_packet,
    read_response,
};
pub use retry::retry;
