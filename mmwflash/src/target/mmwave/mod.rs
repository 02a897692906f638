//! mmWave radar ROM bootloader.
//!
//! - [`protocol`]: opcodes, storage targets and the ACK frame
//! - [`session`]: per-operation port handling and the command exchanges
//! - [`flasher`]: complete flash runs

pub mod flasher;
pub mod protocol;
pub mod session;

pub use flasher::{FlashOptions, Flasher};
pub use protocol::{Command, Opcode, StatusCode, StorageTarget};
pub use session::{BootloaderSession, Outcome, SessionState};
