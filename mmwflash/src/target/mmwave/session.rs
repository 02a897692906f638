//! Bootloader session.
//!
//! A [`BootloaderSession`] tracks the logical connection to one device. The
//! serial port itself is only held for the duration of a single operation:
//! every public method opens a fresh port through its [`PortOpener`] and
//! releases it before returning, on success and on error alike.
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingBreakAck -> Connected
//!                                                       |
//!                                      get_version      v
//!                                               VersionQueried
//!                                                       |
//!                                determine_revision     v
//!                                                     Ready
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use mmwflash::{BootloaderSession, NativePortOpener, NoopReporter, SerialConfig};
//! use mmwflash::{PartNumber, ProgressBudget, StorageTarget};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SerialConfig::new("/dev/ttyUSB0", 115_200);
//!     let mut session = BootloaderSession::new(NativePortOpener, NoopReporter, config);
//!
//!     session.connect("/dev/ttyUSB0", Duration::from_secs(10), None)?;
//!     session.set_part_number(PartNumber::new("IWR68"));
//!     session.determine_revision()?;
//!
//!     let path = Path::new("demo.bin");
//!     let (file_type, _) = session.classify_header(path, 1)?;
//!     session.erase_storage(StorageTarget::Sflash, 0, 0)?;
//!     session.download_file(path, file_type, false, 0, StorageTarget::Sflash, ProgressBudget::default())?;
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

use {
    super::protocol::{
        Command, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, Opcode, StatusCode, StorageTarget, read_ack,
        read_ack_body, try_read_exact,
    },
    crate::{
        error::{ConnectionError, DeviceError, Error, FileError, Result},
        image::{
            FileType, check_size,
            header::{DeviceProfile, classify},
            read_magic,
        },
        port::{Port, PortOpener, SerialConfig},
        progress::{ProgressBudget, ProgressState},
        protocol::{decode_response, read_response, retry},
        reporter::Reporter,
        target::part::{PartNumber, RevisionEra},
    },
    log::{Level, debug, trace, warn},
    std::{
        fs::File,
        io::{self, Read},
        path::Path,
        process,
        thread,
        time::Duration,
    },
};

/// Outer polling rounds while waiting for the break ACK.
const CONNECT_ROUNDS: usize = 10;

/// Length-header reads per polling round.
const CONNECT_READS_PER_ROUND: usize = 2;

/// Pause between raising break and listening for the answer.
const BREAK_SETTLE: Duration = Duration::from_millis(100);

const CANCEL_MSG: &str = "Cancel request detected...Ceasing flashing operation.";

/// Logical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No handshake performed.
    #[default]
    Disconnected,
    /// Port being opened.
    Connecting,
    /// Break raised, waiting for the bootloader.
    AwaitingBreakAck,
    /// Handshake done.
    Connected,
    /// Bootloader version read.
    VersionQueried,
    /// Revision known, ready for erase and download.
    Ready,
}

impl SessionState {
    /// Whether the handshake has completed.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::VersionQueried | Self::Ready)
    }
}

/// How a download ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every byte was transferred.
    Completed,
    /// The reporter asked to stop.
    Cancelled,
}

impl Outcome {
    /// `true` for [`Outcome::Cancelled`].
    pub fn is_cancelled(self) -> bool {
        self == Self::Cancelled
    }
}

/// Host side of the ROM bootloader protocol.
pub struct BootloaderSession<O: PortOpener, R: Reporter> {
    opener: O,
    reporter: R,
    config: SerialConfig,
    chunk_size: usize,
    part: PartNumber,
    era: RevisionEra,
    status_width: usize,
    state: SessionState,
    progress: ProgressState,
    cancel_requested: bool,
}

impl<O: PortOpener, R: Reporter> BootloaderSession<O, R> {
    /// Create a disconnected session.
    pub fn new(opener: O, reporter: R, config: SerialConfig) -> Self {
        Self {
            opener,
            reporter,
            config,
            chunk_size: DEFAULT_CHUNK_SIZE,
            part: PartNumber::new(""),
            era: RevisionEra::default(),
            status_width: 1,
            state: SessionState::Disconnected,
            progress: ProgressState::default(),
            cancel_requested: false,
        }
    }

    /// Override the chunk size, clamped to `1..=MAX_CHUNK_SIZE`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    /// Current logical state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serial configuration used for every operation.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Configured part number.
    pub fn part_number(&self) -> &PartNumber {
        &self.part
    }

    /// Silicon revision era. Only meaningful after
    /// [`determine_revision`](Self::determine_revision).
    pub fn revision_era(&self) -> RevisionEra {
        self.era
    }

    /// Whether the device is PG3 or later silicon.
    pub fn is_post_pg3(&self) -> bool {
        self.era.is_post_pg3()
    }

    /// Cumulative progress percentage.
    pub fn progress_percent(&self) -> u8 {
        self.progress.percent()
    }

    /// Whether a cancellation was observed.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Bytes per data chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// The reporter.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Set the part number. No I/O.
    pub fn set_part_number(&mut self, part: PartNumber) {
        self.part = part;
    }

    /// Log an activity message through the reporter.
    pub fn activity(&mut self, level: Level, message: impl AsRef<str>) {
        self.reporter.on_log(level, message.as_ref());
    }

    /// Push a progress increment. An empty `message` keeps the last one.
    pub fn advance(&mut self, message: &str, increment: u32) {
        let (message, percent) = self.progress.advance(message, increment);
        self.reporter.on_progress(message, percent);
    }

    /// Treat the device as connected without the break handshake.
    pub fn skip_connect(&mut self) {
        debug!("Skipping break handshake");
        self.state = SessionState::Connected;
    }

    /// Open `port_name`, raise break and wait for the bootloader.
    ///
    /// `reset_command`, when given, is run after break is raised to reset the
    /// board into its bootloader.
    pub fn connect(&mut self, port_name: &str, timeout: Duration, reset_command: Option<&str>) -> Result<()> {
        port_name.clone_into(&mut self.config.port_name);
        self.config.timeout = timeout;
        self.cancel_requested = false;
        self.progress = ProgressState::default();

        self.activity(Level::Info, format!("Connecting to COM port {port_name}..."));
        self.state = SessionState::Connecting;

        match self.handshake(reset_command) {
            Ok(()) => {
                self.state = SessionState::Connected;
                Ok(())
            },
            Err(e) => {
                self.state = SessionState::Disconnected;
                if !matches!(e, Error::Connection(ConnectionError::Cancelled)) {
                    self.activity(
                        Level::Error,
                        "Failure: Recheck that correct COM port was provided or power cycle the device.",
                    );
                }
                Err(e)
            },
        }
    }

    fn handshake(&mut self, reset_command: Option<&str>) -> Result<()> {
        let mut port = self.open_port()?;
        let message = format!("Opening COM port {}...", self.config.port_name);
        self.advance(&message, 1);

        port.set_timeout(self.config.timeout)?;
        port.set_break(true)?;
        self.state = SessionState::AwaitingBreakAck;
        thread::sleep(BREAK_SETTLE);

        if let Some(command) = reset_command.filter(|c| !c.trim().is_empty()) {
            run_reset_command(command)?;
        }

        if !self.await_break_ack(&mut port)? {
            self.activity(Level::Error, "Device answered the break with NACK.");
            return Err(ConnectionError::NoResponse.into());
        }

        self.activity(
            Level::Info,
            "Connection to COM port succeeded. Flashing can proceed.",
        );
        self.advance("Connected to COM port.", 1);
        port.set_break(false)?;
        release(&mut port);
        Ok(())
    }

    /// Poll for the break ACK, checking for cancellation after each round.
    fn await_break_ack(&mut self, port: &mut O::Port) -> Result<bool> {
        let reporter = &mut self.reporter;
        let header = retry(CONNECT_ROUNDS, |round| {
            trace!("Waiting for break ACK, round {round}");
            let header = retry(CONNECT_READS_PER_ROUND, |_| {
                let mut len = [0u8; 2];
                Ok(try_read_exact(&mut *port, &mut len)?.then_some(len))
            })?;
            if reporter.is_cancelled() {
                return Err(ConnectionError::Cancelled.into());
            }
            Ok(header)
        });

        match header {
            Ok(Some(_)) => read_ack_body(port),
            Ok(None) => {
                self.activity(
                    Level::Error,
                    "Initial response from the device was not received. Please power cycle device before re-flashing.",
                );
                Err(ConnectionError::NoResponse.into())
            },
            Err(Error::Connection(ConnectionError::Cancelled)) => {
                self.cancel_requested = true;
                self.activity(Level::Info, CANCEL_MSG);
                Err(ConnectionError::Cancelled.into())
            },
            Err(e) => Err(e),
        }
    }

    /// Report the end of the session and mark it disconnected.
    pub fn disconnect(&mut self) {
        let message = format!(
            "Disconnecting from device on COM port {} ...",
            self.config.port_name
        );
        self.activity(Level::Info, &message);
        self.advance(&message, 1);
        self.state = SessionState::Disconnected;
    }

    /// Send PING and wait for the ACK.
    pub fn ping(&mut self) -> Result<()> {
        let mut port = self.open_port()?;
        let result = send_and_ack(&mut port, &Command::ping());
        release(&mut port);
        if result? {
            debug!("Device answered PING");
            Ok(())
        } else {
            Err(DeviceError::Nack {
                opcode: Opcode::Ping.code(),
            }
            .into())
        }
    }

    /// Read the bootloader version as eight lowercase hex digits.
    ///
    /// Returns `None` when the version could not be read.
    pub fn get_version(&mut self) -> Option<String> {
        self.activity(Level::Info, "Reading device version info...");
        match self.read_version() {
            Ok(version) => {
                debug!("Truncated version info = {version}");
                if self.state == SessionState::Connected {
                    self.state = SessionState::VersionQueried;
                }
                Some(version)
            },
            Err(e) => {
                self.activity(Level::Error, format!("Version read was not successful: {e}"));
                None
            },
        }
    }

    fn read_version(&mut self) -> Result<String> {
        let mut port = self.open_port()?;
        let result = query_version(&mut port);
        release(&mut port);
        result
    }

    /// Read the version and derive the revision era from it.
    pub fn determine_revision(&mut self) -> Result<RevisionEra> {
        let version = self
            .get_version()
            .ok_or(DeviceError::VersionUnavailable)?;
        self.era = RevisionEra::from_version(&version);
        self.activity(
            Level::Info,
            format!("Bootloader version {version} ({})", self.era),
        );
        if self.state.is_connected() {
            self.state = SessionState::Ready;
        }
        Ok(self.era)
    }

    /// Erase `capacity` bytes of `target` from `offset` (0/0 erases all).
    ///
    /// A NACK is returned as [`DeviceError::Nack`]; the caller decides
    /// whether that aborts the run.
    pub fn erase_storage(&mut self, target: StorageTarget, offset: u32, capacity: u32) -> Result<()> {
        self.ensure_connected()?;
        self.activity(Level::Info, format!("Erasing storage [{target}]"));

        let mut port = self.open_port()?;
        self.advance("Sending Erase command to device...", 1);
        let result = send_and_ack(&mut port, &Command::erase(target, offset, capacity));

        let result = match result {
            Ok(true) => {
                self.activity(Level::Info, "Erase storage completed successfully!");
                Ok(())
            },
            Ok(false) => {
                self.activity(
                    Level::Error,
                    "Erase storage did not complete. Reset device and try again",
                );
                Err(DeviceError::Nack {
                    opcode: Opcode::Erase.code(),
                }
                .into())
            },
            Err(e) => Err(e),
        };

        self.advance("", 1);
        release(&mut port);
        result
    }

    /// Classify `path` for the configured part and revision.
    ///
    /// Returns the file type and the file size.
    pub fn classify_header(&mut self, path: &Path, order: usize) -> Result<(FileType, u64)> {
        self.activity(
            Level::Info,
            format!(
                "Checking file {} for correct header for {}.",
                path.display(),
                self.part
            ),
        );
        let (magic, size) = read_magic(path)?;
        self.advance("Checking fileType appropriateness for this device...", 2);

        let profile = DeviceProfile {
            era: self.era,
            family: self.part.require_family()?,
            older_format: self.part.uses_older_format(),
        };

        match classify(magic, &profile, order)? {
            Some(file_type) => {
                self.activity(
                    Level::Info,
                    format!("{} device, fileType={file_type} detected -> OK", self.part),
                );
                self.advance("", 1);
                Ok((file_type, size))
            },
            None => {
                self.activity(
                    Level::Warn,
                    format!(
                        "Header of {} indicates it is not a valid file to flash to {}: {magic:#x}",
                        path.display(),
                        self.part
                    ),
                );
                Err(FileError::UnrecognizedHeader {
                    path: path.to_path_buf(),
                    magic,
                    part: self.part.to_string(),
                }
                .into())
            },
        }
    }

    /// Download one file.
    ///
    /// FILE_CLOSE is sent whenever START_DOWNLOAD was sent, including after a
    /// NACK, a failed chunk or a cancellation.
    pub fn download_file(
        &mut self,
        path: &Path,
        file_type: FileType,
        mirror: bool,
        max_size: u64,
        target: StorageTarget,
        budget: ProgressBudget,
    ) -> Result<Outcome> {
        self.ensure_connected()?;
        if !path.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()).into());
        }
        let size = path.metadata()?.len();
        self.status_width = target.status_width();
        self.activity(
            Level::Info,
            format!("Downloading [{file_type}] size [{size}]"),
        );
        if let Err(e) = check_size(path, size, file_type) {
            self.activity(Level::Error, "Invalid file size");
            return Err(e);
        }
        let wire_size = u32::try_from(size).map_err(|_| FileError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: u64::from(u32::MAX),
        })?;
        debug!("Reserving {} bytes", max_size.max(size));

        let mut file = File::open(path)?;
        let mut port = self.open_port()?;
        self.advance(
            &format!("Downloading [{file_type}] size [{size}]..."),
            1,
        );

        let start = Command::start_download(wire_size, target, file_type, mirror);
        let transfer = exchange(&mut port, &start, self.status_width)
            .and_then(|()| self.send_chunks(&mut port, &mut file, size, target, budget));

        let close = exchange(&mut port, &Command::file_close(file_type), self.status_width);
        release(&mut port);

        match (transfer, close) {
            (Ok(Outcome::Completed), close) => close.map(|()| Outcome::Completed),
            (Ok(Outcome::Cancelled), close) => {
                if let Err(e) = close {
                    warn!("FILE_CLOSE after cancellation failed: {e}");
                }
                Ok(Outcome::Cancelled)
            },
            (Err(e), close) => {
                if let Err(close_err) = close {
                    warn!("FILE_CLOSE after failed transfer failed: {close_err}");
                }
                Err(e)
            },
        }
    }

    fn send_chunks(
        &mut self,
        port: &mut O::Port,
        file: &mut File,
        size: u64,
        target: StorageTarget,
        budget: ProgressBudget,
    ) -> Result<Outcome> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;
        let mut spacing = 0u32;
        let mut chunks = 0usize;

        while offset < size {
            let len = read_chunk(file, &mut buf)?;
            if len == 0 {
                warn!("File ended at {offset} of {size} bytes");
                break;
            }

            exchange(port, &Command::data(target, &buf[..len]), self.status_width)?;
            chunks += 1;

            spacing += 1;
            if spacing == budget.spacing_count {
                spacing = 0;
                self.advance("", budget.percent_increment);
            }
            offset += len as u64;

            if self.reporter.is_cancelled() {
                self.cancel_requested = true;
                self.activity(Level::Info, CANCEL_MSG);
                return Ok(Outcome::Cancelled);
            }
        }

        debug!("Sent {chunks} chunks ({offset} bytes)");
        Ok(Outcome::Completed)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected.into())
        }
    }

    fn open_port(&mut self) -> Result<O::Port> {
        let mut port = self.opener.open(&self.config)?;
        port.clear_buffers()?;
        trace!("Opened {}", port.name());
        Ok(port)
    }
}

/// Close `port`, logging instead of failing.
fn release<P: Port>(port: &mut P) {
    if let Err(e) = port.close() {
        warn!("Closing {} failed: {e}", port.name());
    }
}

/// Send a packet and wait for its ACK frame.
fn send_and_ack<P: Port>(port: &mut P, command: &Command) -> Result<bool> {
    trace!("Sending {:?} ({} arg bytes)", command.opcode(), command.args().len());
    port.write_all_bytes(&command.encode()?)?;
    read_ack(port)
}

/// Full command exchange: packet, ACK, GET_LAST_STATUS, status response.
///
/// Succeeds only when the command was ACKed and the status was fetched.
fn exchange<P: Port>(port: &mut P, command: &Command, status_width: usize) -> Result<()> {
    let acked = send_and_ack(port, command)?;
    port.write_all_bytes(&Command::get_last_status().encode()?)?;
    let status = decode_response(port, status_width)?;
    let code = StatusCode::from(status.first().copied().unwrap_or_default());
    trace!(
        "{:?}: {}, last status {code}",
        command.opcode(),
        if acked { "ACK" } else { "NACK" }
    );

    if acked {
        Ok(())
    } else {
        Err(DeviceError::Nack {
            opcode: command.opcode().code(),
        }
        .into())
    }
}

fn query_version<P: Port>(port: &mut P) -> Result<String> {
    if !send_and_ack(port, &Command::get_version())? {
        return Err(DeviceError::Nack {
            opcode: Opcode::GetVersionInfo.code(),
        }
        .into());
    }
    let payload = read_response(port, None)?;
    if payload.len() < 4 {
        return Err(DeviceError::VersionUnavailable.into());
    }
    Ok(payload[..4].iter().map(|b| format!("{b:02x}")).collect())
}

/// Fill `buf` from `reader`, stopping early only at end of file.
fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn run_reset_command(command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return Ok(());
    };
    debug!("Running reset command: {command}");
    let status = process::Command::new(program)
        .args(parts)
        .status()
        .map_err(|source| ConnectionError::ResetCommand {
            command: command.to_string(),
            source,
        })?;
    if !status.success() {
        warn!("Reset command `{command}` exited with {status}");
    }
    Ok(())
}
