//! Flash run orchestration.
//!
//! [`Flasher::run`] drives a [`BootloaderSession`] through a complete run:
//!
//! 1. connect (break handshake)
//! 2. set the part number and read the bootloader version
//! 3. classify every candidate file, appending the CONFIG blob when the
//!    device needs one
//! 4. budget progress across the classified files
//! 5. erase the storage target (optional)
//! 6. download the files in declared order
//! 7. disconnect, whatever happened before

use {
    super::{
        protocol::StorageTarget,
        session::{BootloaderSession, Outcome},
    },
    crate::{
        error::{ConnectionError, DeviceError, Error, FileError, FlashError, Stage},
        image::FirmwareImage,
        port::{DEFAULT_TIMEOUT, PortOpener},
        progress::compute_budget,
        reporter::Reporter,
        target::part::PartNumber,
    },
    log::{Level, debug},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Knobs for a flash run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashOptions {
    /// Storage to write to.
    pub storage: StorageTarget,
    /// Erase the storage before downloading.
    pub format: bool,
    /// Mirror flag passed with START_DOWNLOAD.
    pub mirror: bool,
    /// CONFIG blob appended for pre-PG3 parts that need one.
    pub config_blob: Option<PathBuf>,
    /// Command run after break is raised to reset the board.
    pub reset_command: Option<String>,
    /// Drop files with an unrecognized header instead of failing.
    pub skip_unrecognized: bool,
    /// Fail the run when the device NACKs the erase.
    pub strict_erase: bool,
    /// Read timeout for the handshake.
    pub timeout: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            storage: StorageTarget::Sflash,
            format: true,
            mirror: false,
            config_blob: None,
            reset_command: None,
            skip_unrecognized: false,
            strict_erase: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Runs complete flash sequences over a [`BootloaderSession`].
pub struct Flasher<O: PortOpener, R: Reporter> {
    session: BootloaderSession<O, R>,
    options: FlashOptions,
}

impl<O: PortOpener, R: Reporter> Flasher<O, R> {
    /// Create a flasher.
    pub fn new(session: BootloaderSession<O, R>, options: FlashOptions) -> Self {
        Self { session, options }
    }

    /// Run options.
    pub fn options(&self) -> &FlashOptions {
        &self.options
    }

    /// The underlying session.
    pub fn session(&self) -> &BootloaderSession<O, R> {
        &self.session
    }

    /// Flash `files` (declared order = slice order) to a `part` device.
    ///
    /// The session is always disconnected before returning. Cancellation is
    /// reported as [`Outcome::Cancelled`], not as an error.
    pub fn run(&mut self, part: PartNumber, files: &[PathBuf]) -> Result<Outcome, FlashError> {
        let result = self.flash(part, files);
        self.session.disconnect();

        match &result {
            Ok(Outcome::Completed) => self.session.activity(Level::Info, "Flashing completed successfully"),
            Ok(Outcome::Cancelled) => self.session.activity(Level::Warn, "Flashing cancelled"),
            Err(e) => self.session.activity(Level::Error, format!("Flashing failed: {e}")),
        }
        result
    }

    fn flash(&mut self, part: PartNumber, files: &[PathBuf]) -> Result<Outcome, FlashError> {
        let port_name = self.session.config().port_name.clone();
        let reset = self.options.reset_command.clone();
        match self
            .session
            .connect(&port_name, self.options.timeout, reset.as_deref())
        {
            Ok(()) => {},
            Err(Error::Connection(ConnectionError::Cancelled)) => return Ok(Outcome::Cancelled),
            Err(e) => return Err(FlashError::new(Stage::Connect, e)),
        }

        if !part.is_supported() {
            return Err(FlashError::new(
                Stage::Identify,
                DeviceError::UnsupportedPart(part.to_string()),
            ));
        }
        self.session.set_part_number(part);
        self.session
            .determine_revision()
            .map_err(|e| FlashError::new(Stage::Identify, e))?;

        let images = self.classify(files)?;
        let total: u64 = images.iter().map(|i| i.size).sum();
        let budgets = compute_budget(
            &images,
            total,
            self.options.format,
            self.session.chunk_size(),
        );
        debug!("Progress budget: {budgets:?}");

        if self.options.format {
            self.erase()?;
        }

        let storage = self.options.storage;
        for (image, budget) in images.iter().zip(budgets) {
            let Some(file_type) = image.file_type else {
                continue;
            };
            let outcome = self
                .session
                .download_file(&image.path, file_type, self.options.mirror, 0, storage, budget)
                .map_err(|e| FlashError::new(Stage::Download, e))?;
            if outcome.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            self.session.activity(
                Level::Info,
                format!("File {file_type} flashed to {storage}"),
            );
        }

        Ok(Outcome::Completed)
    }

    /// Classify candidates, returning only the files to download.
    fn classify(&mut self, files: &[PathBuf]) -> Result<Vec<FirmwareImage>, FlashError> {
        let mut candidates: Vec<FirmwareImage> = files
            .iter()
            .enumerate()
            .map(|(i, path)| FirmwareImage::new(path, i + 1))
            .collect();

        if !self.session.is_post_pg3() && self.session.part_number().requires_config_file() {
            match &self.options.config_blob {
                Some(path) => {
                    candidates.push(FirmwareImage::new(path, candidates.len()));
                    self.session.activity(
                        Level::Info,
                        "note: CONFIG file is added to list of files for download to the device.",
                    );
                },
                None => self.session.activity(
                    Level::Warn,
                    format!(
                        "{} needs a CONFIG blob on this silicon but none was given",
                        self.session.part_number()
                    ),
                ),
            }
        }

        let mut images = Vec::with_capacity(candidates.len());
        for mut image in candidates {
            match self.session.classify_header(&image.path, image.order) {
                Ok((file_type, size)) => {
                    image.file_type = Some(file_type);
                    image.size = size;
                    images.push(image);
                },
                Err(Error::File(FileError::UnrecognizedHeader { .. }))
                    if self.options.skip_unrecognized =>
                {
                    self.skip(&image.path);
                },
                Err(e) => return Err(FlashError::new(Stage::Classify, e)),
            }
        }

        if images.is_empty() {
            return Err(FlashError::new(Stage::Classify, FileError::NoImages));
        }
        Ok(images)
    }

    fn skip(&mut self, path: &Path) {
        self.session.activity(
            Level::Warn,
            format!("Skipping {}: header not valid for this device", path.display()),
        );
    }

    fn erase(&mut self) -> Result<(), FlashError> {
        match self.session.erase_storage(self.options.storage, 0, 0) {
            Ok(()) => Ok(()),
            Err(e @ Error::Device(DeviceError::Nack { .. })) if !self.options.strict_erase => {
                self.session
                    .activity(Level::Warn, format!("Continuing after erase failure: {e}"));
                Ok(())
            },
            Err(e) => Err(FlashError::new(Stage::Erase, e)),
        }
    }
}
