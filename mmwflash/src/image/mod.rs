//! Firmware image files.

pub mod header;

use {
    crate::error::{FileError, Result},
    byteorder::{BigEndian, ReadBytesExt},
    std::{
        fmt,
        fs::File,
        path::{Path, PathBuf},
    },
};

/// Exclusive upper bound on any image size (1 MiB).
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Upper bound on a legacy MSS application image.
pub const MAX_APP_FILE_SIZE: u64 = 166_912;

/// Size of the magic header.
pub const FILE_HEADER_SIZE: u64 = 4;

/// File types understood by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Radar subsystem firmware.
    RadarSsBuild,
    /// Calibration data.
    CalibData,
    /// Configuration blob.
    ConfigInfo,
    /// Master subsystem application.
    MssBuild,
    /// Meta-image slot 1.
    MetaImage1,
    /// Meta-image slot 2.
    MetaImage2,
    /// Meta-image slot 3.
    MetaImage3,
    /// Meta-image slot 4.
    MetaImage4,
}

impl FileType {
    /// 32-bit wire code.
    pub fn code(self) -> u32 {
        match self {
            Self::RadarSsBuild => 0,
            Self::CalibData => 1,
            Self::ConfigInfo => 2,
            Self::MssBuild => 3,
            Self::MetaImage1 => 4,
            Self::MetaImage2 => 5,
            Self::MetaImage3 => 6,
            Self::MetaImage4 => 7,
        }
    }

    /// Size cap for this file type.
    pub fn size_limit(self) -> u64 {
        match self {
            Self::MssBuild => MAX_APP_FILE_SIZE,
            _ => MAX_FILE_SIZE - 1,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RadarSsBuild => "RadarSS_BUILD",
            Self::CalibData => "CALIB_DATA",
            Self::ConfigInfo => "CONFIG_INFO",
            Self::MssBuild => "MSS_BUILD",
            Self::MetaImage1 => "META_IMAGE1",
            Self::MetaImage2 => "META_IMAGE2",
            Self::MetaImage3 => "META_IMAGE3",
            Self::MetaImage4 => "META_IMAGE4",
        };
        f.write_str(name)
    }
}

/// A firmware file queued for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Path on disk.
    pub path: PathBuf,
    /// 1-based transfer order.
    pub order: usize,
    /// Type assigned by header classification.
    pub file_type: Option<FileType>,
    /// Size in bytes, known after classification.
    pub size: u64,
}

impl FirmwareImage {
    /// Unclassified image.
    pub fn new(path: impl Into<PathBuf>, order: usize) -> Self {
        Self {
            path: path.into(),
            order,
            file_type: None,
            size: 0,
        }
    }
}

/// Read the magic header of `path` together with the file size.
pub fn read_magic(path: &Path) -> Result<(u32, u64)> {
    if !path.is_file() {
        return Err(FileError::NotFound(path.to_path_buf()).into());
    }
    let size = path.metadata()?.len();
    if size < FILE_HEADER_SIZE {
        return Err(FileError::TooSmall {
            path: path.to_path_buf(),
            size,
        }
        .into());
    }
    let magic = File::open(path)?.read_u32::<BigEndian>()?;
    Ok((magic, size))
}

/// Check `size` against the transfer limits for `file_type`.
pub fn check_size(path: &Path, size: u64, file_type: FileType) -> Result<()> {
    if size == 0 {
        return Err(FileError::Empty(path.to_path_buf()).into());
    }
    if size >= MAX_FILE_SIZE {
        return Err(FileError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: MAX_FILE_SIZE,
        }
        .into());
    }
    if size > file_type.size_limit() {
        return Err(FileError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: file_type.size_limit(),
        }
        .into());
    }
    Ok(())
}
