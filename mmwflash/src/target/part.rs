//! Part numbers, part families and silicon revision eras.

use crate::error::{DeviceError, Result};
use std::fmt;

/// Part numbers accepted by the bootloader client.
pub const SUPPORTED_PARTS: &[&str] = &[
    "AWR12", "AWR14", "AWR16", "IWR12", "IWR14", "IWR16", "AWR68", "AWR18", "IWR68", "IWR18",
];

/// Parts whose images use the older (non meta-image) file format.
const OLDER_FORMAT_PARTS: &[&str] = &["AWR12", "IWR12", "IWR14", "AWR14"];

/// Parts that need an explicit CONFIG blob on pre-revision-3 silicon.
const CONFIG_FILE_PARTS: &[&str] = &["IWR14", "AWR14", "AWR12", "IWR12"];

/// Bootloader version of PG1 xWR14xx/xWR12xx silicon.
pub const VERSION_PG1_14_12: &str = "07000600";

/// Bootloader version of PG2 xWR14xx/xWR12xx silicon.
pub const VERSION_PG2_14_12: &str = "01000601";

/// Bootloader version of PG1 xWR16xx silicon.
pub const VERSION_PG1_16: &str = "08000602";

/// Bootloader versions that identify pre-revision-3 silicon.
pub const PRE_PG3_VERSIONS: &[&str] = &[VERSION_PG1_14_12, VERSION_PG2_14_12];

/// Part-number family, i.e. the `WRxx` core shared by the AWR and IWR lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PartFamily {
    /// xWR12xx.
    Wr12,
    /// xWR14xx.
    Wr14,
    /// xWR16xx.
    Wr16,
    /// xWR68xx.
    Wr68,
    /// xWR18xx.
    Wr18,
}

impl PartFamily {
    /// Every family, in table order.
    pub const ALL: [Self; 5] = [Self::Wr12, Self::Wr14, Self::Wr16, Self::Wr68, Self::Wr18];

    /// Look up a family by its four-character key (e.g. `"WR68"`).
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_uppercase().as_str() {
            "WR12" => Some(Self::Wr12),
            "WR14" => Some(Self::Wr14),
            "WR16" => Some(Self::Wr16),
            "WR68" => Some(Self::Wr68),
            "WR18" => Some(Self::Wr18),
            _ => None,
        }
    }

    /// Whether images for this family are unified meta-images.
    pub fn uses_meta_image(self) -> bool {
        matches!(self, Self::Wr16 | Self::Wr68 | Self::Wr18)
    }
}

impl fmt::Display for PartFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wr12 => write!(f, "WR12"),
            Self::Wr14 => write!(f, "WR14"),
            Self::Wr16 => write!(f, "WR16"),
            Self::Wr68 => write!(f, "WR68"),
            Self::Wr18 => write!(f, "WR18"),
        }
    }
}

/// Silicon process-generation era, as far as the bootloader cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevisionEra {
    /// PG1/PG2 silicon.
    #[default]
    PrePg3,
    /// PG3 and later silicon.
    PostPg3,
}

impl RevisionEra {
    /// Classify a bootloader version string.
    pub fn from_version(version: &str) -> Self {
        if PRE_PG3_VERSIONS.contains(&version) {
            Self::PrePg3
        } else {
            Self::PostPg3
        }
    }

    /// `true` for PG3 and later.
    pub fn is_post_pg3(self) -> bool {
        self == Self::PostPg3
    }
}

impl fmt::Display for RevisionEra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrePg3 => write!(f, "PrePG3"),
            Self::PostPg3 => write!(f, "PostPG3"),
        }
    }
}

/// Device part number such as `IWR68` or `AWR1443`.
///
/// Only the first five characters are significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartNumber(String);

impl PartNumber {
    /// Wrap a part-number string.
    pub fn new(part: impl Into<String>) -> Self {
        Self(part.into().trim().to_ascii_uppercase())
    }

    /// The full string as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn prefix(&self) -> &str {
        self.0.get(..5).unwrap_or(&self.0)
    }

    /// Whether this part is in [`SUPPORTED_PARTS`].
    pub fn is_supported(&self) -> bool {
        SUPPORTED_PARTS.contains(&self.prefix())
    }

    /// Family derived from characters 1..5.
    pub fn family(&self) -> Option<PartFamily> {
        self.0.get(1..5).and_then(PartFamily::from_key)
    }

    /// Like [`family`](Self::family) but fails for unknown parts.
    pub fn require_family(&self) -> Result<PartFamily> {
        self.family()
            .ok_or_else(|| DeviceError::UnsupportedPart(self.0.clone()).into())
    }

    /// Whether images use the older, header-indexed file format.
    pub fn uses_older_format(&self) -> bool {
        OLDER_FORMAT_PARTS.contains(&self.prefix())
    }

    /// Whether pre-revision-3 silicon of this part needs a CONFIG blob.
    pub fn requires_config_file(&self) -> bool {
        CONFIG_FILE_PARTS.contains(&self.prefix())
    }
}

impl fmt::Display for PartNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartNumber {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
