//! Firmware header tables and classification.
//!
//! The first four bytes of every image are a magic number. Which magics are
//! accepted, and what file type each one maps to, depends on the silicon
//! revision era and the part family:
//!
//! | Era     | Family           | Headers                                  |
//! |---------|------------------|------------------------------------------|
//! | PrePG3  | WR12, WR14       | RadarSS, MSS, CALIB, CONFIG (by index)   |
//! | PrePG3  | WR16, WR68, WR18 | meta-image magic, slot chosen by order   |
//! | PostPG3 | all              | meta-image magic, slot chosen by order   |

use {
    super::FileType,
    crate::{
        error::{FileError, Result},
        target::part::{PartFamily, RevisionEra},
    },
};

/// Magic of a legacy RadarSS build.
pub const RADARSS_MAGIC: u32 = 0xB550_0000;

/// Magic of a legacy MSS build.
pub const MSS_MAGIC: u32 = 0x3550_0000;

/// Magic of a calibration blob.
pub const CALIB_MAGIC: u32 = 0xCA11_BDA7;

/// Magic of a configuration blob.
pub const CONFIG_MAGIC: u32 = 0xC0F1_618F;

/// Magic shared by all meta-image slots.
pub const META_IMAGE_MAGIC: u32 = 0x5254_534D;

/// Mask applied to legacy build headers whose low bits carry a version.
pub const LEGACY_HEADER_MASK: u32 = 0xFFF0_0000;

/// Number of meta-image slots.
pub const META_IMAGE_SLOTS: usize = 4;

/// Parallel lists of accepted magics and their file types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderTable {
    headers: &'static [u32],
    file_types: &'static [FileType],
}

impl HeaderTable {
    /// Build a table. Both lists must have the same length.
    pub const fn new(headers: &'static [u32], file_types: &'static [FileType]) -> Self {
        assert!(
            headers.len() == file_types.len(),
            "header and file type lists must have equal length"
        );
        Self {
            headers,
            file_types,
        }
    }

    /// Table for a device.
    pub fn for_device(era: RevisionEra, family: PartFamily) -> &'static Self {
        match (era, family) {
            (RevisionEra::PrePg3, PartFamily::Wr12 | PartFamily::Wr14) => &LEGACY_TABLE,
            _ => &META_IMAGE_TABLE,
        }
    }

    /// Accepted magics.
    pub fn headers(&self) -> &'static [u32] {
        self.headers
    }

    /// File types, parallel to [`headers`](Self::headers).
    pub fn file_types(&self) -> &'static [FileType] {
        self.file_types
    }

    /// First index of `magic`.
    pub fn position(&self, magic: u32) -> Option<usize> {
        self.headers.iter().position(|h| *h == magic)
    }

    /// Index of `file_type` in the type list.
    pub fn type_position(&self, file_type: FileType) -> Option<usize> {
        self.file_types.iter().position(|t| *t == file_type)
    }

    /// File type at `index`.
    pub fn file_type(&self, index: usize) -> Option<FileType> {
        self.file_types.get(index).copied()
    }
}

static LEGACY_TABLE: HeaderTable = HeaderTable::new(
    &[RADARSS_MAGIC, MSS_MAGIC, CALIB_MAGIC, CONFIG_MAGIC],
    &[
        FileType::RadarSsBuild,
        FileType::MssBuild,
        FileType::CalibData,
        FileType::ConfigInfo,
    ],
);

static META_IMAGE_TABLE: HeaderTable = HeaderTable::new(
    &[META_IMAGE_MAGIC; META_IMAGE_SLOTS],
    &[
        FileType::MetaImage1,
        FileType::MetaImage2,
        FileType::MetaImage3,
        FileType::MetaImage4,
    ],
);

/// How a device resolves an exact header match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Silicon revision era.
    pub era: RevisionEra,
    /// Part family.
    pub family: PartFamily,
    /// Whether the part uses the older file format (enables masked matching).
    pub older_format: bool,
}

impl DeviceProfile {
    /// Header table for this device.
    pub fn table(&self) -> &'static HeaderTable {
        HeaderTable::for_device(self.era, self.family)
    }

    /// Whether exact matches are resolved by declared order.
    pub fn resolves_by_order(&self) -> bool {
        self.family.uses_meta_image() || self.era.is_post_pg3()
    }
}

/// Classify a magic for `device`.
///
/// Returns `Ok(None)` when the magic is not valid for the device and
/// [`FileError::InvalidOrder`] when an order-resolved match has `order`
/// outside `1..=4`.
pub fn classify(magic: u32, device: &DeviceProfile, order: usize) -> Result<Option<FileType>> {
    let table = device.table();

    if let Some(index) = table.position(magic) {
        let index = if device.resolves_by_order() {
            if !(1..=META_IMAGE_SLOTS).contains(&order) {
                return Err(FileError::InvalidOrder(order).into());
            }
            order - 1
        } else {
            index
        };
        return Ok(table.file_type(index));
    }

    if device.older_format {
        let masked = magic & LEGACY_HEADER_MASK;
        if let (Some(index), Some(calib)) = (
            table.position(masked),
            table.type_position(FileType::CalibData),
        ) {
            if index < calib {
                return Ok(table.file_type(index));
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn legacy() -> DeviceProfile {
        DeviceProfile {
            era: RevisionEra::PrePg3,
            family: PartFamily::Wr14,
            older_format: true,
        }
    }

    fn meta(era: RevisionEra, family: PartFamily) -> DeviceProfile {
        DeviceProfile {
            era,
            family,
            older_format: matches!(family, PartFamily::Wr12 | PartFamily::Wr14),
        }
    }

    #[test]
    fn test_tables_are_parallel() {
        for era in [RevisionEra::PrePg3, RevisionEra::PostPg3] {
            for family in PartFamily::ALL {
                let table = HeaderTable::for_device(era, family);
                assert_eq!(table.headers().len(), table.file_types().len());
            }
        }
    }

    #[test]
    fn test_legacy_exact_match_by_index() {
        let device = legacy();
        assert_eq!(
            classify(RADARSS_MAGIC, &device, 0).unwrap(),
            Some(FileType::RadarSsBuild)
        );
        assert_eq!(
            classify(MSS_MAGIC, &device, 7).unwrap(),
            Some(FileType::MssBuild)
        );
        assert_eq!(
            classify(CONFIG_MAGIC, &device, 1).unwrap(),
            Some(FileType::ConfigInfo)
        );
    }

    #[test]
    fn test_legacy_masked_match() {
        let device = legacy();
        assert_eq!(
            classify(0xB551_2345, &device, 1).unwrap(),
            Some(FileType::RadarSsBuild)
        );
        assert_eq!(
            classify(0x3559_0001, &device, 1).unwrap(),
            Some(FileType::MssBuild)
        );
    }

    #[test]
    fn test_masked_match_never_reaches_calib() {
        let device = legacy();
        let table = device.table();
        let calib = table.type_position(FileType::CalibData).unwrap();
        // Every masked variant of every header, including CALIB/CONFIG ones.
        for header in table.headers() {
            for low in [0x0000_0001u32, 0x000F_FFFF, 0x0001_0000] {
                let magic = (header & LEGACY_HEADER_MASK) | low;
                if let Some(file_type) = classify(magic, &device, 1).unwrap() {
                    let index = table.type_position(file_type).unwrap();
                    assert!(index < calib, "{magic:#x} -> {file_type}");
                }
            }
        }
        assert_eq!(classify(0xCA10_0000, &device, 1).unwrap(), None);
    }

    #[test]
    fn test_masked_match_only_for_older_format() {
        let device = DeviceProfile {
            older_format: false,
            ..legacy()
        };
        assert_eq!(classify(0xB551_2345, &device, 1).unwrap(), None);
    }

    #[test]
    fn test_meta_image_resolved_by_order() {
        let device = meta(RevisionEra::PostPg3, PartFamily::Wr68);
        assert_eq!(
            classify(META_IMAGE_MAGIC, &device, 2).unwrap(),
            Some(FileType::MetaImage2)
        );
        assert_eq!(
            classify(META_IMAGE_MAGIC, &device, 4).unwrap(),
            Some(FileType::MetaImage4)
        );

        let device = meta(RevisionEra::PrePg3, PartFamily::Wr16);
        assert_eq!(
            classify(META_IMAGE_MAGIC, &device, 1).unwrap(),
            Some(FileType::MetaImage1)
        );
    }

    #[test]
    fn test_post_pg3_legacy_family_uses_meta_table() {
        let device = meta(RevisionEra::PostPg3, PartFamily::Wr14);
        assert_eq!(
            classify(META_IMAGE_MAGIC, &device, 3).unwrap(),
            Some(FileType::MetaImage3)
        );
        assert_eq!(classify(RADARSS_MAGIC, &device, 1).unwrap(), None);
        assert_eq!(classify(0xB551_0000, &device, 1).unwrap(), None);
    }

    #[test]
    fn test_invalid_order() {
        let device = meta(RevisionEra::PostPg3, PartFamily::Wr18);
        for order in [0, 5] {
            assert!(matches!(
                classify(META_IMAGE_MAGIC, &device, order),
                Err(Error::File(FileError::InvalidOrder(o))) if o == order
            ));
        }
    }

    #[test]
    fn test_unrecognized_magic() {
        let device = meta(RevisionEra::PostPg3, PartFamily::Wr68);
        assert_eq!(classify(0xDEAD_BEEF, &device, 1).unwrap(), None);
        // Byte-swapped meta magic is not accepted.
        assert_eq!(classify(0x4D53_5452, &device, 1).unwrap(), None);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let device = meta(RevisionEra::PostPg3, PartFamily::Wr68);
        let first = classify(META_IMAGE_MAGIC, &device, 2).unwrap();
        for _ in 0..10 {
            assert_eq!(classify(META_IMAGE_MAGIC, &device, 2).unwrap(), first);
        }
    }
}
