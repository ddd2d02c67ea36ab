//! Thumbnail directory names
//!
//! The directory a variant lives in is its cache key. The name encodes the
//! requested box, every set resize flag and a non-default quality, always in the
//! same order, so two different parameter tuples never share a directory.

use crate::{ImageStorageError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// JPEG quality used when a request does not ask for one
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Resize behaviour bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResizeFlags(u8);

impl ResizeFlags {
    /// Scale proportionally to fit inside the box
    pub const FIT: ResizeFlags = ResizeFlags(0b0000);
    /// Never enlarge
    pub const SHRINK_ONLY: ResizeFlags = ResizeFlags(0b0001);
    /// Ignore the aspect ratio
    pub const STRETCH: ResizeFlags = ResizeFlags(0b0010);
    /// Scale proportionally to cover the box
    pub const FILL: ResizeFlags = ResizeFlags(0b0100);
    /// Cover the box, then crop the centre to it
    pub const EXACT: ResizeFlags = ResizeFlags(0b1000);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        ResizeFlags(bits & 0b1111)
    }

    pub fn contains(&self, other: ResizeFlags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_fit(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ResizeFlags {
    type Output = ResizeFlags;

    fn bitor(self, rhs: ResizeFlags) -> ResizeFlags {
        ResizeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ResizeFlags {
    fn bitor_assign(&mut self, rhs: ResizeFlags) {
        self.0 |= rhs.0;
    }
}

impl FromStr for ResizeFlags {
    type Err = ImageStorageError;

    /// Parse names such as `fill`, `exact|shrink_only` or `fit`
    fn from_str(s: &str) -> Result<Self> {
        let mut flags = ResizeFlags::FIT;
        for part in s.split(|c| c == ',' || c == '|') {
            flags |= match part.trim().to_lowercase().as_str() {
                "" | "fit" => ResizeFlags::FIT,
                "fill" => ResizeFlags::FILL,
                "exact" => ResizeFlags::EXACT,
                "shrink_only" | "shrink-only" => ResizeFlags::SHRINK_ONLY,
                "stretch" => ResizeFlags::STRETCH,
                other => {
                    return Err(ImageStorageError::InvalidFlags(format!(
                        "{}. Valid options: fit, fill, exact, shrink_only, stretch",
                        other
                    )))
                }
            };
        }
        Ok(flags)
    }
}

impl fmt::Display for ResizeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fit() {
            return write!(f, "fit");
        }
        let names: Vec<&str> = [
            (ResizeFlags::FILL, "fill"),
            (ResizeFlags::EXACT, "exact"),
            (ResizeFlags::SHRINK_ONLY, "shrink_only"),
            (ResizeFlags::STRETCH, "stretch"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// Directory name for a variant, e.g. `100x100`, `0x80FSO` or `640x480q80`
///
/// Zero dimensions count as absent; at least one must be given.
pub fn directory_name(
    width: Option<u32>,
    height: Option<u32>,
    flags: ResizeFlags,
    quality: u8,
) -> Result<String> {
    let width = width.filter(|w| *w > 0);
    let height = height.filter(|h| *h > 0);

    let mut name = match (width, height) {
        (Some(width), Some(height)) => format!("{}x{}", width, height),
        (Some(width), None) => format!("{}x0", width),
        (None, Some(height)) => format!("0x{}", height),
        (None, None) => return Err(ImageStorageError::InvalidDimensions),
    };

    if flags.contains(ResizeFlags::FILL) {
        name.push('F');
    }
    if flags.contains(ResizeFlags::EXACT) {
        name.push('E');
    }
    if flags.contains(ResizeFlags::SHRINK_ONLY) {
        name.push_str("SO");
    }
    if flags.contains(ResizeFlags::STRETCH) {
        name.push_str("ST");
    }

    if quality != DEFAULT_JPEG_QUALITY {
        name.push_str(&format!("q{}", quality));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_tokens() {
        let fit = ResizeFlags::FIT;
        let q = DEFAULT_JPEG_QUALITY;
        assert_eq!(directory_name(Some(100), Some(100), fit, q).unwrap(), "100x100");
        assert_eq!(directory_name(Some(100), None, fit, q).unwrap(), "100x0");
        assert_eq!(directory_name(None, Some(80), fit, q).unwrap(), "0x80");
        assert_eq!(directory_name(Some(100), Some(0), fit, q).unwrap(), "100x0");
    }

    #[test]
    fn test_missing_dimensions_rejected() {
        for (width, height) in [(None, None), (Some(0), Some(0)), (Some(0), None)] {
            assert!(matches!(
                directory_name(width, height, ResizeFlags::FIT, DEFAULT_JPEG_QUALITY),
                Err(ImageStorageError::InvalidDimensions)
            ));
        }
    }

    #[test]
    fn test_flag_suffixes_in_fixed_order() {
        let q = DEFAULT_JPEG_QUALITY;
        let all = ResizeFlags::STRETCH | ResizeFlags::SHRINK_ONLY | ResizeFlags::EXACT | ResizeFlags::FILL;
        assert_eq!(directory_name(Some(10), Some(20), all, q).unwrap(), "10x20FESOST");
        assert_eq!(
            directory_name(Some(10), Some(20), ResizeFlags::FILL | ResizeFlags::SHRINK_ONLY, q).unwrap(),
            "10x20FSO"
        );
        assert_eq!(directory_name(Some(10), None, ResizeFlags::EXACT, q).unwrap(), "10x0E");
    }

    #[test]
    fn test_quality_suffix_only_when_not_default() {
        assert_eq!(
            directory_name(Some(640), Some(480), ResizeFlags::FIT, 80).unwrap(),
            "640x480q80"
        );
        assert_eq!(
            directory_name(Some(640), Some(480), ResizeFlags::STRETCH, 60).unwrap(),
            "640x480STq60"
        );
    }

    #[test]
    fn test_distinct_parameters_give_distinct_tokens() {
        let fit_80 = directory_name(Some(100), Some(100), ResizeFlags::FIT, 80).unwrap();
        let exact_80 = directory_name(Some(100), Some(100), ResizeFlags::EXACT, 80).unwrap();
        let fit_95 = directory_name(Some(100), Some(100), ResizeFlags::FIT, 95).unwrap();
        assert_ne!(fit_80, exact_80);
        assert_ne!(fit_80, fit_95);

        // Same input, same token
        assert_eq!(
            fit_80,
            directory_name(Some(100), Some(100), ResizeFlags::FIT, 80).unwrap()
        );

        let combos: Vec<String> = (0u8..16)
            .map(|bits| {
                directory_name(Some(100), Some(100), ResizeFlags::from_bits(bits), 95).unwrap()
            })
            .collect();
        let mut unique = combos.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), combos.len());
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!("fit".parse::<ResizeFlags>().unwrap(), ResizeFlags::FIT);
        assert_eq!(
            "fill|shrink_only".parse::<ResizeFlags>().unwrap(),
            ResizeFlags::FILL | ResizeFlags::SHRINK_ONLY
        );
        assert_eq!("EXACT".parse::<ResizeFlags>().unwrap(), ResizeFlags::EXACT);
        assert!("sideways".parse::<ResizeFlags>().is_err());
        assert_eq!((ResizeFlags::FILL | ResizeFlags::STRETCH).to_string(), "fill|stretch");
    }
}
