//! Protocol and product version definitions.

use core::fmt;

/// Wire protocol version.
///
/// The raw value is what the login request carries and what the server
/// acknowledges. Several decoding rules change at 7.2, see
/// [`TdsVersion::has_wide_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.0 (SQL Server 7.0)
    pub const V7_0: Self = Self(0x70000000);

    /// TDS 7.1 (SQL Server 2000)
    pub const V7_1: Self = Self(0x71000000);

    /// TDS 7.1 Revision 1 (SQL Server 2000 SP1)
    pub const V7_1_REV1: Self = Self(0x71000001);

    /// TDS 7.2 (SQL Server 2005)
    pub const V7_2: Self = Self(0x72090002);

    /// TDS 7.3A (SQL Server 2008)
    pub const V7_3A: Self = Self(0x730A0003);

    /// TDS 7.3B (SQL Server 2008 R2)
    pub const V7_3B: Self = Self(0x730B0003);

    /// TDS 7.4 (SQL Server 2012+)
    pub const V7_4: Self = Self(0x74000004);

    /// Create a version from its raw value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this version uses the 7.2+ field widths: 4-byte column user
    /// types, 4-byte error line numbers, 8-byte DONE row counts and the
    /// extension flags byte in the login header.
    #[must_use]
    pub const fn has_wide_fields(self) -> bool {
        self.0 >= Self::V7_2.0
    }

    /// Major version number (always 7 for the versions defined here).
    #[must_use]
    pub const fn major(self) -> u8 {
        ((self.0 >> 28) & 0x0F) as u8
    }

    /// Minor version number.
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }

    /// Parse "7.0" through "7.4" (with optional A/B suffix for 7.3).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "7.0" => Some(Self::V7_0),
            "7.1" => Some(Self::V7_1),
            "7.2" => Some(Self::V7_2),
            "7.3" | "7.3a" => Some(Self::V7_3A),
            "7.3b" => Some(Self::V7_3B),
            "7.4" => Some(Self::V7_4),
            _ => None,
        }
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x730A0003 => write!(f, "TDS 7.3A"),
            0x730B0003 => write!(f, "TDS 7.3B"),
            _ => write!(f, "TDS {}.{}", self.major(), self.minor()),
        }
    }
}

impl From<u32> for TdsVersion {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<TdsVersion> for u32 {
    fn from(version: TdsVersion) -> Self {
        version.0
    }
}

/// Product version carried in the pre-login VERSION option.
///
/// Encoded as major, minor, build (big-endian `u16`) and sub-build
/// (little-endian `u16`), six bytes in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProductVersion {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
    /// Sub-build number.
    pub sub_build: u16,
}

impl ProductVersion {
    /// Encoded size in bytes.
    pub const SIZE: usize = 6;

    /// Version the client reports by default: 9.0.0.0.
    pub const CLIENT_DEFAULT: Self = Self::new(9, 0, 0, 0);

    /// Create a product version.
    #[must_use]
    pub const fn new(major: u8, minor: u8, build: u16, sub_build: u16) -> Self {
        Self {
            major,
            minor,
            build,
            sub_build,
        }
    }

    /// Encode to the six-byte wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 6] {
        let build = self.build.to_be_bytes();
        let sub_build = self.sub_build.to_le_bytes();
        [
            self.major,
            self.minor,
            build[0],
            build[1],
            sub_build[0],
            sub_build[1],
        ]
    }

    /// Decode from at least four bytes; a missing sub-build reads as zero.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let sub_build = if bytes.len() >= 6 {
            u16::from_le_bytes([bytes[4], bytes[5]])
        } else {
            0
        };
        Some(Self {
            major: bytes[0],
            minor: bytes[1],
            build: u16::from_be_bytes([bytes[2], bytes[3]]),
            sub_build,
        })
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.sub_build
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_version_comparison() {
        assert!(TdsVersion::V7_4 > TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B > TdsVersion::V7_3A);
        assert!(TdsVersion::V7_3A > TdsVersion::V7_2);
        assert!(TdsVersion::V7_2 > TdsVersion::V7_1_REV1);
    }

    #[test]
    fn test_wide_fields_start_at_7_2() {
        assert!(!TdsVersion::V7_0.has_wide_fields());
        assert!(!TdsVersion::V7_1.has_wide_fields());
        assert!(!TdsVersion::V7_1_REV1.has_wide_fields());
        assert!(TdsVersion::V7_2.has_wide_fields());
        assert!(TdsVersion::V7_4.has_wide_fields());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::V7_1.to_string(), "TDS 7.1");
        assert_eq!(TdsVersion::V7_3B.to_string(), "TDS 7.3B");
    }

    #[test]
    fn test_parse() {
        assert_eq!(TdsVersion::parse(" 7.3 "), Some(TdsVersion::V7_3A));
        assert_eq!(TdsVersion::parse("7.4"), Some(TdsVersion::V7_4));
        assert_eq!(TdsVersion::parse("8.0"), None);
    }

    #[test]
    fn test_product_version_bytes() {
        assert_eq!(
            ProductVersion::CLIENT_DEFAULT.to_bytes(),
            [0x09, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        let v = ProductVersion::new(13, 0, 6300, 2);
        assert_eq!(ProductVersion::from_bytes(&v.to_bytes()).unwrap(), v);
        assert_eq!(v.to_string(), "13.0.6300.2");
        assert!(ProductVersion::from_bytes(&[1, 2, 3]).is_none());
    }
}
