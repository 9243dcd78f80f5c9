//! Mixed-endian GUID type.
//!
//! Media records store 16-byte identifiers in the Windows `GUID` layout: the
//! first three groups are little-endian integers, the last eight bytes are
//! stored as-is.

use std::fmt;
use std::str::FromStr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::Error;

/// A 16-byte GUID in the Windows `GUID` memory layout.
///
/// Format: `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`
///
/// # Byte Layout
///
/// - First group: bytes 3,2,1,0 (little-endian `u32`)
/// - Second group: bytes 5,4 (little-endian `u16`)
/// - Third group: bytes 7,6 (little-endian `u16`)
/// - Fourth and fifth groups: bytes 8..16 in storage order
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Guid {
    bytes: [u8; 16],
}

/// Storage index of each byte in display order.
const DISPLAY_ORDER: [usize; 16] = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];

/// Character offset of each displayed byte in the hyphenated string.
const STRING_OFFSETS: [usize; 16] = [0, 2, 4, 6, 9, 11, 14, 16, 19, 21, 24, 26, 28, 30, 32, 34];

impl Guid {
    /// Empty GUID (all zeros).
    pub const EMPTY: Self = Self { bytes: [0; 16] };

    /// Create a GUID from its 16 stored bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self { bytes }
    }

    /// Get the raw stored bytes of the GUID.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Check if the GUID is empty (all zeros).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes == [0; 16]
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &index) in DISPLAY_ORDER.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", self.bytes[index])?;
        }
        Ok(())
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 36 || !s.is_ascii() {
            return Err(Error::InvalidGuid(format!(
                "expected 36 ASCII characters, got {}",
                s.len()
            )));
        }

        let raw = s.as_bytes();
        if raw[8] != b'-' || raw[13] != b'-' || raw[18] != b'-' || raw[23] != b'-' {
            return Err(Error::InvalidGuid("invalid hyphen positions".into()));
        }

        let mut bytes = [0u8; 16];
        for (&index, &start) in DISPLAY_ORDER.iter().zip(STRING_OFFSETS.iter()) {
            bytes[index] = u8::from_str_radix(&s[start..start + 2], 16)
                .map_err(|_| Error::InvalidGuid(format!("invalid hex at position {}", start)))?;
        }

        Ok(Self { bytes })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Guid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
