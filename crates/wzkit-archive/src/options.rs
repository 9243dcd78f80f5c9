//! Open-time configuration.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Regional archive variant. Selects the key stream seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// KMS, KMST, JMS, JMST, EMS and MSEA archives.
    Kms,
    /// GMS, GMST and TMS archives.
    Gms,
    /// BMS and other archives stored without string encryption.
    Classic,
}

impl Variant {
    /// The 16-byte IV used to seed the key stream, if the variant has one.
    pub fn iv(self) -> Option<[u8; 16]> {
        let seed: [u8; 4] = match self {
            Variant::Kms => [0xB9, 0x7D, 0x63, 0xE9],
            Variant::Gms => [0x4D, 0x23, 0xC7, 0x2B],
            Variant::Classic => return None,
        };
        let mut iv = [0u8; 16];
        for chunk in iv.chunks_exact_mut(4) {
            chunk.copy_from_slice(&seed);
        }
        Some(iv)
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Kms => "kms",
            Variant::Gms => "gms",
            Variant::Classic => "classic",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kms" | "kmst" | "jms" | "jmst" | "ems" | "msea" => Ok(Variant::Kms),
            "gms" | "gmst" | "tms" => Ok(Variant::Gms),
            "classic" | "bms" => Ok(Variant::Classic),
            _ => Err(Error::UnknownVariant(s.to_string())),
        }
    }
}

/// How the cipher expands the variant IV into a key stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStreamMode {
    /// Each block is the encryption of the previous one, starting from the IV.
    #[default]
    Chained,
    /// Independent ECB encryption of a zero-filled buffer.
    ///
    /// The variant IV is not used, so every live variant gets the same
    /// stream, and it repeats every 16 bytes. Classic archives still get an
    /// all-zero stream.
    Ecb,
}

/// Which delayed values to materialize ahead of first access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadSelection {
    /// Parse every image while opening the archive.
    pub eager_images: bool,
    /// Decode string properties as soon as their image is parsed.
    pub eager_strings: bool,
    /// Decode canvas pixels as soon as their image is parsed.
    pub eager_canvas: bool,
    /// Read audio payloads as soon as their image is parsed.
    pub eager_audio: bool,
}

impl ReadSelection {
    /// Everything lazy.
    pub const LAZY: Self = Self {
        eager_images: false,
        eager_strings: false,
        eager_canvas: false,
        eager_audio: false,
    };

    /// Everything decoded at open time.
    pub const EAGER: Self = Self {
        eager_images: true,
        eager_strings: true,
        eager_canvas: true,
        eager_audio: true,
    };

    #[inline]
    pub(crate) fn eager_values(&self) -> bool {
        self.eager_strings || self.eager_canvas || self.eager_audio
    }
}

/// Options for [`Archive::open`](crate::Archive::open).
///
/// # Example
///
/// ```
/// use wzkit_archive::{KeyStreamMode, OpenOptions, ReadSelection, Variant};
///
/// let options = OpenOptions::new(Variant::Gms)
///     .key_mode(KeyStreamMode::Chained)
///     .selection(ReadSelection::LAZY);
/// assert!(options.encrypted_names);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub variant: Variant,
    pub key_mode: KeyStreamMode,
    /// Whether directory entry names are encrypted.
    pub encrypted_names: bool,
    pub selection: ReadSelection,
}

impl OpenOptions {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            key_mode: KeyStreamMode::default(),
            encrypted_names: true,
            selection: ReadSelection::LAZY,
        }
    }

    pub fn key_mode(mut self, mode: KeyStreamMode) -> Self {
        self.key_mode = mode;
        self
    }

    pub fn encrypted_names(mut self, encrypted: bool) -> Self {
        self.encrypted_names = encrypted;
        self
    }

    pub fn selection(mut self, selection: ReadSelection) -> Self {
        self.selection = selection;
        self
    }
}
