//! Primitive decoders: compact integers, encrypted strings, string blocks and
//! obfuscated offsets.

use std::ops::{Deref, DerefMut};

use wzkit_common::BinaryReader;

use crate::crypto::KeyStream;
use crate::{Error, Result};

/// Marker byte that widens a compact integer to its literal form.
const COMPACT_WIDE: i8 = -128;
/// Length prefix announcing a 32-bit UTF-16 length.
const UNICODE_WIDE: i8 = 127;
/// Constant subtracted while deriving the offset key.
const OFFSET_CONSTANT: u32 = 0x581C_3F6D;

/// Compute the rotated key that masks a stored offset at `pos`.
///
/// The rotation amount is taken from the low five bits of the value itself.
#[inline]
pub fn offset_key(pos: u32, fstart: u32, version_hash: u32) -> u32 {
    let r = (pos.wrapping_sub(fstart) ^ 0xFFFF_FFFF)
        .wrapping_mul(version_hash)
        .wrapping_sub(OFFSET_CONSTANT);
    r.rotate_left(r & 0x1F)
}

/// Decode an obfuscated offset field.
///
/// `pos` is the absolute position of the stored field. The result is an
/// absolute position in the archive.
#[inline]
pub fn decode_offset(pos: u32, fstart: u32, version_hash: u32, stored: u32) -> u32 {
    (offset_key(pos, fstart, version_hash) ^ stored).wrapping_add(fstart.wrapping_mul(2))
}

/// Reader that layers the WZ encodings over a [`BinaryReader`].
pub(crate) struct WzReader<'a> {
    inner: BinaryReader<'a>,
    keys: &'a KeyStream,
}

impl<'a> WzReader<'a> {
    pub fn new(data: &'a [u8], keys: &'a KeyStream) -> Self {
        Self {
            inner: BinaryReader::new(data),
            keys,
        }
    }

    #[inline]
    pub fn keys(&self) -> &'a KeyStream {
        self.keys
    }

    /// Run `f`, then restore the cursor. The cursor is restored on error too.
    pub fn peek<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.inner.position();
        let result = f(self);
        self.inner.seek(saved)?;
        result
    }

    pub fn read_compact_i32(&mut self) -> Result<i32> {
        let marker = self.read_i8()?;
        if marker == COMPACT_WIDE {
            Ok(self.read_i32()?)
        } else {
            Ok(marker as i32)
        }
    }

    pub fn read_compact_i64(&mut self) -> Result<i64> {
        let marker = self.read_i8()?;
        if marker == COMPACT_WIDE {
            Ok(self.read_i64()?)
        } else {
            Ok(marker as i64)
        }
    }

    /// Read a compact integer that must not be negative.
    pub fn read_compact_len(&mut self) -> Result<usize> {
        to_len(self.read_compact_i32()?)
    }

    /// Read a 32-bit length that must not be negative.
    pub fn read_len(&mut self) -> Result<usize> {
        to_len(self.read_i32()?)
    }

    /// Read a length-prefixed string.
    ///
    /// Positive prefixes announce UTF-16 units, negative ones ASCII bytes.
    pub fn read_string(&mut self, encrypted: bool) -> Result<String> {
        match self.string_span()? {
            StringSpan::Empty => Ok(String::new()),
            StringSpan::Unicode(units) => {
                let bytes = self.read_bytes(byte_len(units, 2)?)?;
                self.keys.decode_unicode(bytes, encrypted)
            }
            StringSpan::Ascii(len) => {
                let bytes = self.read_bytes(len)?;
                self.keys.decode_ascii(bytes, encrypted)
            }
        }
    }

    /// Advance past a length-prefixed string without decoding it.
    pub fn skip_string(&mut self) -> Result<()> {
        match self.string_span()? {
            StringSpan::Empty => {}
            StringSpan::Unicode(units) => self.skip(byte_len(units, 2)?)?,
            StringSpan::Ascii(len) => self.skip(len)?,
        }
        Ok(())
    }

    /// Read a string that is either inline or referenced by offset.
    ///
    /// Referenced offsets are relative to the start of this reader's view.
    pub fn read_string_block(&mut self, encrypted: bool) -> Result<String> {
        let offset = self.position();
        match self.read_u8()? {
            0x00 | 0x73 => self.read_string(encrypted),
            0x01 | 0x1B => {
                let target = self.read_len()?;
                self.peek(|r| {
                    r.seek(target)?;
                    r.read_string(encrypted)
                })
            }
            tag => Err(Error::UnknownStringBlock { tag, offset }),
        }
    }

    /// Advance past a string block without decoding it.
    pub fn skip_string_block(&mut self) -> Result<()> {
        let offset = self.position();
        match self.read_u8()? {
            0x00 | 0x73 => self.skip_string(),
            0x01 | 0x1B => Ok(self.skip(4)?),
            tag => Err(Error::UnknownStringBlock { tag, offset }),
        }
    }

    /// Read and decode an obfuscated offset field at the current position.
    pub fn read_offset(&mut self, fstart: u32, version_hash: u32) -> Result<u32> {
        let pos = self.position() as u32;
        let stored = self.read_u32()?;
        Ok(decode_offset(pos, fstart, version_hash, stored))
    }

    fn string_span(&mut self) -> Result<StringSpan> {
        let prefix = self.read_i8()?;
        let span = match prefix {
            0 => StringSpan::Empty,
            UNICODE_WIDE => StringSpan::Unicode(self.read_len()?),
            p if p > 0 => StringSpan::Unicode(p as usize),
            COMPACT_WIDE => StringSpan::Ascii(self.read_len()?),
            p => StringSpan::Ascii(-(p as i32) as usize),
        };
        Ok(span)
    }
}

impl<'a> Deref for WzReader<'a> {
    type Target = BinaryReader<'a>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for WzReader<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

enum StringSpan {
    Empty,
    Unicode(usize),
    Ascii(usize),
}

#[inline]
pub(crate) fn to_len(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::NegativeLength(value as i64))
}

#[inline]
fn byte_len(units: usize, width: usize) -> Result<usize> {
    units
        .checked_mul(width)
        .ok_or(Error::NegativeLength(units as i64))
}
