//! Canvas (raster image) decoding.
//!
//! The first pass over a canvas records its dimensions, pixel format and the
//! position of the compressed block. Pixels are decoded from that position on
//! demand: the block is optionally reassembled from XOR-encrypted chunks,
//! inflated, then unpacked according to the pixel format.

use std::borrow::Cow;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use image::{Rgba, RgbaImage};
use tracing::warn;
use wzkit_common::BinaryReader;

use crate::codec::{to_len, WzReader};
use crate::crypto::KeyStream;
use crate::decompress;
use crate::{Error, Result};

/// Largest factor by which inflated pixel data may be padded.
const MAX_PAD_RATIO: usize = 4;

/// Pixel format as stored: a compact integer and a trailing byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    pub primary: i32,
    pub secondary: u8,
}

impl PixelFormat {
    /// 4 bits per channel, BGRA order.
    pub const BGRA4444: Self = Self::new(1, 0);
    /// 8 bits per channel, BGRA order.
    pub const BGRA8888: Self = Self::new(2, 0);
    /// 16-bit 5-6-5 RGB.
    pub const RGB565: Self = Self::new(513, 0);
    /// 16-bit 5-6-5 RGB at one sixteenth of the stored dimensions.
    pub const RGB565_REDUCED: Self = Self::new(513, 4);

    pub const fn new(primary: i32, secondary: u8) -> Self {
        Self { primary, secondary }
    }

    /// Human-readable name of a supported format.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            Self::BGRA4444 => Some("BGRA4444"),
            Self::BGRA8888 => Some("BGRA8888"),
            Self::RGB565 => Some("RGB565"),
            Self::RGB565_REDUCED => Some("RGB565/16"),
            _ => None,
        }
    }

    #[inline]
    pub fn is_supported(&self) -> bool {
        self.name().is_some()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "({}, {})", self.primary, self.secondary),
        }
    }
}

/// Canvas metadata available without decoding pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasInfo {
    pub width: i32,
    pub height: i32,
    pub format: PixelFormat,
    /// Length of the compressed block, including its leading reserved byte.
    pub block_len: usize,
    block_offset: usize,
}

impl CanvasInfo {
    /// Read the fields that follow the optional child list and skip the block.
    pub(crate) fn read(r: &mut WzReader<'_>) -> Result<Self> {
        let width = r.read_compact_i32()?;
        let height = r.read_compact_i32()?;
        let primary = r.read_compact_i32()?;
        let secondary = r.read_u8()?;
        r.skip(4)?;
        let block_len = r.read_len()?;
        let block_offset = r.position();
        r.skip(block_len)?;

        Ok(Self {
            width,
            height,
            format: PixelFormat::new(primary, secondary),
            block_len,
            block_offset,
        })
    }
}

/// Layout of decoded pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    /// 4 bytes per pixel: blue, green, red, alpha.
    Bgra8888,
    /// 2 bytes per pixel, little-endian 5-6-5.
    Rgb565,
}

impl PixelEncoding {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelEncoding::Bgra8888 => 4,
            PixelEncoding::Rgb565 => 2,
        }
    }
}

/// Decoded canvas pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasImage {
    width: u32,
    height: u32,
    encoding: PixelEncoding,
    data: Vec<u8>,
}

impl CanvasImage {
    /// Build an image, padding or truncating `data` to the expected size.
    fn fitted(width: u32, height: u32, encoding: PixelEncoding, mut data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(encoding.bytes_per_pixel()))
            .ok_or(Error::Decompression(format!(
                "canvas dimensions {width}x{height} overflow"
            )))?;

        if expected / MAX_PAD_RATIO > data.len() {
            return Err(Error::Decompression(format!(
                "canvas {width}x{height} needs {expected} bytes but only {} were inflated",
                data.len()
            )));
        }

        if data.len() != expected {
            warn!(
                width,
                height,
                actual = data.len(),
                expected,
                "canvas pixel data size mismatch, padding or truncating"
            );
            data.resize(expected, 0);
        }

        Ok(Self {
            width,
            height,
            encoding,
            data,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn encoding(&self) -> PixelEncoding {
        self.encoding
    }

    /// Raw pixel bytes in [`encoding`](Self::encoding) layout.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Convert to straight RGBA.
    pub fn to_rgba(&self) -> RgbaImage {
        let stride = self.width as usize;
        match self.encoding {
            PixelEncoding::Bgra8888 => RgbaImage::from_fn(self.width, self.height, |x, y| {
                let i = (y as usize * stride + x as usize) * 4;
                let p = &self.data[i..i + 4];
                Rgba([p[2], p[1], p[0], p[3]])
            }),
            PixelEncoding::Rgb565 => RgbaImage::from_fn(self.width, self.height, |x, y| {
                let i = (y as usize * stride + x as usize) * 2;
                let v = LittleEndian::read_u16(&self.data[i..i + 2]);
                let r = ((v >> 11) & 0x1F) as u8;
                let g = ((v >> 5) & 0x3F) as u8;
                let b = (v & 0x1F) as u8;
                Rgba([(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xFF])
            }),
        }
    }
}

/// Decode the pixels of a canvas whose metadata was read by [`CanvasInfo::read`].
///
/// Returns `Ok(None)` for pixel formats this decoder does not understand.
pub(crate) fn decode(r: &mut WzReader<'_>, info: &CanvasInfo) -> Result<Option<CanvasImage>> {
    r.seek(info.block_offset)?;
    r.skip(1)?;
    let len = info
        .block_len
        .checked_sub(1)
        .ok_or_else(|| Error::Decompression("empty canvas block".into()))?;
    let block = r.read_bytes(len)?;

    let compressed: Cow<'_, [u8]> = if is_zlib(block) {
        Cow::Borrowed(block)
    } else {
        Cow::Owned(unchunk(block, r.keys())?)
    };

    let raw = decompress::inflate_sized(&compressed, len * 4)?;
    unpack(info, raw)
}

/// Whether a block starts with one of the zlib headers used by canvases.
fn is_zlib(block: &[u8]) -> bool {
    block.len() >= 2 && matches!(LittleEndian::read_u16(block), 0x9C78 | 0xDA78)
}

/// Reassemble a chunked block, decrypting each chunk from the start of the raw stream.
fn unchunk(block: &[u8], keys: &KeyStream) -> Result<Vec<u8>> {
    let mut reader = BinaryReader::new(block);
    let mut out = Vec::with_capacity(block.len());

    while !reader.is_empty() {
        let len = to_len(reader.read_i32()?)?;
        let start = out.len();
        out.extend_from_slice(reader.read_bytes(len)?);
        keys.xor_raw(&mut out[start..])?;
    }

    Ok(out)
}

fn unpack(info: &CanvasInfo, raw: Vec<u8>) -> Result<Option<CanvasImage>> {
    let width = u32::try_from(info.width).map_err(|_| Error::NegativeLength(info.width as i64))?;
    let height =
        u32::try_from(info.height).map_err(|_| Error::NegativeLength(info.height as i64))?;

    let image = match info.format {
        PixelFormat::BGRA4444 => {
            CanvasImage::fitted(width, height, PixelEncoding::Bgra8888, expand_nibbles(&raw))?
        }
        PixelFormat::BGRA8888 => CanvasImage::fitted(width, height, PixelEncoding::Bgra8888, raw)?,
        PixelFormat::RGB565 => CanvasImage::fitted(width, height, PixelEncoding::Rgb565, raw)?,
        PixelFormat::RGB565_REDUCED => {
            CanvasImage::fitted(width / 16, height / 16, PixelEncoding::Rgb565, raw)?
        }
        format => {
            warn!(%format, width, height, "unsupported canvas pixel format");
            return Ok(None);
        }
    };

    Ok(Some(image))
}

/// Widen 4-bit channels to 8 bits, low nibble first.
fn expand_nibbles(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .flat_map(|&b| [(b & 0x0F) * 0x11, (b >> 4) * 0x11])
        .collect()
}
