//! Version recovery.
//!
//! Archives store only a one-byte checksum of the patch version's hash. The
//! hash is recovered by trying every 16-bit version whose checksum matches and
//! keeping the first one that decodes an offset pointing at a real image.

use std::hash::BuildHasherDefault;

use hashbrown::HashSet;
use rustc_hash::FxHasher;
use tracing::{debug, trace};

use crate::codec::WzReader;
use crate::crypto::KeyStream;
use crate::directory::MAX_DEPTH;
use crate::{Error, Result};

type FxHashSet<K> = HashSet<K, BuildHasherDefault<FxHasher>>;

/// First byte of every image.
pub(crate) const IMAGE_MARKER: u8 = 0x73;
/// Header string that follows the image marker.
pub(crate) const IMAGE_HEADER: &str = "Property";

/// A recovered version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedVersion {
    pub version: u16,
    pub hash: u32,
}

/// Rolling hash over the decimal digits of `version`.
///
/// # Example
///
/// ```
/// use wzkit_archive::version_hash;
///
/// assert_eq!(version_hash(0), 49);
/// assert_eq!(version_hash(83), (32 * 57) + b'3' as u32 + 1);
/// ```
pub fn version_hash(version: u16) -> u32 {
    version
        .to_string()
        .bytes()
        .fold(0u32, |acc, digit| {
            acc.wrapping_mul(32).wrapping_add(digit as u32).wrapping_add(1)
        })
}

/// One-byte checksum of a version hash, as stored after the archive header.
pub fn version_checksum(hash: u32) -> u16 {
    let [b0, b1, b2, b3] = hash.to_le_bytes();
    (0xFF ^ b0 ^ b1 ^ b2 ^ b3) as u16
}

/// Where the first image entry's offset field sits.
enum Probe {
    /// Found by the shallow scan of the root table.
    Field(usize),
    /// Needs a per-candidate walk into subdirectories.
    Deep,
}

/// Recover the version hash of the archive in `data`.
pub(crate) fn resolve(data: &[u8], keys: &KeyStream, fstart: u32) -> Result<ResolvedVersion> {
    let mut reader = WzReader::new(data, keys);
    reader.seek(fstart as usize)?;
    let checksum = reader.read_u16()?;
    let root = reader.position();

    let probe = shallow_probe(&mut reader, fstart)?;
    if matches!(probe, Probe::Deep) {
        debug!("no image in root table, falling back to deep scan");
    }

    for version in 0..=u16::MAX {
        let hash = version_hash(version);
        if version_checksum(hash) != checksum {
            continue;
        }

        let field = match probe {
            Probe::Field(field) => Some(field),
            Probe::Deep => {
                let mut seen = FxHashSet::default();
                find_image_field(&mut reader, fstart, hash, root, 0, &mut seen)
                    .ok()
                    .flatten()
            }
        };
        let Some(field) = field else {
            continue;
        };

        if validate(&mut reader, fstart, hash, field) {
            debug!(version, hash, "resolved archive version");
            return Ok(ResolvedVersion { version, hash });
        }
        trace!(version, "candidate rejected");
    }

    Err(Error::VersionNotFound { checksum })
}

/// Scan the root table for the first image entry without decoding names.
fn shallow_probe(reader: &mut WzReader<'_>, fstart: u32) -> Result<Probe> {
    let count = reader.read_compact_i32()?;
    if count <= 0 {
        return Err(Error::NoImages);
    }

    for _ in 0..count {
        let offset = reader.position();
        let mut tag = reader.read_u8()?;
        match tag {
            1 => {
                reader.skip(10)?;
                continue;
            }
            2 => {
                let target = reader.read_len()? + fstart as usize;
                tag = reader.peek(|r| {
                    r.seek(target)?;
                    Ok(r.read_u8()?)
                })?;
            }
            3 | 4 => reader.skip_string()?,
            tag => return Err(Error::UnknownEntryType { tag, offset }),
        }

        reader.read_compact_i32()?;
        reader.read_compact_i32()?;
        let field = reader.position();
        reader.skip(4)?;

        if tag == 4 {
            return Ok(Probe::Field(field));
        }
    }

    Ok(Probe::Deep)
}

/// Depth-first search for any image entry, decoding directory offsets with `hash`.
fn find_image_field(
    reader: &mut WzReader<'_>,
    fstart: u32,
    hash: u32,
    table: usize,
    depth: usize,
    seen: &mut FxHashSet<usize>,
) -> Result<Option<usize>> {
    if depth >= MAX_DEPTH {
        return Err(Error::NestingTooDeep(MAX_DEPTH));
    }
    if !seen.insert(table) {
        return Ok(None);
    }

    reader.peek(|r| {
        r.seek(table)?;
        let count = r.read_compact_len()?;
        for _ in 0..count {
            let offset = r.position();
            let mut tag = r.read_u8()?;
            match tag {
                1 => {
                    r.skip(10)?;
                    continue;
                }
                2 => {
                    let target = r.read_len()? + fstart as usize;
                    tag = r.peek(|r| {
                        r.seek(target)?;
                        Ok(r.read_u8()?)
                    })?;
                }
                3 | 4 => r.skip_string()?,
                tag => return Err(Error::UnknownEntryType { tag, offset }),
            }

            r.read_compact_i32()?;
            r.read_compact_i32()?;
            let field = r.position();
            let child = r.read_offset(fstart, hash)? as usize;

            if tag == 4 {
                return Ok(Some(field));
            }
            if child < r.len() {
                if let Ok(Some(found)) = find_image_field(r, fstart, hash, child, depth + 1, seen) {
                    return Ok(Some(found));
                }
            }
        }
        Ok(None)
    })
}

/// Whether the offset stored at `field` leads to a valid image header under `hash`.
fn validate(reader: &mut WzReader<'_>, fstart: u32, hash: u32, field: usize) -> bool {
    let check = |r: &mut WzReader<'_>| -> Result<bool> {
        r.seek(field)?;
        let target = r.read_offset(fstart, hash)? as usize;
        r.seek(target)?;
        if r.read_u8()? != IMAGE_MARKER {
            return Ok(false);
        }
        Ok(header_matches(r, true) || header_matches(r, false))
    };
    reader.peek(check).unwrap_or(false)
}

/// Peek the image header string under one string encoding.
pub(crate) fn header_matches(reader: &mut WzReader<'_>, encrypted: bool) -> bool {
    reader
        .peek(|r| r.read_string(encrypted))
        .map(|s| s == IMAGE_HEADER)
        .unwrap_or(false)
}
