//! Audio (`Sound_DX8`) properties.
//!
//! Layout after the type name: a reserved byte, compact payload length,
//! compact duration, three counted arrays of media type GUIDs, a counted
//! format header, then the payload.

use byteorder::{ByteOrder, LittleEndian};
use wzkit_common::Guid;

use crate::codec::WzReader;
use crate::crypto::KeyStream;
use crate::{Error, Result};

/// Size of the fixed part of a wave format header before its own size field ends.
const FORMAT_HEADER_FIXED: usize = 18;

/// Audio metadata available without reading the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    /// Duration in milliseconds.
    pub duration: i32,
    /// Payload length in bytes.
    pub payload_len: usize,
    offset: usize,
}

impl AudioInfo {
    /// Read lengths and skip every variable section.
    pub(crate) fn read(r: &mut WzReader<'_>) -> Result<Self> {
        let offset = r.position();
        r.skip(1)?;
        let payload_len = r.read_compact_len()?;
        let duration = r.read_compact_i32()?;
        for _ in 0..3 {
            let count = r.read_u8()? as usize;
            r.skip(count * 16)?;
        }
        let header_len = r.read_u8()? as usize;
        r.skip(header_len)?;
        r.skip(payload_len)?;

        Ok(Self {
            duration,
            payload_len,
            offset,
        })
    }
}

/// A fully read audio property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub duration: i32,
    pub major_types: Vec<Guid>,
    pub sub_types: Vec<Guid>,
    pub format_types: Vec<Guid>,
    /// Wave format header, decrypted if it was stored encrypted.
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Re-read an audio property from the offset recorded in `info`.
pub(crate) fn decode(r: &mut WzReader<'_>, info: &AudioInfo) -> Result<AudioData> {
    r.seek(info.offset)?;
    r.skip(1)?;
    let payload_len = r.read_compact_len()?;
    let duration = r.read_compact_i32()?;

    let major_types = read_guids(r)?;
    let sub_types = read_guids(r)?;
    let format_types = read_guids(r)?;

    let header_len = r.read_u8()? as usize;
    let mut header = r.read_bytes(header_len)?.to_vec();
    decrypt_header(&mut header, r.keys())?;

    let payload = r.read_bytes(payload_len)?.to_vec();

    Ok(AudioData {
        duration,
        major_types,
        sub_types,
        format_types,
        header,
        payload,
    })
}

fn read_guids(r: &mut WzReader<'_>) -> Result<Vec<Guid>> {
    let count = r.read_u8()? as usize;
    (0..count)
        .map(|_| r.read_struct::<Guid>().map_err(Error::from))
        .collect()
}

/// Whether the header's size field agrees with its length.
fn header_consistent(header: &[u8]) -> bool {
    header.len() >= FORMAT_HEADER_FIXED
        && LittleEndian::read_u16(&header[16..18]) as usize + FORMAT_HEADER_FIXED == header.len()
}

/// Validate the header, decrypting it in place if it only validates that way.
fn decrypt_header(header: &mut [u8], keys: &KeyStream) -> Result<()> {
    if header.is_empty() || header_consistent(header) {
        return Ok(());
    }
    keys.xor_raw(header)?;
    if header_consistent(header) {
        Ok(())
    } else {
        Err(Error::MalformedAudioHeader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{KeyStreamMode, Variant};
    use crate::testutil::{audio_body, wave_header};

    #[test]
    fn test_skip_then_decode() {
        let keys = KeyStream::new(Variant::Gms, KeyStreamMode::Chained);
        let body = audio_body(&keys, 1200, &wave_header(), false, b"RIFFDATA");
        let mut tail = body.clone();
        tail.push(0xEE);

        let mut reader = WzReader::new(&tail, &keys);
        let info = AudioInfo::read(&mut reader).unwrap();
        assert_eq!(info.duration, 1200);
        assert_eq!(info.payload_len, 8);
        assert_eq!(reader.read_u8().unwrap(), 0xEE);

        let data = decode(&mut reader, &info).unwrap();
        assert_eq!(data.payload, b"RIFFDATA");
        assert_eq!(data.header, wave_header());
        assert_eq!(data.major_types.len(), 1);
        assert_eq!(
            data.major_types[0].to_string(),
            "73647561-0000-0010-8000-00aa00389b71"
        );
    }

    #[test]
    fn test_encrypted_header() {
        let keys = KeyStream::new(Variant::Kms, KeyStreamMode::Chained);
        let body = audio_body(&keys, 10, &wave_header(), true, &[1, 2, 3]);
        let mut reader = WzReader::new(&body, &keys);
        let info = AudioInfo::read(&mut reader).unwrap();
        let data = decode(&mut reader, &info).unwrap();
        assert_eq!(data.header, wave_header());
    }

    #[test]
    fn test_malformed_header() {
        let keys = KeyStream::new(Variant::Classic, KeyStreamMode::Chained);
        let mut header = wave_header();
        header.push(0);
        let body = audio_body(&keys, 10, &header, false, &[]);
        let mut reader = WzReader::new(&body, &keys);
        let info = AudioInfo::read(&mut reader).unwrap();
        assert!(matches!(decode(&mut reader, &info), Err(Error::MalformedAudioHeader)));
    }

    #[test]
    fn test_empty_header_accepted() {
        let keys = KeyStream::new(Variant::Gms, KeyStreamMode::Chained);
        let body = audio_body(&keys, 5, &[], false, &[7; 4]);
        let mut reader = WzReader::new(&body, &keys);
        let info = AudioInfo::read(&mut reader).unwrap();
        let data = decode(&mut reader, &info).unwrap();
        assert!(data.header.is_empty());
        assert_eq!(data.payload, vec![7; 4]);
    }
}
