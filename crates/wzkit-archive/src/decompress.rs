//! Decompression utilities for canvas payloads.

use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::{Error, Result};

/// Length of the zlib stream header that precedes the DEFLATE data.
const ZLIB_HEADER_LEN: usize = 2;

/// Inflate a zlib stream, ignoring the header flags and the trailing checksum.
///
/// Canvas payloads are occasionally truncated before the Adler-32 trailer, so
/// the DEFLATE body is decoded directly.
pub fn inflate(data: &[u8], output: &mut Vec<u8>) -> Result<()> {
    let body = data
        .get(ZLIB_HEADER_LEN..)
        .ok_or_else(|| Error::Decompression("zlib stream shorter than its header".into()))?;

    let mut decoder = DeflateDecoder::new(body);

    output.clear();
    decoder
        .read_to_end(output)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    Ok(())
}

/// Inflate a zlib stream with a known output size hint.
pub fn inflate_sized(data: &[u8], expected_size: usize) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(expected_size);
    inflate(data, &mut output)?;
    Ok(output)
}
