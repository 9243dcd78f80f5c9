//! Key stream derivation and XOR decoding.
//!
//! Live variants expand a fixed AES-256 key and a per-variant IV into a
//! 0x10000-byte stream. Classic archives use an all-zero stream. Strings are
//! additionally masked with an arithmetic sequence starting at `0xAA` (ASCII)
//! or `0xAAAA` (UTF-16).

use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};

use crate::options::{KeyStreamMode, Variant};
use crate::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Length of the precomputed key stream in bytes.
pub const KEY_LEN: usize = 0x10000;

/// The AES-256 key used to expand the key stream.
///
/// This is hardcoded in the game client and is not a secret.
const WZ_AES_KEY: [u8; 32] = [
    0x13, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0xB4, 0x00, 0x00, 0x00,
    0x1B, 0x00, 0x00, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x33, 0x00, 0x00, 0x00, 0x52, 0x00, 0x00, 0x00,
];

/// Precomputed key streams for one archive.
pub struct KeyStream {
    raw: Box<[u8]>,
    ascii: Box<[u8]>,
    unicode: Box<[u16]>,
}

impl KeyStream {
    /// Derive the key streams for a variant.
    pub fn new(variant: Variant, mode: KeyStreamMode) -> Self {
        let raw = match variant.iv() {
            Some(iv) => expand(&iv, mode),
            None => vec![0u8; KEY_LEN],
        };

        let ascii = raw
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ ascii_mask(i))
            .collect();

        let unicode = raw
            .chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| u16::from_le_bytes([pair[0], pair[1]]) ^ unicode_mask(i))
            .collect();

        Self {
            raw: raw.into_boxed_slice(),
            ascii,
            unicode,
        }
    }

    /// The unmasked cipher stream, used for canvas chunks and audio headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// XOR `data` in place with the raw stream, starting at index 0.
    ///
    /// Applying this twice restores the input.
    pub fn xor_raw(&self, data: &mut [u8]) -> Result<()> {
        check_capacity(data.len(), self.raw.len())?;
        for (byte, key) in data.iter_mut().zip(self.raw.iter()) {
            *byte ^= key;
        }
        Ok(())
    }

    /// Decode an ASCII string body. Every byte maps to one character.
    pub fn decode_ascii(&self, bytes: &[u8], encrypted: bool) -> Result<String> {
        check_capacity(bytes.len(), self.ascii.len())?;
        let decoded = if encrypted {
            bytes
                .iter()
                .zip(self.ascii.iter())
                .map(|(&b, &k)| (b ^ k) as char)
                .collect()
        } else {
            bytes
                .iter()
                .enumerate()
                .map(|(i, &b)| (b ^ ascii_mask(i)) as char)
                .collect()
        };
        Ok(decoded)
    }

    /// Decode a UTF-16LE string body. Unpaired surrogates become U+FFFD.
    pub fn decode_unicode(&self, bytes: &[u8], encrypted: bool) -> Result<String> {
        let units = bytes.len() / 2;
        check_capacity(units, self.unicode.len())?;
        let decoded: Vec<u16> = bytes
            .chunks_exact(2)
            .enumerate()
            .map(|(i, pair)| {
                let key = if encrypted {
                    self.unicode[i]
                } else {
                    unicode_mask(i)
                };
                u16::from_le_bytes([pair[0], pair[1]]) ^ key
            })
            .collect();
        Ok(String::from_utf16_lossy(&decoded))
    }
}

impl std::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStream")
            .field("len", &self.raw.len())
            .field("head", &&self.raw[..16])
            .finish()
    }
}

#[inline]
fn ascii_mask(i: usize) -> u8 {
    0xAAu8.wrapping_add(i as u8)
}

#[inline]
fn unicode_mask(i: usize) -> u16 {
    0xAAAAu16.wrapping_add(i as u16)
}

#[inline]
fn check_capacity(len: usize, capacity: usize) -> Result<()> {
    if len > capacity {
        return Err(Error::PayloadTooLarge { len, capacity });
    }
    Ok(())
}

/// Expand an IV into `KEY_LEN` bytes of cipher output.
fn expand(iv: &[u8; 16], mode: KeyStreamMode) -> Vec<u8> {
    let mut stream = vec![0u8; KEY_LEN];
    let key = GenericArray::from_slice(&WZ_AES_KEY);

    match mode {
        // CBC over zeros: block k = E(block k-1), block 0 = E(IV)
        KeyStreamMode::Chained => {
            let mut encryptor = Aes256CbcEnc::new(key, GenericArray::from_slice(iv));
            for block in stream.chunks_exact_mut(16) {
                encryptor.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
        }
        // IV unused: the stream is E(0) repeated
        KeyStreamMode::Ecb => {
            let cipher = aes::Aes256::new(key);
            for block in stream.chunks_exact_mut(16) {
                cipher.encrypt_block(GenericArray::from_mut_slice(block));
            }
        }
    }

    stream
}
