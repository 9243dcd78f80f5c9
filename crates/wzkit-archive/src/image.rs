//! Image nodes and their deferred parse.

use std::ops::Range;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::archive::Interner;
use crate::codec::WzReader;
use crate::crypto::KeyStream;
use crate::node::Children;
use crate::options::Variant;
use crate::property::{PropNode, PropertyParser};
use crate::version::{header_matches, IMAGE_HEADER, IMAGE_MARKER};
use crate::{Error, Result};

/// An image entry. Its properties are parsed on first access.
pub(crate) struct ImageNode {
    pub name: Arc<str>,
    pub parent: u32,
    /// Span of the image within the backing store.
    pub range: Range<usize>,
    pub contents: OnceLock<ImageContents>,
    /// Serializes the image parse and every delayed value decode inside it.
    pub gate: Mutex<()>,
}

impl ImageNode {
    pub fn new(name: Arc<str>, parent: u32, range: Range<usize>) -> Self {
        Self {
            name,
            parent,
            range,
            contents: OnceLock::new(),
            gate: Mutex::new(()),
        }
    }
}

/// A parsed image: its property arena and the top-level properties.
pub(crate) struct ImageContents {
    /// Whether strings inside this image use the key stream.
    pub encrypted: bool,
    pub nodes: Vec<PropNode>,
    pub root: Children<u32>,
}

/// Parse an image from its own bounded view.
pub(crate) fn parse_image(
    data: &[u8],
    keys: &KeyStream,
    variant: Variant,
    names: &Interner,
) -> Result<ImageContents> {
    let mut reader = WzReader::new(data, keys);
    if reader.read_u8()? != IMAGE_MARKER {
        return Err(Error::InvalidImageHeader("missing image marker"));
    }

    let encrypted = match variant {
        Variant::Classic => false,
        _ if header_matches(&mut reader, true) => true,
        _ if header_matches(&mut reader, false) => false,
        _ => return Err(Error::InvalidImageHeader("header string does not decode")),
    };

    if reader.read_string(encrypted)? != IMAGE_HEADER {
        return Err(Error::InvalidImageHeader("header string mismatch"));
    }
    if reader.read_u16()? != 0 {
        return Err(Error::InvalidImageHeader("reserved field is not zero"));
    }

    let mut parser = PropertyParser::new(names, encrypted);
    let root = parser.parse_list(&mut reader, None, 0)?;

    Ok(ImageContents {
        encrypted,
        nodes: parser.into_nodes(),
        root,
    })
}
