//! Error types for the archive crate.

use thiserror::Error;

/// Errors that can occur when working with WZ archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error (truncated data, bad magic, out-of-range seeks).
    #[error("{0}")]
    Common(#[from] wzkit_common::Error),

    /// The root directory has no entries, or no image exists anywhere in the tree.
    #[error("archive contains no images")]
    NoImages,

    /// No candidate version produced a valid image header.
    #[error("failed to resolve archive version (checksum {checksum:#06x})")]
    VersionNotFound { checksum: u16 },

    /// Unknown directory entry type tag.
    #[error("unknown directory entry type {tag} at offset {offset:#x}")]
    UnknownEntryType { tag: u8, offset: usize },

    /// Unknown property type tag.
    #[error("unknown property type {tag:#04x} at offset {offset:#x}")]
    UnknownPropertyType { tag: u8, offset: usize },

    /// Unknown extended property type name.
    #[error("unknown extended property type \"{0}\"")]
    UnknownExtendedType(String),

    /// Unknown string block discriminator.
    #[error("unknown string block type {tag:#04x} at offset {offset:#x}")]
    UnknownStringBlock { tag: u8, offset: usize },

    /// Image header is malformed.
    #[error("invalid image header: {0}")]
    InvalidImageHeader(&'static str),

    /// Single-precision property with an unknown discriminator byte.
    #[error("invalid single-precision marker {0:#04x}")]
    InvalidSingle(u8),

    /// Audio header size field is inconsistent, even after decryption.
    #[error("malformed audio header")]
    MalformedAudioHeader,

    /// A length or offset field was negative.
    #[error("negative length or offset {0}")]
    NegativeLength(i64),

    /// Image span reaches past the end of the archive.
    #[error("image at {offset:#x} with size {size} exceeds archive length {len}")]
    ImageOutOfBounds { offset: usize, size: usize, len: usize },

    /// Directory or property nesting exceeds the supported depth.
    #[error("nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A directory table is referenced more than once.
    #[error("directory table at {offset:#x} is referenced more than once")]
    TableRevisited { offset: usize },

    /// Two children of one container share a name.
    #[error("duplicate child name \"{0}\"")]
    DuplicateChild(String),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Payload larger than the precomputed key stream.
    #[error("payload of {len} units exceeds key stream capacity of {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    /// Path resolution hit a missing child.
    #[error("no child named \"{name}\" under \"{path}\"")]
    NotFound { path: String, name: String },

    /// Value requested from a directory or image.
    #[error("\"{0}\" is not a property")]
    NotAProperty(String),

    /// Link resolution requested on a node that is not a UOL.
    #[error("\"{0}\" is not a UOL")]
    NotAUol(String),

    /// A chain of UOLs leads back to a node already visited.
    #[error("UOL cycle detected at \"{0}\"")]
    UolCycle(String),

    /// Unrecognised archive variant name.
    #[error("unknown archive variant \"{0}\"")]
    UnknownVariant(String),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failure of the underlying file or mapping.
    Io,
    /// Structurally invalid data; fatal for the operation that hit it.
    Format,
    /// The version hash could not be recovered.
    VersionResolution,
    /// A payload exceeded the key stream.
    Capacity,
    /// A path or link named a node that does not exist.
    NotFound,
    /// The caller asked for something the node cannot provide.
    Usage,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Common(wzkit_common::Error::Io(_)) => ErrorKind::Io,
            Error::VersionNotFound { .. } => ErrorKind::VersionResolution,
            Error::PayloadTooLarge { .. } => ErrorKind::Capacity,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::NotAProperty(_) | Error::NotAUol(_) | Error::UnknownVariant(_) => {
                ErrorKind::Usage
            }
            _ => ErrorKind::Format,
        }
    }

    /// Whether this error leaves the archive usable (missing nodes, misuse).
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Usage)
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
