//! WZ archive reader.
//!
//! WZ archives are the packed asset containers of a long-running MMO client.
//! An archive is a tree of directories whose leaves are images; each image
//! holds a tree of typed properties. The format layers several obfuscations:
//!
//! - Strings are XOR-masked with an AES-derived key stream that depends on
//!   the regional variant
//! - Child offsets are scrambled with a hash of the client patch version,
//!   which is not stored and must be recovered by brute force
//! - Canvas pixel blocks are zlib streams, optionally split into encrypted chunks
//!
//! Directory tables are read when the archive is opened. Images are parsed
//! on first access, and strings, canvases and audio are decoded on first
//! read. Parsed results are cached and shared between threads.
//!
//! # Example
//!
//! ```no_run
//! use wzkit_archive::{Archive, OpenOptions, Variant};
//!
//! let archive = Archive::open("Item.wz", OpenOptions::new(Variant::Gms))?;
//! println!("version {}", archive.version());
//!
//! for child in archive.root().children()? {
//!     println!("{} ({:?})", child.name(), child.kind());
//! }
//!
//! let icon = archive.resolve_path("/Consume/0200.img/02000000/info/icon")?;
//! if let Some(image) = icon.canvas()? {
//!     println!("{}x{}", image.width(), image.height());
//! }
//! # Ok::<(), wzkit_archive::Error>(())
//! ```

mod archive;
mod audio;
mod canvas;
mod codec;
mod crypto;
mod decompress;
mod directory;
mod error;
mod image;
mod node;
mod options;
mod property;
mod value;
mod version;

#[cfg(test)]
mod testutil;

pub use archive::{Archive, ArchiveHeader};
pub use audio::{AudioData, AudioInfo};
pub use canvas::{CanvasImage, CanvasInfo, PixelEncoding, PixelFormat};
pub use codec::{decode_offset, offset_key};
pub use crypto::{KeyStream, KEY_LEN};
pub use error::{Error, ErrorKind, Result};
pub use node::{Node, NodeId, NodeIter, NodeKind};
pub use options::{KeyStreamMode, OpenOptions, ReadSelection, Variant};
pub use value::{Point, Value};
pub use version::{version_checksum, version_hash};
