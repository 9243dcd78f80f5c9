//! wzkit - WZ game archive decoding library.
//!
//! This crate provides a unified interface to the wzkit crates.
//!
//! # Crates
//!
//! - [`wzkit_common`] - Common utilities (bounded binary reading, GUIDs)
//! - [`wzkit_archive`] - WZ archive decoding (key streams, version recovery, lazy node trees)
//!
//! # Example
//!
//! ```no_run
//! use wzkit::prelude::*;
//!
//! let archive = Archive::open("String.wz", OpenOptions::new(Variant::Gms))?;
//! let name = archive.resolve_path("/Mob.img/100100/name")?;
//! if let Some(name) = name.as_str()? {
//!     println!("{name}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use wzkit_archive as archive;
pub use wzkit_common as common;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use wzkit_archive::{
        Archive, AudioData, CanvasImage, KeyStreamMode, Node, NodeKind, OpenOptions, Point,
        ReadSelection, Value, Variant,
    };
    pub use wzkit_common::{BinaryReader, Guid};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
