//! Common utilities for wzkit.
//!
//! This crate provides format-agnostic building blocks shared by the wzkit crates:
//!
//! - [`BinaryReader`] - Zero-copy, bounds-checked reading from byte slices
//! - [`Guid`] - Mixed-endian 16-byte GUID as stored in media records

mod error;
mod guid;
mod reader;

pub use error::{Error, Result};
pub use guid::Guid;
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
