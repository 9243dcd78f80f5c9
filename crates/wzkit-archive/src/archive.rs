//! WZ archive reader.
//!
//! Opening an archive reads the header, recovers the version hash and walks
//! the directory tree. Images are parsed on first access, each over its own
//! bounded view of the backing store, so independent images can be parsed
//! concurrently.

use std::fs::File;
use std::hash::BuildHasherDefault;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use hashbrown::HashSet;
use memmap2::Mmap;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use tracing::{debug, warn};
use wzkit_common::BinaryReader;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::codec::WzReader;
use crate::crypto::KeyStream;
use crate::directory::{DirectoryNode, TreeReader};
use crate::image::{self, ImageContents, ImageNode};
use crate::node::Node;
use crate::options::{OpenOptions, Variant};
use crate::property::PropKind;
use crate::version::{self, ResolvedVersion};
use crate::Result;

type FxHashSet<K> = HashSet<K, BuildHasherDefault<FxHasher>>;

/// Fixed part of the archive header, after the magic.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
struct RawHeader {
    file_size: u64,
    fstart: u32,
}

impl RawHeader {
    const MAGIC: &'static [u8; 4] = b"PKG1";
}

/// The archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Size of the archive data as recorded by the packer.
    pub file_size: u64,
    /// Offset of the node section.
    pub fstart: u32,
    /// Copyright line stored after the fixed fields.
    pub description: String,
}

impl ArchiveHeader {
    fn read(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        reader.expect_magic(RawHeader::MAGIC)?;
        let raw: RawHeader = reader.read_struct()?;
        let description = reader.read_cstring()?.to_string();

        Ok(Self {
            file_size: raw.file_size,
            fstart: raw.fstart,
            description,
        })
    }
}

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => mmap,
            Backing::Owned(data) => data,
        }
    }
}

/// Deduplicates node names across the archive.
#[derive(Default)]
pub(crate) struct Interner(Mutex<FxHashSet<Arc<str>>>);

impl Interner {
    pub fn intern(&self, name: &str) -> Arc<str> {
        let mut names = self.0.lock();
        if let Some(existing) = names.get(name) {
            return existing.clone();
        }
        let name: Arc<str> = Arc::from(name);
        names.insert(name.clone());
        name
    }
}

/// An opened WZ archive.
///
/// # Example
///
/// ```no_run
/// use wzkit_archive::{Archive, OpenOptions, Variant};
///
/// let archive = Archive::open("Mob.wz", OpenOptions::new(Variant::Gms))?;
/// let speed = archive.resolve_path("/100100.img/info/speed")?;
/// println!("{:?}", speed.as_i32());
/// # Ok::<(), wzkit_archive::Error>(())
/// ```
pub struct Archive {
    backing: Backing,
    keys: KeyStream,
    header: ArchiveHeader,
    version: ResolvedVersion,
    options: OpenOptions,
    directories: Vec<DirectoryNode>,
    images: Vec<ImageNode>,
    names: Interner,
    materialized: AtomicUsize,
}

impl Archive {
    /// Open and memory-map an archive file.
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), len = mmap.len(), "mapped archive");
        Self::load(Backing::Mapped(mmap), options)
    }

    /// Open an archive held in memory.
    pub fn from_bytes(data: impl Into<Vec<u8>>, options: OpenOptions) -> Result<Self> {
        Self::load(Backing::Owned(data.into()), options)
    }

    fn load(backing: Backing, options: OpenOptions) -> Result<Self> {
        let header = ArchiveHeader::read(&backing)?;
        debug!(fstart = header.fstart, description = %header.description, "read archive header");

        let keys = KeyStream::new(options.variant, options.key_mode);
        let version = version::resolve(&backing, &keys, header.fstart)?;

        let names = Interner::default();
        let tree = TreeReader::new(
            &backing,
            &keys,
            header.fstart,
            version.hash,
            options.encrypted_names,
            &names,
        )
        .read()?;
        debug!(
            directories = tree.directories.len(),
            images = tree.images.len(),
            "loaded directory tree"
        );

        let archive = Self {
            backing,
            keys,
            header,
            version,
            options,
            directories: tree.directories,
            images: tree.images,
            names,
            materialized: AtomicUsize::new(0),
        };

        if options.selection.eager_images {
            archive.parse_all_images()?;
        }

        Ok(archive)
    }

    #[inline]
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// The recovered patch version.
    #[inline]
    pub fn version(&self) -> u16 {
        self.version.version
    }

    /// The hash of [`version`](Self::version) used to decode offsets.
    #[inline]
    pub fn version_hash(&self) -> u32 {
        self.version.hash
    }

    #[inline]
    pub fn variant(&self) -> Variant {
        self.options.variant
    }

    #[inline]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Length of the backing data in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.backing.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.backing.is_empty()
    }

    /// The root directory.
    #[inline]
    pub fn root(&self) -> Node<'_> {
        Node::directory(self, 0)
    }

    /// Resolve a slash-separated path from the root.
    pub fn resolve_path(&self, path: &str) -> Result<Node<'_>> {
        self.root().resolve_path(path)
    }

    #[inline]
    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of images parsed so far.
    pub fn parsed_image_count(&self) -> usize {
        self.images
            .iter()
            .filter(|image| image.contents.get().is_some())
            .count()
    }

    /// Number of delayed values (strings, canvases, audio) decoded so far.
    #[inline]
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Depth-first traversal of the whole tree. See [`Node::walk`].
    pub fn walk<F>(&self, visitor: F) -> Result<()>
    where
        F: FnMut(Node<'_>, usize) -> bool,
    {
        self.root().walk(visitor)
    }

    /// Parse every image that has not been parsed yet.
    #[cfg(feature = "parallel")]
    pub fn parse_all_images(&self) -> Result<()> {
        use rayon::prelude::*;

        (0..self.images.len() as u32)
            .into_par_iter()
            .try_for_each(|index| self.contents(index).map(|_| ()))
    }

    /// Parse every image that has not been parsed yet.
    #[cfg(not(feature = "parallel"))]
    pub fn parse_all_images(&self) -> Result<()> {
        (0..self.images.len() as u32).try_for_each(|index| self.contents(index).map(|_| ()))
    }

    /// Close the archive, releasing the mapping.
    pub fn close(self) {
        debug!(
            images = self.images.len(),
            materialized = self.materialized_count(),
            "closing archive"
        );
    }

    #[inline]
    pub(crate) fn directory(&self, index: u32) -> &DirectoryNode {
        &self.directories[index as usize]
    }

    #[inline]
    pub(crate) fn image(&self, index: u32) -> &ImageNode {
        &self.images[index as usize]
    }

    /// The parsed contents of an image, parsing it on first use.
    ///
    /// Exactly one caller parses; concurrent callers wait and observe the
    /// result. A failed parse is not cached.
    pub(crate) fn contents(&self, index: u32) -> Result<&ImageContents> {
        let node = &self.images[index as usize];
        if let Some(contents) = node.contents.get() {
            return Ok(contents);
        }

        let contents = {
            let _gate = node.gate.lock();
            if let Some(contents) = node.contents.get() {
                return Ok(contents);
            }
            debug!(image = %node.name, start = node.range.start, "parsing image");
            let parsed = image::parse_image(
                &self.backing[node.range.clone()],
                &self.keys,
                self.options.variant,
                &self.names,
            )?;
            node.contents.get_or_init(|| parsed)
        };

        if self.options.selection.eager_values() {
            self.materialize_selected(index, contents);
        }
        Ok(contents)
    }

    /// Decode a delayed value of `image` into `cell`, once.
    pub(crate) fn materialize<'s, T>(
        &'s self,
        image: u32,
        cell: &'s OnceLock<T>,
        decode: impl FnOnce(&mut WzReader<'_>) -> Result<T>,
    ) -> Result<&'s T> {
        if let Some(value) = cell.get() {
            return Ok(value);
        }

        let node = &self.images[image as usize];
        let _gate = node.gate.lock();
        if let Some(value) = cell.get() {
            return Ok(value);
        }

        let mut reader = WzReader::new(&self.backing[node.range.clone()], &self.keys);
        let value = decode(&mut reader)?;
        self.materialized.fetch_add(1, Ordering::Relaxed);
        Ok(cell.get_or_init(|| value))
    }

    /// Decode the selected delayed values of a freshly parsed image.
    ///
    /// Failures stay with their node: they are logged here and returned
    /// again by that node's `value()`.
    fn materialize_selected(&self, image: u32, contents: &ImageContents) {
        let selection = self.options.selection;
        for (index, prop) in contents.nodes.iter().enumerate() {
            let wanted = match prop.kind {
                PropKind::String { .. } => selection.eager_strings,
                PropKind::Canvas { .. } => selection.eager_canvas,
                PropKind::Audio { .. } => selection.eager_audio,
                _ => false,
            };
            if wanted {
                let node = Node::property(self, image, index as u32, contents);
                if let Err(e) = node.value() {
                    warn!(path = %node.path(), error = %e, "eager decode failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("header", &self.header)
            .field("version", &self.version.version)
            .field("variant", &self.options.variant)
            .field("directories", &self.directories.len())
            .field("images", &self.images.len())
            .finish()
    }
}
