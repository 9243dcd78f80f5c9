//! Directory table parsing.
//!
//! The directory tree is read eagerly when the archive is opened. Images are
//! only located here; their contents are parsed on first access.

use std::hash::BuildHasherDefault;
use std::sync::Arc;

use hashbrown::HashSet;
use rustc_hash::FxHasher;
use tracing::trace;

use crate::archive::Interner;
use crate::codec::WzReader;
use crate::crypto::KeyStream;
use crate::image::ImageNode;
use crate::node::{Children, Entry};
use crate::{Error, Result};

type FxHashSet<K> = HashSet<K, BuildHasherDefault<FxHasher>>;

/// Maximum directory nesting.
pub(crate) const MAX_DEPTH: usize = 64;

/// Entry tags in a directory table.
const ENTRY_PLACEHOLDER: u8 = 1;
const ENTRY_REDIRECT: u8 = 2;
const ENTRY_DIRECTORY: u8 = 3;
const ENTRY_IMAGE: u8 = 4;

pub(crate) struct DirectoryNode {
    pub name: Arc<str>,
    pub parent: Option<u32>,
    pub children: Children<Entry>,
}

/// The directory and image arenas. Index 0 is the root directory.
pub(crate) struct Tree {
    pub directories: Vec<DirectoryNode>,
    pub images: Vec<ImageNode>,
}

pub(crate) struct TreeReader<'a> {
    reader: WzReader<'a>,
    fstart: u32,
    hash: u32,
    encrypted_names: bool,
    names: &'a Interner,
    directories: Vec<DirectoryNode>,
    images: Vec<ImageNode>,
    /// Offsets of tables already read. Each table belongs to one directory.
    tables: FxHashSet<usize>,
}

impl<'a> TreeReader<'a> {
    pub fn new(
        data: &'a [u8],
        keys: &'a KeyStream,
        fstart: u32,
        hash: u32,
        encrypted_names: bool,
        names: &'a Interner,
    ) -> Self {
        Self {
            reader: WzReader::new(data, keys),
            fstart,
            hash,
            encrypted_names,
            names,
            directories: Vec::new(),
            images: Vec::new(),
            tables: FxHashSet::default(),
        }
    }

    /// Read the whole tree, starting at the root table after the version checksum.
    pub fn read(mut self) -> Result<Tree> {
        self.directories.push(DirectoryNode {
            name: self.names.intern(""),
            parent: None,
            children: Children::default(),
        });
        let root = self.read_table(0, self.fstart as usize + 2, 0)?;
        self.directories[0].children = root;

        Ok(Tree {
            directories: self.directories,
            images: self.images,
        })
    }

    fn read_table(&mut self, parent: u32, offset: usize, depth: usize) -> Result<Children<Entry>> {
        if depth >= MAX_DEPTH {
            return Err(Error::NestingTooDeep(MAX_DEPTH));
        }
        if !self.tables.insert(offset) {
            return Err(Error::TableRevisited { offset });
        }

        self.reader.seek(offset)?;
        let count = self.reader.read_compact_len()?;
        let mut children = Children::default();

        for _ in 0..count {
            let entry_offset = self.reader.position();
            let (tag, name) = match self.reader.read_u8()? {
                ENTRY_PLACEHOLDER => {
                    self.reader.skip(10)?;
                    continue;
                }
                ENTRY_REDIRECT => {
                    let target = self.reader.read_len()? + self.fstart as usize;
                    let encrypted = self.encrypted_names;
                    self.reader.peek(|r| {
                        r.seek(target)?;
                        let tag = r.read_u8()?;
                        Ok((tag, r.read_string(encrypted)?))
                    })?
                }
                tag @ (ENTRY_DIRECTORY | ENTRY_IMAGE) => {
                    (tag, self.reader.read_string(self.encrypted_names)?)
                }
                tag => {
                    return Err(Error::UnknownEntryType {
                        tag,
                        offset: entry_offset,
                    })
                }
            };

            let size = self.reader.read_compact_len()?;
            let _checksum = self.reader.read_compact_i32()?;
            let target = self.reader.read_offset(self.fstart, self.hash)? as usize;
            let name = self.names.intern(&name);
            trace!(%name, tag, size, target, "directory entry");

            let entry = match tag {
                ENTRY_DIRECTORY => {
                    let index = self.directories.len() as u32;
                    self.directories.push(DirectoryNode {
                        name: name.clone(),
                        parent: Some(parent),
                        children: Children::default(),
                    });
                    let resume = self.reader.position();
                    let grandchildren = self.read_table(index, target, depth + 1)?;
                    self.reader.seek(resume)?;
                    self.directories[index as usize].children = grandchildren;
                    Entry::Directory(index)
                }
                ENTRY_IMAGE => {
                    let len = self.reader.len();
                    let end = target
                        .checked_add(size)
                        .filter(|&end| end <= len)
                        .ok_or(Error::ImageOutOfBounds {
                            offset: target,
                            size,
                            len,
                        })?;
                    let index = self.images.len() as u32;
                    self.images
                        .push(ImageNode::new(name.clone(), parent, target..end));
                    Entry::Image(index)
                }
                tag => {
                    return Err(Error::UnknownEntryType {
                        tag,
                        offset: entry_offset,
                    })
                }
            };
            children.insert(name, entry)?;
        }

        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{KeyStreamMode, Variant};
    use crate::codec::offset_key;
    use crate::testutil::{ArchiveBuilder, PropertyWriter};
    use crate::version::version_hash;
    use byteorder::{ByteOrder, LittleEndian};

    fn read(built: &crate::testutil::BuiltArchive, variant: Variant) -> Result<Tree> {
        let keys = KeyStream::new(variant, KeyStreamMode::Chained);
        let names = Interner::default();
        TreeReader::new(&built.bytes, &keys, built.fstart, built.hash, true, &names).read()
    }

    #[test]
    fn test_nested_tree() {
        let image = PropertyWriter::for_image(Variant::Gms).int32("x", 1).finish();
        let image_len = image.len();
        let built = ArchiveBuilder::new(Variant::Gms, 83)
            .directory("Map", |d| {
                d.directory("Obj", |d| d.image("deep.img", image.clone()))
                    .image("top.img", image.clone())
            })
            .image("root.img", image.clone())
            .build();
        assert_eq!(built.hash, version_hash(83));

        let tree = read(&built, Variant::Gms).unwrap();
        assert_eq!(tree.directories.len(), 3);
        assert_eq!(tree.images.len(), 3);

        let root = &tree.directories[0];
        assert_eq!(root.children.len(), 2);
        let Some(Entry::Directory(map)) = root.children.get("Map") else {
            panic!("Map is not a directory");
        };
        let map = &tree.directories[map as usize];
        assert_eq!(map.parent, Some(0));
        assert!(matches!(map.children.get("top.img"), Some(Entry::Image(_))));

        let mut starts: Vec<usize> = tree.images.iter().map(|image| image.range.start).collect();
        starts.sort_unstable();
        let mut expected = built.images.clone();
        expected.sort_unstable();
        assert_eq!(starts, expected);
        assert!(tree.images.iter().all(|image| image.range.len() == image_len));
    }

    #[test]
    fn test_placeholder_and_redirect_entries() {
        let image = PropertyWriter::for_image(Variant::Kms).int32("x", 1).finish();
        let built = ArchiveBuilder::new(Variant::Kms, 95)
            .placeholder()
            .image_redirected("moved.img", image.clone())
            .image("plain.img", image)
            .build();

        let tree = read(&built, Variant::Kms).unwrap();
        let root = &tree.directories[0];
        assert_eq!(root.children.len(), 2);
        assert!(matches!(root.children.get("moved.img"), Some(Entry::Image(0))));
        assert!(matches!(root.children.get("plain.img"), Some(Entry::Image(1))));
    }

    #[test]
    fn test_unknown_entry_type() {
        let image = PropertyWriter::for_image(Variant::Gms).int32("x", 1).finish();
        let mut built = ArchiveBuilder::new(Variant::Gms, 83).image("a.img", image).build();
        let tag_at = built.fstart as usize + 3;
        built.bytes[tag_at] = 9;

        assert!(matches!(
            read(&built, Variant::Gms),
            Err(Error::UnknownEntryType { tag: 9, offset }) if offset == tag_at
        ));
    }

    #[test]
    fn test_image_out_of_bounds() {
        let image = PropertyWriter::for_image(Variant::Gms).int32("x", 1).finish();
        let mut built = ArchiveBuilder::new(Variant::Gms, 83).image("a.img", image).build();
        built.bytes.pop();

        assert!(matches!(
            read(&built, Variant::Gms),
            Err(Error::ImageOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_duplicate_entry_names() {
        let image = PropertyWriter::for_image(Variant::Gms).int32("x", 1).finish();
        let built = ArchiveBuilder::new(Variant::Gms, 83)
            .image("a.img", image.clone())
            .image("a.img", image)
            .build();

        assert!(matches!(
            read(&built, Variant::Gms),
            Err(Error::DuplicateChild(name)) if name == "a.img"
        ));
    }

    #[test]
    fn test_table_referenced_twice() {
        let mut built = ArchiveBuilder::new(Variant::Gms, 83)
            .directory("Map", |d| d)
            .build();
        let fstart = built.fstart;
        let root_table = fstart as usize + 2;
        // count, tag, "Map" (prefix + 3 bytes), size, checksum
        let field = root_table + 1 + 1 + 4 + 1 + 1;
        let stored = offset_key(field as u32, fstart, built.hash)
            ^ (root_table as u32).wrapping_sub(fstart * 2);
        LittleEndian::write_u32(&mut built.bytes[field..field + 4], stored);

        assert!(matches!(
            read(&built, Variant::Gms),
            Err(Error::TableRevisited { offset }) if offset == root_table
        ));
    }
}
