//! Borrowed views over archive nodes.
//!
//! Directories, images and properties live in index-addressed arenas owned by
//! the [`Archive`]. A [`Node`] is a copyable handle into one of those arenas,
//! so parent links never form ownership cycles and nodes can not outlive the
//! archive that produced them.

use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use hashbrown::hash_map::Entry as Slot;
use hashbrown::{HashMap, HashSet};
use rustc_hash::FxHasher;

use crate::archive::Archive;
use crate::audio::{self, AudioData, AudioInfo};
use crate::canvas::{self, CanvasImage, CanvasInfo};
use crate::image::ImageContents;
use crate::property::PropKind;
use crate::value::{Point, Value};
use crate::{Error, Result};

type FxHashMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;
type FxHashSet<K> = HashSet<K, BuildHasherDefault<FxHasher>>;

/// A directory table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    Directory(u32),
    Image(u32),
}

/// Named children of a container, kept in file order.
pub(crate) struct Children<K> {
    order: Vec<K>,
    by_name: FxHashMap<Arc<str>, K>,
}

impl<K> Default for Children<K> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }
}

impl<K: Copy> Children<K> {
    /// Register a child. Names must be unique within one container.
    pub fn insert(&mut self, name: Arc<str>, key: K) -> Result<()> {
        match self.by_name.entry(name) {
            Slot::Occupied(slot) => Err(Error::DuplicateChild(slot.key().to_string())),
            Slot::Vacant(slot) => {
                slot.insert(key);
                self.order.push(key);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<K> {
        self.by_name.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.order.iter()
    }
}

/// Stable identity of a node within one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Directory(u32),
    Image(u32),
    Property { image: u32, index: u32 },
}

/// What a node is, without materializing its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Directory,
    Image,
    Null,
    UInt16,
    Int32,
    Int64,
    Single,
    Double,
    String,
    Point,
    Uol,
    SubProperty,
    Canvas,
    Audio,
    Convex,
}

impl NodeKind {
    /// Short lowercase name, e.g. `canvas`.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Directory => "directory",
            NodeKind::Image => "image",
            NodeKind::Null => "null",
            NodeKind::UInt16 => "uint16",
            NodeKind::Int32 => "int32",
            NodeKind::Int64 => "int64",
            NodeKind::Single => "single",
            NodeKind::Double => "double",
            NodeKind::String => "string",
            NodeKind::Point => "vector",
            NodeKind::Uol => "uol",
            NodeKind::SubProperty => "property",
            NodeKind::Canvas => "canvas",
            NodeKind::Audio => "audio",
            NodeKind::Convex => "convex",
        }
    }

    #[inline]
    pub fn is_property(self) -> bool {
        !matches!(self, NodeKind::Directory | NodeKind::Image)
    }
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Directory(u32),
    Image(u32),
    Property {
        image: u32,
        index: u32,
        contents: &'a ImageContents,
    },
}

/// A view of one node in an [`Archive`].
///
/// Nodes are cheap to copy and borrow from the archive. Accessing an image's
/// children parses the image on first use; reading a string, canvas or audio
/// value decodes it on first use. Both results are cached in the archive.
#[derive(Clone, Copy)]
pub struct Node<'a> {
    archive: &'a Archive,
    target: Target<'a>,
}

impl<'a> Node<'a> {
    #[inline]
    pub(crate) fn directory(archive: &'a Archive, index: u32) -> Self {
        Self {
            archive,
            target: Target::Directory(index),
        }
    }

    #[inline]
    pub(crate) fn image(archive: &'a Archive, index: u32) -> Self {
        Self {
            archive,
            target: Target::Image(index),
        }
    }

    #[inline]
    pub(crate) fn property(
        archive: &'a Archive,
        image: u32,
        index: u32,
        contents: &'a ImageContents,
    ) -> Self {
        Self {
            archive,
            target: Target::Property {
                image,
                index,
                contents,
            },
        }
    }

    #[inline]
    fn from_entry(archive: &'a Archive, entry: Entry) -> Self {
        match entry {
            Entry::Directory(index) => Self::directory(archive, index),
            Entry::Image(index) => Self::image(archive, index),
        }
    }

    /// The archive this node belongs to.
    #[inline]
    pub fn archive(&self) -> &'a Archive {
        self.archive
    }

    pub fn id(&self) -> NodeId {
        match self.target {
            Target::Directory(index) => NodeId::Directory(index),
            Target::Image(index) => NodeId::Image(index),
            Target::Property { image, index, .. } => NodeId::Property { image, index },
        }
    }

    /// The node's name. The root directory's name is empty.
    pub fn name(&self) -> &'a str {
        match self.target {
            Target::Directory(index) => &self.archive.directory(index).name,
            Target::Image(index) => &self.archive.image(index).name,
            Target::Property {
                index, contents, ..
            } => &contents.nodes[index as usize].name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.target {
            Target::Directory(_) => NodeKind::Directory,
            Target::Image(_) => NodeKind::Image,
            Target::Property {
                index, contents, ..
            } => match contents.nodes[index as usize].kind {
                PropKind::Null => NodeKind::Null,
                PropKind::UInt16(_) => NodeKind::UInt16,
                PropKind::Int32(_) => NodeKind::Int32,
                PropKind::Int64(_) => NodeKind::Int64,
                PropKind::Single(_) => NodeKind::Single,
                PropKind::Double(_) => NodeKind::Double,
                PropKind::String { .. } => NodeKind::String,
                PropKind::Point(_) => NodeKind::Point,
                PropKind::Uol(_) => NodeKind::Uol,
                PropKind::SubProperty => NodeKind::SubProperty,
                PropKind::Canvas { .. } => NodeKind::Canvas,
                PropKind::Audio { .. } => NodeKind::Audio,
                PropKind::Convex => NodeKind::Convex,
            },
        }
    }

    /// The containing node, or `None` for the root directory.
    pub fn parent(&self) -> Option<Node<'a>> {
        match self.target {
            Target::Directory(index) => self
                .archive
                .directory(index)
                .parent
                .map(|parent| Self::directory(self.archive, parent)),
            Target::Image(index) => Some(Self::directory(
                self.archive,
                self.archive.image(index).parent,
            )),
            Target::Property {
                image,
                index,
                contents,
            } => match contents.nodes[index as usize].parent {
                Some(parent) => Some(Self::property(self.archive, image, parent, contents)),
                None => Some(Self::image(self.archive, image)),
            },
        }
    }

    /// Slash-separated path from the root, e.g. `/Mob/100100.img/info/speed`.
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let mut current = *self;
        while let Some(parent) = current.parent() {
            names.push(current.name());
            current = parent;
        }
        if names.is_empty() {
            return "/".to_string();
        }

        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        path
    }

    /// Iterate over the node's children, parsing its image if needed.
    pub fn children(&self) -> Result<NodeIter<'a>> {
        let inner = match self.target {
            Target::Directory(index) => {
                Inner::Entries(self.archive.directory(index).children.iter())
            }
            Target::Image(index) => {
                let contents = self.archive.contents(index)?;
                Inner::Properties {
                    image: index,
                    contents,
                    indices: contents.root.iter(),
                }
            }
            Target::Property {
                image,
                index,
                contents,
            } => Inner::Properties {
                image,
                contents,
                indices: contents.nodes[index as usize].children.iter(),
            },
        };

        Ok(NodeIter {
            archive: self.archive,
            inner,
        })
    }

    pub fn child_count(&self) -> Result<usize> {
        Ok(self.children()?.len())
    }

    pub fn has_child(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// Look up a direct child by name.
    ///
    /// Only fails if the containing image can not be parsed.
    pub fn get(&self, name: &str) -> Result<Option<Node<'a>>> {
        let found = match self.target {
            Target::Directory(index) => self
                .archive
                .directory(index)
                .children
                .get(name)
                .map(|entry| Self::from_entry(self.archive, entry)),
            Target::Image(index) => {
                let contents = self.archive.contents(index)?;
                contents
                    .root
                    .get(name)
                    .map(|child| Self::property(self.archive, index, child, contents))
            }
            Target::Property {
                image,
                index,
                contents,
            } => contents.nodes[index as usize]
                .children
                .get(name)
                .map(|child| Self::property(self.archive, image, child, contents)),
        };
        Ok(found)
    }

    /// Look up a direct child by name, failing with [`Error::NotFound`] if it is missing.
    pub fn child(&self, name: &str) -> Result<Node<'a>> {
        self.get(name)?.ok_or_else(|| Error::NotFound {
            path: self.path(),
            name: name.to_string(),
        })
    }

    /// Follow a slash-separated path relative to this node.
    ///
    /// Empty and `.` segments are ignored, `..` moves to the parent.
    pub fn resolve_path(&self, path: &str) -> Result<Node<'a>> {
        let mut current = *self;
        for segment in path.split('/') {
            current = match segment {
                "" | "." => continue,
                ".." => current.parent().ok_or_else(|| Error::NotFound {
                    path: current.path(),
                    name: segment.to_string(),
                })?,
                name => current.child(name)?,
            };
        }
        Ok(current)
    }

    /// The property value, decoding delayed values on first access.
    pub fn value(&self) -> Result<Value<'a>> {
        let Target::Property {
            image,
            index,
            contents,
        } = self.target
        else {
            return Err(Error::NotAProperty(self.path()));
        };

        let value = match &contents.nodes[index as usize].kind {
            PropKind::Null => Value::Null,
            PropKind::UInt16(v) => Value::UInt16(*v),
            PropKind::Int32(v) => Value::Int32(*v),
            PropKind::Int64(v) => Value::Int64(*v),
            PropKind::Single(v) => Value::Single(*v),
            PropKind::Double(v) => Value::Double(*v),
            PropKind::Point(p) => Value::Point(*p),
            PropKind::Uol(path) => Value::Uol(path),
            PropKind::SubProperty => Value::SubProperty,
            PropKind::Convex => Value::Convex,
            PropKind::String { offset, value } => {
                let text = self.archive.materialize(image, value, |r| {
                    r.seek(*offset)?;
                    r.read_string_block(contents.encrypted)
                })?;
                Value::String(text)
            }
            PropKind::Canvas { info, pixels } => {
                let pixels = self
                    .archive
                    .materialize(image, pixels, |r| canvas::decode(r, info))?;
                Value::Canvas(pixels.as_ref())
            }
            PropKind::Audio { info, data } => {
                let data = self
                    .archive
                    .materialize(image, data, |r| audio::decode(r, info))?;
                Value::Audio(data)
            }
        };
        Ok(value)
    }

    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        self.value().ok()?.as_i32()
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.value().ok()?.as_i64()
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.value().ok()?.as_f64()
    }

    #[inline]
    pub fn as_point(&self) -> Option<Point> {
        self.value().ok()?.as_point()
    }

    /// The decoded string, or `None` if this is not a string property.
    pub fn as_str(&self) -> Result<Option<&'a str>> {
        if self.kind() != NodeKind::String {
            return Ok(None);
        }
        Ok(self.value()?.as_str())
    }

    /// Canvas metadata, read without decoding pixels.
    pub fn canvas_info(&self) -> Option<&'a CanvasInfo> {
        match self.prop_kind()? {
            PropKind::Canvas { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Decoded canvas pixels.
    ///
    /// `None` if this is not a canvas or its pixel format is unsupported.
    pub fn canvas(&self) -> Result<Option<&'a CanvasImage>> {
        if self.kind() != NodeKind::Canvas {
            return Ok(None);
        }
        Ok(self.value()?.as_canvas())
    }

    /// Audio metadata, read without copying the payload.
    pub fn audio_info(&self) -> Option<&'a AudioInfo> {
        match self.prop_kind()? {
            PropKind::Audio { info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn audio(&self) -> Result<Option<&'a AudioData>> {
        if self.kind() != NodeKind::Audio {
            return Ok(None);
        }
        Ok(self.value()?.as_audio())
    }

    /// Follow a UOL one step. The link is resolved relative to the UOL's parent.
    pub fn resolve_uol(&self) -> Result<Node<'a>> {
        let Some(PropKind::Uol(link)) = self.prop_kind() else {
            return Err(Error::NotAUol(self.path()));
        };
        let start = self.parent().ok_or_else(|| Error::NotAUol(self.path()))?;
        start.resolve_path(link)
    }

    /// Follow UOLs until reaching a node that is not one.
    ///
    /// Returns this node unchanged if it is not a UOL. Fails with
    /// [`Error::UolCycle`] if a chain revisits a link.
    pub fn resolve_uol_fully(&self) -> Result<Node<'a>> {
        let mut visited = FxHashSet::default();
        let mut current = *self;
        while current.kind() == NodeKind::Uol {
            if !visited.insert(current.id()) {
                return Err(Error::UolCycle(current.path()));
            }
            current = current.resolve_uol()?;
        }
        Ok(current)
    }

    /// Depth-first traversal starting at this node.
    ///
    /// The visitor receives each node with its depth below this one and
    /// returns whether to descend into it.
    pub fn walk<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(Node<'a>, usize) -> bool,
    {
        fn visit<'a, F>(node: Node<'a>, depth: usize, visitor: &mut F) -> Result<()>
        where
            F: FnMut(Node<'a>, usize) -> bool,
        {
            if !visitor(node, depth) {
                return Ok(());
            }
            for child in node.children()? {
                visit(child, depth + 1, visitor)?;
            }
            Ok(())
        }

        visit(*self, 0, &mut visitor)
    }

    fn prop_kind(&self) -> Option<&'a PropKind> {
        match self.target {
            Target::Property {
                index, contents, ..
            } => Some(&contents.nodes[index as usize].kind),
            _ => None,
        }
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.archive, other.archive) && self.id() == other.id()
    }
}

impl Eq for Node<'_> {}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path())
            .field("kind", &self.kind())
            .finish()
    }
}

enum Inner<'a> {
    Entries(std::slice::Iter<'a, Entry>),
    Properties {
        image: u32,
        contents: &'a ImageContents,
        indices: std::slice::Iter<'a, u32>,
    },
}

/// Iterator over the children of a [`Node`].
pub struct NodeIter<'a> {
    archive: &'a Archive,
    inner: Inner<'a>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Entries(entries) => entries
                .next()
                .map(|&entry| Node::from_entry(self.archive, entry)),
            Inner::Properties {
                image,
                contents,
                indices,
            } => indices
                .next()
                .map(|&index| Node::property(self.archive, *image, index, contents)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = match &self.inner {
            Inner::Entries(entries) => entries.len(),
            Inner::Properties { indices, .. } => indices.len(),
        };
        (len, Some(len))
    }
}

impl ExactSizeIterator for NodeIter<'_> {}
