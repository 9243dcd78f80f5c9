//! Property list parsing.
//!
//! Images, sub-properties, canvases and convex shapes all carry property
//! lists. Scalars are decoded in place. Strings, canvas pixels and audio
//! payloads are skipped and their offsets recorded so they can be decoded on
//! first access.

use std::sync::{Arc, OnceLock};

use crate::archive::Interner;
use crate::audio::{AudioData, AudioInfo};
use crate::canvas::{CanvasImage, CanvasInfo};
use crate::codec::WzReader;
use crate::node::Children;
use crate::value::Point;
use crate::{Error, Result};

/// Maximum nesting of property lists and extended properties.
pub(crate) const MAX_PROPERTY_DEPTH: usize = 64;

/// A property in an image's node arena.
pub(crate) struct PropNode {
    pub name: Arc<str>,
    /// Index of the parent property; `None` for top-level properties.
    pub parent: Option<u32>,
    pub kind: PropKind,
    pub children: Children<u32>,
}

pub(crate) enum PropKind {
    Null,
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    String {
        offset: usize,
        value: OnceLock<String>,
    },
    Point(Point),
    Uol(String),
    SubProperty,
    Canvas {
        info: CanvasInfo,
        pixels: OnceLock<Option<CanvasImage>>,
    },
    Audio {
        info: AudioInfo,
        data: OnceLock<AudioData>,
    },
    Convex,
}

/// Builds the property arena of one image.
pub(crate) struct PropertyParser<'a> {
    names: &'a Interner,
    encrypted: bool,
    nodes: Vec<PropNode>,
}

impl<'a> PropertyParser<'a> {
    pub fn new(names: &'a Interner, encrypted: bool) -> Self {
        Self {
            names,
            encrypted,
            nodes: Vec::new(),
        }
    }

    pub fn into_nodes(self) -> Vec<PropNode> {
        self.nodes
    }

    /// Parse a counted property list whose entries belong to `parent`.
    pub fn parse_list(
        &mut self,
        r: &mut WzReader<'_>,
        parent: Option<u32>,
        depth: usize,
    ) -> Result<Children<u32>> {
        if depth >= MAX_PROPERTY_DEPTH {
            return Err(Error::NestingTooDeep(MAX_PROPERTY_DEPTH));
        }

        let count = r.read_compact_len()?;
        let mut children = Children::default();

        for _ in 0..count {
            let name = self.names.intern(&r.read_string_block(self.encrypted)?);
            let offset = r.position();
            let index = match r.read_u8()? {
                0x00 => self.push(name.clone(), parent, PropKind::Null),
                0x02 | 0x0B => {
                    let value = r.read_u16()?;
                    self.push(name.clone(), parent, PropKind::UInt16(value))
                }
                0x03 | 0x13 => {
                    let value = r.read_compact_i32()?;
                    self.push(name.clone(), parent, PropKind::Int32(value))
                }
                0x14 => {
                    let value = r.read_compact_i64()?;
                    self.push(name.clone(), parent, PropKind::Int64(value))
                }
                0x04 => {
                    let value = read_single(r)?;
                    self.push(name.clone(), parent, PropKind::Single(value))
                }
                0x05 => {
                    let value = r.read_f64()?;
                    self.push(name.clone(), parent, PropKind::Double(value))
                }
                0x08 => {
                    let offset = r.position();
                    r.skip_string_block()?;
                    let kind = PropKind::String {
                        offset,
                        value: OnceLock::new(),
                    };
                    self.push(name.clone(), parent, kind)
                }
                0x09 => {
                    let block_len = r.read_u32()? as usize;
                    let index = r.peek(|r| self.parse_extended(r, name.clone(), parent, depth))?;
                    r.skip(block_len)?;
                    index
                }
                tag => return Err(Error::UnknownPropertyType { tag, offset }),
            };
            children.insert(name, index)?;
        }

        Ok(children)
    }

    /// Parse an extended property, dispatching on its type name.
    fn parse_extended(
        &mut self,
        r: &mut WzReader<'_>,
        name: Arc<str>,
        parent: Option<u32>,
        depth: usize,
    ) -> Result<u32> {
        if depth >= MAX_PROPERTY_DEPTH {
            return Err(Error::NestingTooDeep(MAX_PROPERTY_DEPTH));
        }

        let type_name = r.read_string_block(self.encrypted)?;
        // children need the index before the kind is known
        let index = self.push(name, parent, PropKind::Null);

        let (kind, children) = match type_name.as_str() {
            "Property" => {
                r.skip(2)?;
                let children = self.parse_list(r, Some(index), depth + 1)?;
                (PropKind::SubProperty, children)
            }
            "Canvas" => {
                r.skip(1)?;
                let children = if r.read_u8()? == 1 {
                    r.skip(2)?;
                    self.parse_list(r, Some(index), depth + 1)?
                } else {
                    Children::default()
                };
                let info = CanvasInfo::read(r)?;
                let kind = PropKind::Canvas {
                    info,
                    pixels: OnceLock::new(),
                };
                (kind, children)
            }
            "Shape2D#Vector2D" => {
                let x = r.read_compact_i32()?;
                let y = r.read_compact_i32()?;
                (PropKind::Point(Point { x, y }), Children::default())
            }
            "Shape2D#Convex2D" => {
                let count = r.read_compact_len()?;
                let mut children = Children::default();
                for i in 0..count {
                    let child_name = self.names.intern(&i.to_string());
                    let child = self.parse_extended(r, child_name.clone(), Some(index), depth + 1)?;
                    children.insert(child_name, child)?;
                }
                (PropKind::Convex, children)
            }
            "Sound_DX8" => {
                let info = AudioInfo::read(r)?;
                let kind = PropKind::Audio {
                    info,
                    data: OnceLock::new(),
                };
                (kind, Children::default())
            }
            "UOL" => {
                r.skip(1)?;
                let target = r.read_string_block(self.encrypted)?;
                (PropKind::Uol(target), Children::default())
            }
            _ => return Err(Error::UnknownExtendedType(type_name)),
        };

        let node = &mut self.nodes[index as usize];
        node.kind = kind;
        node.children = children;
        Ok(index)
    }

    fn push(&mut self, name: Arc<str>, parent: Option<u32>, kind: PropKind) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(PropNode {
            name,
            parent,
            kind,
            children: Children::default(),
        });
        index
    }
}

fn read_single(r: &mut WzReader<'_>) -> Result<f32> {
    match r.read_u8()? {
        0x80 => Ok(r.read_f32()?),
        0x00 => Ok(0.0),
        marker => Err(Error::InvalidSingle(marker)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyStream;
    use crate::options::{KeyStreamMode, Variant};
    use crate::testutil::PropertyWriter;

    fn parse(bytes: &[u8], keys: &KeyStream, encrypted: bool) -> Result<(Vec<PropNode>, Children<u32>)> {
        let names = Interner::default();
        let mut parser = PropertyParser::new(&names, encrypted);
        let mut reader = WzReader::new(bytes, keys);
        let root = parser.parse_list(&mut reader, None, 0)?;
        Ok((parser.into_nodes(), root))
    }

    #[test]
    fn test_scalar_properties() {
        let keys = KeyStream::new(Variant::Classic, KeyStreamMode::Chained);
        let list = PropertyWriter::new(&keys, false)
            .null("n")
            .uint16("u", 0xBEEF)
            .int32("i", -300)
            .int64("l", 1 << 40)
            .single("f", 1.5)
            .single_zero("z")
            .double("d", -2.25)
            .vector("v", 3, -4)
            .into_list();

        let (nodes, root) = parse(&list, &keys, false).unwrap();
        assert_eq!(root.len(), 8);

        let kind = |name: &str| &nodes[root.get(name).unwrap() as usize].kind;
        assert!(matches!(kind("n"), PropKind::Null));
        assert!(matches!(kind("u"), PropKind::UInt16(0xBEEF)));
        assert!(matches!(kind("i"), PropKind::Int32(-300)));
        assert!(matches!(kind("l"), PropKind::Int64(v) if *v == 1 << 40));
        assert!(matches!(kind("f"), PropKind::Single(v) if *v == 1.5));
        assert!(matches!(kind("z"), PropKind::Single(v) if *v == 0.0));
        assert!(matches!(kind("d"), PropKind::Double(v) if *v == -2.25));
        assert!(matches!(kind("v"), PropKind::Point(Point { x: 3, y: -4 })));
    }

    #[test]
    fn test_nested_and_convex() {
        let keys = KeyStream::new(Variant::Gms, KeyStreamMode::Chained);
        let list = PropertyWriter::new(&keys, true)
            .sub("info", |p| p.int32("speed", 7).string("name", "slime"))
            .convex("hull", &[(0, 0), (5, 0), (5, 5)])
            .uol("link", "../info")
            .into_list();

        let (nodes, root) = parse(&list, &keys, true).unwrap();
        let info = root.get("info").unwrap();
        assert!(matches!(nodes[info as usize].kind, PropKind::SubProperty));
        let speed = nodes[info as usize].children.get("speed").unwrap();
        assert_eq!(nodes[speed as usize].parent, Some(info));
        assert!(matches!(
            nodes[nodes[info as usize].children.get("name").unwrap() as usize].kind,
            PropKind::String { .. }
        ));

        let hull = root.get("hull").unwrap() as usize;
        assert!(matches!(nodes[hull].kind, PropKind::Convex));
        let corner = nodes[hull].children.get("2").unwrap() as usize;
        assert!(matches!(nodes[corner].kind, PropKind::Point(Point { x: 5, y: 5 })));

        let link = root.get("link").unwrap() as usize;
        assert!(matches!(&nodes[link].kind, PropKind::Uol(target) if target == "../info"));
    }

    #[test]
    fn test_unknown_tags() {
        let keys = KeyStream::new(Variant::Classic, KeyStreamMode::Chained);
        let list = PropertyWriter::new(&keys, false).raw("bad", 0x42, &[]).into_list();
        assert!(matches!(
            parse(&list, &keys, false),
            Err(Error::UnknownPropertyType { tag: 0x42, .. })
        ));

        let list = PropertyWriter::new(&keys, false)
            .extended("odd", "Shape2D#Mystery", &[])
            .into_list();
        assert!(matches!(
            parse(&list, &keys, false),
            Err(Error::UnknownExtendedType(name)) if name == "Shape2D#Mystery"
        ));
    }

    #[test]
    fn test_invalid_single_marker() {
        let keys = KeyStream::new(Variant::Classic, KeyStreamMode::Chained);
        let list = PropertyWriter::new(&keys, false).raw("f", 0x04, &[0x01]).into_list();
        assert!(matches!(parse(&list, &keys, false), Err(Error::InvalidSingle(0x01))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let keys = KeyStream::new(Variant::Classic, KeyStreamMode::Chained);
        let list = PropertyWriter::new(&keys, false)
            .int32("x", 1)
            .int32("x", 2)
            .into_list();
        assert!(matches!(parse(&list, &keys, false), Err(Error::DuplicateChild(name)) if name == "x"));
    }
}
