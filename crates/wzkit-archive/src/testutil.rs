//! Builders for synthetic archives used by the unit tests.

use std::io::Write;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::canvas::PixelFormat;
use crate::codec::offset_key;
use crate::crypto::KeyStream;
use crate::options::{KeyStreamMode, Variant};
use crate::version::{version_checksum, version_hash};

const DESCRIPTION: &[u8] = b"Package file v1.0 Copyright 2002 Wizet, ZZZ\0";

fn write_compact(out: &mut Vec<u8>, value: i32) {
    if (-127..=127).contains(&value) {
        out.write_i8(value as i8).unwrap();
    } else {
        out.write_i8(i8::MIN).unwrap();
        out.write_i32::<LittleEndian>(value).unwrap();
    }
}

fn write_compact_i64(out: &mut Vec<u8>, value: i64) {
    if (-127..=127).contains(&value) {
        out.write_i8(value as i8).unwrap();
    } else {
        out.write_i8(i8::MIN).unwrap();
        out.write_i64::<LittleEndian>(value).unwrap();
    }
}

fn encode_with(raw: &[u8], s: &str, encrypted: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if s.is_empty() {
        out.push(0);
        return out;
    }

    if s.is_ascii() {
        let bytes = s.as_bytes();
        if bytes.len() < 128 {
            out.write_i8(-(bytes.len() as i32) as i8).unwrap();
        } else {
            out.write_i8(i8::MIN).unwrap();
            out.write_i32::<LittleEndian>(bytes.len() as i32).unwrap();
        }
        for (i, &b) in bytes.iter().enumerate() {
            let mut key = 0xAAu8.wrapping_add(i as u8);
            if encrypted {
                key ^= raw[i];
            }
            out.push(b ^ key);
        }
    } else {
        let units: Vec<u16> = s.encode_utf16().collect();
        if units.len() < 127 {
            out.write_i8(units.len() as i8).unwrap();
        } else {
            out.write_i8(127).unwrap();
            out.write_i32::<LittleEndian>(units.len() as i32).unwrap();
        }
        for (i, &unit) in units.iter().enumerate() {
            let mut key = 0xAAAAu16.wrapping_add(i as u16);
            if encrypted {
                key ^= LittleEndian::read_u16(&raw[i * 2..]);
            }
            out.write_u16::<LittleEndian>(unit ^ key).unwrap();
        }
    }
    out
}

/// Encode a length-prefixed string the way the decoder expects it.
pub(crate) fn encode_string(keys: &KeyStream, s: &str, encrypted: bool) -> Vec<u8> {
    encode_with(keys.raw(), s, encrypted)
}

/// Zlib-compress `data` with the default header.
pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A canvas block: the reserved byte, then the compressed data, optionally
/// split into 16-byte chunks that are each XORed from the start of the raw stream.
pub(crate) fn canvas_block(keys: &KeyStream, compressed: &[u8], chunked: bool) -> Vec<u8> {
    let mut out = vec![0u8];
    if !chunked {
        out.extend_from_slice(compressed);
        return out;
    }

    for chunk in compressed.chunks(16) {
        out.write_i32::<LittleEndian>(chunk.len() as i32).unwrap();
        out.extend(chunk.iter().zip(keys.raw()).map(|(b, k)| b ^ k));
    }
    out
}

/// A minimal 18-byte PCM wave format header.
pub(crate) fn wave_header() -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u16::<LittleEndian>(1).unwrap();
    out.write_u16::<LittleEndian>(2).unwrap();
    out.write_u32::<LittleEndian>(44_100).unwrap();
    out.write_u32::<LittleEndian>(176_400).unwrap();
    out.write_u16::<LittleEndian>(4).unwrap();
    out.write_u16::<LittleEndian>(16).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out
}

/// Stored bytes of the audio major type GUID.
const MEDIATYPE_AUDIO: [u8; 16] = [
    0x61, 0x75, 0x64, 0x73, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];
/// Stored bytes of the MPEG-1 audio payload subtype GUID.
const SUBTYPE_MPEG: [u8; 16] = [
    0x2B, 0x80, 0x6D, 0xE0, 0x46, 0xDB, 0xCF, 0x11, 0xB4, 0xD1, 0x00, 0x80, 0x5F, 0x6C, 0xBB, 0xEA,
];
/// Stored bytes of the wave format block GUID.
const FORMAT_WAVE: [u8; 16] = [
    0x81, 0x9F, 0x58, 0x05, 0x56, 0xC3, 0xCE, 0x11, 0xBF, 0x01, 0x00, 0xAA, 0x00, 0x55, 0x59, 0x5A,
];

/// The body of a `Sound_DX8` property, after its type name.
pub(crate) fn audio_body(
    keys: &KeyStream,
    duration: i32,
    header: &[u8],
    encrypt_header: bool,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = vec![0u8];
    write_compact(&mut out, payload.len() as i32);
    write_compact(&mut out, duration);
    for guid in [MEDIATYPE_AUDIO, SUBTYPE_MPEG, FORMAT_WAVE] {
        out.push(1);
        out.extend_from_slice(&guid);
    }
    out.push(header.len() as u8);
    if encrypt_header {
        out.extend(header.iter().zip(keys.raw()).map(|(b, k)| b ^ k));
    } else {
        out.extend_from_slice(header);
    }
    out.extend_from_slice(payload);
    out
}

/// Writes a property list, or a whole image with [`PropertyWriter::finish`].
pub(crate) struct PropertyWriter {
    raw: Rc<[u8]>,
    encrypted: bool,
    count: i32,
    body: Vec<u8>,
}

impl PropertyWriter {
    pub fn new(keys: &KeyStream, encrypted: bool) -> Self {
        Self {
            raw: Rc::from(keys.raw()),
            encrypted,
            count: 0,
            body: Vec::new(),
        }
    }

    /// A writer for image contents, encrypted unless the variant is classic.
    pub fn for_image(variant: Variant) -> Self {
        let keys = KeyStream::new(variant, KeyStreamMode::Chained);
        Self::new(&keys, variant != Variant::Classic)
    }

    fn nested(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            encrypted: self.encrypted,
            count: 0,
            body: Vec::new(),
        }
    }

    fn encode(&self, s: &str) -> Vec<u8> {
        encode_with(&self.raw, s, self.encrypted)
    }

    /// Inline string block.
    fn block(&self, s: &str) -> Vec<u8> {
        let mut out = vec![0x00];
        out.extend(self.encode(s));
        out
    }

    fn entry(&mut self, name: &str, tag: u8) {
        self.count += 1;
        let name = self.block(name);
        self.body.extend(name);
        self.body.push(tag);
    }

    pub fn null(mut self, name: &str) -> Self {
        self.entry(name, 0x00);
        self
    }

    pub fn uint16(mut self, name: &str, value: u16) -> Self {
        self.entry(name, 0x0B);
        self.body.write_u16::<LittleEndian>(value).unwrap();
        self
    }

    pub fn int32(mut self, name: &str, value: i32) -> Self {
        self.entry(name, 0x03);
        write_compact(&mut self.body, value);
        self
    }

    pub fn int64(mut self, name: &str, value: i64) -> Self {
        self.entry(name, 0x14);
        write_compact_i64(&mut self.body, value);
        self
    }

    pub fn single(mut self, name: &str, value: f32) -> Self {
        self.entry(name, 0x04);
        self.body.push(0x80);
        self.body.write_f32::<LittleEndian>(value).unwrap();
        self
    }

    pub fn single_zero(mut self, name: &str) -> Self {
        self.entry(name, 0x04);
        self.body.push(0x00);
        self
    }

    pub fn double(mut self, name: &str, value: f64) -> Self {
        self.entry(name, 0x05);
        self.body.write_f64::<LittleEndian>(value).unwrap();
        self
    }

    pub fn string(mut self, name: &str, value: &str) -> Self {
        self.entry(name, 0x08);
        let value = self.block(value);
        self.body.extend(value);
        self
    }

    /// A property with an arbitrary tag and payload.
    pub fn raw(mut self, name: &str, tag: u8, payload: &[u8]) -> Self {
        self.entry(name, tag);
        self.body.extend_from_slice(payload);
        self
    }

    /// An extended property with the given type name and body.
    pub fn extended(mut self, name: &str, type_name: &str, body: &[u8]) -> Self {
        self.entry(name, 0x09);
        let mut block = vec![0x73];
        block.extend(self.encode(type_name));
        block.extend_from_slice(body);
        self.body.write_u32::<LittleEndian>(block.len() as u32).unwrap();
        self.body.extend(block);
        self
    }

    pub fn vector(self, name: &str, x: i32, y: i32) -> Self {
        let mut body = Vec::new();
        write_compact(&mut body, x);
        write_compact(&mut body, y);
        self.extended(name, "Shape2D#Vector2D", &body)
    }

    pub fn sub(self, name: &str, build: impl FnOnce(Self) -> Self) -> Self {
        let mut body = vec![0, 0];
        body.extend(build(self.nested()).into_list());
        self.extended(name, "Property", &body)
    }

    pub fn convex(self, name: &str, points: &[(i32, i32)]) -> Self {
        let mut body = Vec::new();
        write_compact(&mut body, points.len() as i32);
        for &(x, y) in points {
            body.push(0x73);
            body.extend(self.encode("Shape2D#Vector2D"));
            write_compact(&mut body, x);
            write_compact(&mut body, y);
        }
        self.extended(name, "Shape2D#Convex2D", &body)
    }

    pub fn uol(self, name: &str, path: &str) -> Self {
        let mut body = vec![0];
        body.extend(self.block(path));
        self.extended(name, "UOL", &body)
    }

    /// A canvas whose compressed block was built by [`canvas_block`].
    pub fn canvas(
        self,
        name: &str,
        width: i32,
        height: i32,
        format: PixelFormat,
        block: &[u8],
        children: impl FnOnce(Self) -> Self,
    ) -> Self {
        let children = children(self.nested());
        let mut body = vec![0];
        if children.count > 0 {
            body.extend_from_slice(&[1, 0, 0]);
            body.extend(children.into_list());
        } else {
            body.push(0);
        }
        write_compact(&mut body, width);
        write_compact(&mut body, height);
        write_compact(&mut body, format.primary);
        body.push(format.secondary);
        body.extend_from_slice(&[0; 4]);
        body.write_i32::<LittleEndian>(block.len() as i32).unwrap();
        body.extend_from_slice(block);
        self.extended(name, "Canvas", &body)
    }

    /// An audio property whose body was built by [`audio_body`].
    pub fn audio(self, name: &str, body: &[u8]) -> Self {
        self.extended(name, "Sound_DX8", body)
    }

    /// The counted property list.
    pub fn into_list(self) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact(&mut out, self.count);
        out.extend(self.body);
        out
    }

    /// A complete image: marker, header string, reserved field, property list.
    pub fn finish(self) -> Vec<u8> {
        let mut out = vec![0x73];
        out.extend(self.encode("Property"));
        out.write_u16::<LittleEndian>(0).unwrap();
        out.extend(self.into_list());
        out
    }
}

enum EntrySpec {
    Placeholder,
    Directory(DirectoryWriter),
    Image(Vec<u8>),
    RedirectedImage(Vec<u8>),
}

/// Contents of one directory table.
#[derive(Default)]
pub(crate) struct DirectoryWriter {
    entries: Vec<(String, EntrySpec)>,
}

impl DirectoryWriter {
    pub fn image(mut self, name: &str, data: Vec<u8>) -> Self {
        self.entries.push((name.to_string(), EntrySpec::Image(data)));
        self
    }

    /// An image whose tag and name are stored elsewhere and referenced by offset.
    pub fn image_redirected(mut self, name: &str, data: Vec<u8>) -> Self {
        self.entries
            .push((name.to_string(), EntrySpec::RedirectedImage(data)));
        self
    }

    pub fn directory(mut self, name: &str, build: impl FnOnce(Self) -> Self) -> Self {
        let dir = build(Self::default());
        self.entries.push((name.to_string(), EntrySpec::Directory(dir)));
        self
    }

    /// A reserved 10-byte entry that produces no node.
    pub fn placeholder(mut self) -> Self {
        self.entries.push((String::new(), EntrySpec::Placeholder));
        self
    }
}

/// A built archive and where its images landed.
pub(crate) struct BuiltArchive {
    pub bytes: Vec<u8>,
    pub fstart: u32,
    pub hash: u32,
    /// Absolute start of each image, in table order.
    pub images: Vec<usize>,
}

/// Builds a complete archive: header, checksum, directory tables, images.
pub(crate) struct ArchiveBuilder {
    variant: Variant,
    version: u16,
    root: DirectoryWriter,
}

#[derive(Clone, Copy)]
enum Fixup {
    Table(usize),
    Image(usize),
    Name(usize),
}

impl ArchiveBuilder {
    pub fn new(variant: Variant, version: u16) -> Self {
        Self {
            variant,
            version,
            root: DirectoryWriter::default(),
        }
    }

    pub fn image(mut self, name: &str, data: Vec<u8>) -> Self {
        self.root = self.root.image(name, data);
        self
    }

    pub fn image_redirected(mut self, name: &str, data: Vec<u8>) -> Self {
        self.root = self.root.image_redirected(name, data);
        self
    }

    pub fn directory(mut self, name: &str, build: impl FnOnce(DirectoryWriter) -> DirectoryWriter) -> Self {
        self.root = self.root.directory(name, build);
        self
    }

    pub fn placeholder(mut self) -> Self {
        self.root = self.root.placeholder();
        self
    }

    pub fn build(self) -> BuiltArchive {
        let keys = KeyStream::new(self.variant, KeyStreamMode::Chained);
        let hash = version_hash(self.version);

        let mut out = Vec::new();
        out.extend_from_slice(b"PKG1");
        out.write_u64::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.extend_from_slice(DESCRIPTION);
        let fstart = out.len() as u32;
        LittleEndian::write_u32(&mut out[12..16], fstart);
        out.write_u16::<LittleEndian>(version_checksum(hash)).unwrap();

        // Tables are written breadth-first; offsets are patched once every target is placed.
        let mut fixups: Vec<(usize, Fixup)> = Vec::new();
        let mut tables: Vec<&DirectoryWriter> = vec![&self.root];
        let mut table_starts = Vec::new();
        let mut images: Vec<&[u8]> = Vec::new();
        let mut names: Vec<&str> = Vec::new();

        let mut next = 0;
        while next < tables.len() {
            let table = tables[next];
            table_starts.push(out.len());
            write_compact(&mut out, table.entries.len() as i32);

            for (name, entry) in &table.entries {
                let size = match entry {
                    EntrySpec::Placeholder => {
                        out.push(1);
                        out.extend_from_slice(&[0; 10]);
                        continue;
                    }
                    EntrySpec::Directory(_) => {
                        out.push(3);
                        out.extend(encode_string(&keys, name, true));
                        0
                    }
                    EntrySpec::Image(data) => {
                        out.push(4);
                        out.extend(encode_string(&keys, name, true));
                        data.len()
                    }
                    EntrySpec::RedirectedImage(data) => {
                        out.push(2);
                        fixups.push((out.len(), Fixup::Name(names.len())));
                        names.push(name);
                        out.write_i32::<LittleEndian>(0).unwrap();
                        data.len()
                    }
                };
                write_compact(&mut out, size as i32);
                write_compact(&mut out, 0);

                let field = out.len();
                out.write_u32::<LittleEndian>(0).unwrap();
                match entry {
                    EntrySpec::Directory(dir) => {
                        fixups.push((field, Fixup::Table(tables.len())));
                        tables.push(dir);
                    }
                    EntrySpec::Image(data) | EntrySpec::RedirectedImage(data) => {
                        fixups.push((field, Fixup::Image(images.len())));
                        images.push(data);
                    }
                    EntrySpec::Placeholder => {}
                }
            }
            next += 1;
        }

        let mut image_starts = Vec::new();
        for data in &images {
            image_starts.push(out.len());
            out.extend_from_slice(data);
        }

        let mut name_starts = Vec::new();
        for name in &names {
            name_starts.push(out.len());
            out.push(4);
            out.extend(encode_string(&keys, name, true));
        }

        for (field, fixup) in fixups {
            match fixup {
                Fixup::Name(index) => {
                    let relative = name_starts[index] as u32 - fstart;
                    LittleEndian::write_u32(&mut out[field..field + 4], relative);
                }
                Fixup::Table(index) | Fixup::Image(index) => {
                    let target = match fixup {
                        Fixup::Table(_) => table_starts[index],
                        _ => image_starts[index],
                    } as u32;
                    let stored = offset_key(field as u32, fstart, hash)
                        ^ target.wrapping_sub(fstart.wrapping_mul(2));
                    LittleEndian::write_u32(&mut out[field..field + 4], stored);
                }
            }
        }

        let len = out.len() as u64;
        LittleEndian::write_u64(&mut out[4..12], len);

        BuiltArchive {
            bytes: out,
            fstart,
            hash,
            images: image_starts,
        }
    }
}
