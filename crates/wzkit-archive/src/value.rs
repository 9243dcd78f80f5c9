//! Typed property values.

use std::fmt;

use crate::audio::AudioData;
use crate::canvas::CanvasImage;

/// A 2D integer vector (`Shape2D#Vector2D`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// The value of a property node.
///
/// Borrowed values live as long as the archive they were read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    String(&'a str),
    Point(Point),
    /// Link to another node, as a relative path.
    Uol(&'a str),
    /// Container of named children.
    SubProperty,
    /// Decoded pixels, or `None` for an unsupported pixel format.
    Canvas(Option<&'a CanvasImage>),
    Audio(&'a AudioData),
    /// Container of points named by index.
    Convex,
}

impl<'a> Value<'a> {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get this value as an i32.
    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::UInt16(v) => Some(*v as i32),
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as an i64.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::UInt16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Single(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get this value as a string.
    #[inline]
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Value::String(s) => Some(*s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_point(&self) -> Option<Point> {
        match self {
            Value::Point(p) => Some(*p),
            _ => None,
        }
    }

    #[inline]
    pub fn as_canvas(&self) -> Option<&'a CanvasImage> {
        match self {
            Value::Canvas(c) => *c,
            _ => None,
        }
    }

    #[inline]
    pub fn as_audio(&self) -> Option<&'a AudioData> {
        match self {
            Value::Audio(a) => Some(*a),
            _ => None,
        }
    }

    /// Short name of the value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::UInt16(_) => "uint16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Single(_) => "single",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Point(_) => "vector",
            Value::Uol(_) => "uol",
            Value::SubProperty => "property",
            Value::Canvas(_) => "canvas",
            Value::Audio(_) => "audio",
            Value::Convex => "convex",
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Single(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Point(p) => write!(f, "({}, {})", p.x, p.y),
            Value::Uol(path) => write!(f, "-> {path}"),
            Value::SubProperty => f.write_str("<property>"),
            Value::Canvas(Some(c)) => write!(f, "<canvas {}x{}>", c.width(), c.height()),
            Value::Canvas(None) => f.write_str("<canvas: unsupported format>"),
            Value::Audio(a) => write!(f, "<audio {} ms, {} bytes>", a.duration, a.payload.len()),
            Value::Convex => f.write_str("<convex>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Value::UInt16(7).as_i32(), Some(7));
        assert_eq!(Value::Int32(-7).as_i64(), Some(-7));
        assert_eq!(Value::Int64(1 << 40).as_i32(), None);
        assert_eq!(Value::Single(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::String("hi").as_str(), Some("hi"));
        assert_eq!(Value::Uol("../a").as_str(), None);
        assert_eq!(Value::Point(Point { x: 1, y: 2 }).as_point(), Some(Point { x: 1, y: 2 }));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int32(42).to_string(), "42");
        assert_eq!(Value::Point(Point { x: -1, y: 3 }).to_string(), "(-1, 3)");
        assert_eq!(Value::Uol("../sibling").to_string(), "-> ../sibling");
        assert_eq!(Value::Canvas(None).type_name(), "canvas");
    }
}
