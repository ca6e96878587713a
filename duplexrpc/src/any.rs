//! `Any`: a small tagged union used for dynamic (reflection-free) calls and
//! for the property-control generic RPCs, with truncating cross-type
//! conversion rules applied on read.

use crate::error::RpcError;
use crate::stream::{Blob, Stream, StreamResult, WireType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    None = 0,
    Bool = 1,
    I32 = 2,
    U32 = 3,
    F32 = 4,
    String = 5,
    Blob = 6,
}

impl Tag {
    fn from_u8(v: u8) -> StreamResult<Self> {
        Ok(match v {
            0 => Tag::None,
            1 => Tag::Bool,
            2 => Tag::I32,
            3 => Tag::U32,
            4 => Tag::F32,
            5 => Tag::String,
            6 => Tag::Blob,
            other => {
                return Err(RpcError::protocol(format!(
                    "unknown Any tag {} on the wire",
                    other
                )))
            }
        })
    }
}

/// A dynamically-typed RPC value: `{none, bool, i32, u32, f32, string, blob}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Any {
    None,
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    String(String),
    Blob(Vec<u8>),
}

impl Default for Any {
    fn default() -> Self {
        Any::None
    }
}

impl Any {
    fn tag(&self) -> Tag {
        match self {
            Any::None => Tag::None,
            Any::Bool(_) => Tag::Bool,
            Any::I32(_) => Tag::I32,
            Any::U32(_) => Tag::U32,
            Any::F32(_) => Tag::F32,
            Any::String(_) => Tag::String,
            Any::Blob(_) => Tag::Blob,
        }
    }

    /// Render a human-readable form, used for logging/debug display only.
    pub fn to_display_string(&self) -> String {
        match self {
            Any::None => String::new(),
            Any::Bool(b) => b.to_string(),
            Any::I32(v) => v.to_string(),
            Any::U32(v) => v.to_string(),
            Any::F32(v) => format!("{:.4}", v),
            Any::String(s) => s.clone(),
            Any::Blob(b) => format!("BLOB{{{}}}", b.len()),
        }
    }
}

/// Typed accessor into an `Any`, implementing the cross-type conversion
/// rules. The matrix is asymmetric, not a simple bool/i32/u32/f32 widening:
/// `bool` reads from `Bool`, `I32`, or `U32`; `i32` reads from `I32` or
/// `F32` only (never `Bool`/`U32`); `u32` reads from `U32`, `I32`, or `F32`
/// (never `Bool`); `f32` reads from `F32`, `I32`, or `U32`. String and blob
/// only convert to themselves; `None` never converts.
pub trait AnyGet: Sized {
    fn get_from(v: &Any) -> Option<Self>;
}

impl AnyGet for bool {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::Bool(b) => Some(*b),
            Any::I32(i) => Some(*i != 0),
            Any::U32(u) => Some(*u != 0),
            _ => None,
        }
    }
}

impl AnyGet for i32 {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::I32(i) => Some(*i),
            Any::F32(f) => Some(*f as i32),
            _ => None,
        }
    }
}

impl AnyGet for u32 {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::U32(u) => Some(*u),
            Any::I32(i) => Some(*i as u32),
            Any::F32(f) => Some(*f as u32),
            _ => None,
        }
    }
}

impl AnyGet for f32 {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::F32(f) => Some(*f),
            Any::I32(i) => Some(*i as f32),
            Any::U32(u) => Some(*u as f32),
            _ => None,
        }
    }
}

impl AnyGet for String {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl AnyGet for Vec<u8> {
    fn get_from(v: &Any) -> Option<Self> {
        match v {
            Any::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}

impl Any {
    /// Attempt to read this value as `T`, applying the conversion rules.
    pub fn get_as<T: AnyGet>(&self) -> Option<T> {
        T::get_from(self)
    }
}

impl From<bool> for Any {
    fn from(v: bool) -> Self {
        Any::Bool(v)
    }
}
impl From<i32> for Any {
    fn from(v: i32) -> Self {
        Any::I32(v)
    }
}
impl From<u32> for Any {
    fn from(v: u32) -> Self {
        Any::U32(v)
    }
}
impl From<f32> for Any {
    fn from(v: f32) -> Self {
        Any::F32(v)
    }
}
impl From<String> for Any {
    fn from(v: String) -> Self {
        Any::String(v)
    }
}
impl From<&str> for Any {
    fn from(v: &str) -> Self {
        Any::String(v.to_string())
    }
}
impl From<Vec<u8>> for Any {
    fn from(v: Vec<u8>) -> Self {
        Any::Blob(v)
    }
}

impl WireType for Any {
    type Store = Any;

    fn write(s: &mut Stream, v: &Self) {
        u8::write(s, &(v.tag() as u8));
        match v {
            Any::None => {}
            Any::Bool(b) => bool::write(s, b),
            Any::I32(i) => i32::write(s, i),
            Any::U32(u) => u32::write(s, u),
            Any::F32(f) => f32::write(s, f),
            Any::String(str) => String::write(s, str),
            Any::Blob(b) => Blob::write(s, &Blob(b.clone())),
        }
    }

    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        let tag = Tag::from_u8(u8::read(s)?)?;
        Ok(match tag {
            Tag::None => Any::None,
            Tag::Bool => Any::Bool(bool::read(s)?),
            Tag::I32 => Any::I32(i32::read(s)?),
            Tag::U32 => Any::U32(u32::read(s)?),
            Tag::F32 => Any::F32(f32::read(s)?),
            Tag::String => Any::String(String::read(s)?),
            Tag::Blob => Any::Blob(Blob::read(s)?.0),
        })
    }
}
