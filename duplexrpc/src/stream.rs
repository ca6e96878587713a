//! Binary wire codec.
//!
//! `Stream` is an append-only write cursor / advancing read cursor over a
//! byte buffer. [`WireType`] is the per-type serialization trait: it
//! declares a `Store` type (normally `Self`) plus `write`/`read`, so a
//! dispatcher can always read the deserialized "store" value and hand it to
//! the target method by value.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{RpcError, RpcErrorKind};

/// Result type local to the wire codec: reading past the end of the buffer
/// is the one failure mode `Stream` itself can produce.
pub type StreamResult<T> = Result<T, RpcError>;

/// An append-only write / advancing-read byte buffer used to build and
/// consume RPC frame payloads.
#[derive(Debug, Default, Clone)]
pub struct Stream {
    buf: Vec<u8>,
    read_pos: usize,
}

impl Stream {
    pub fn new() -> Self {
        Stream::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Stream {
            buf: data,
            read_pos: 0,
        }
    }

    pub fn write_bytes(&mut self, src: &[u8]) {
        self.buf.extend_from_slice(src);
    }

    pub fn read_bytes(&mut self, n: usize) -> StreamResult<&[u8]> {
        if self.buf.len() - self.read_pos < n {
            return Err(RpcError::protocol(
                "attempted to read past the end of an RPC frame",
            ));
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.buf[start..self.read_pos])
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Total bytes written so far (irrespective of read position).
    pub fn written_len(&self) -> usize {
        self.buf.len()
    }

    /// Consume the stream, returning the underlying buffer.
    pub fn extract_buffer(self) -> Vec<u8> {
        self.buf
    }

    pub fn write<T: WireType>(&mut self, v: &T) {
        T::write(self, v);
    }

    pub fn read<T: WireType>(&mut self) -> StreamResult<T::Store> {
        T::read(self)
    }
}

/// Per-type wire serialization. `Store` lets a dispatcher always receive
/// values by ownership; for almost every type `Store = Self`.
pub trait WireType: Sized {
    type Store;

    fn write(s: &mut Stream, v: &Self);
    fn read(s: &mut Stream) -> StreamResult<Self::Store>;
}

macro_rules! impl_wire_for_arithmetic {
    ($t:ty, $width:expr, $write_fn:ident, $read_fn:ident) => {
        impl WireType for $t {
            type Store = $t;

            fn write(s: &mut Stream, v: &Self) {
                let mut buf = [0u8; $width];
                LittleEndian::$write_fn(&mut buf, *v);
                s.write_bytes(&buf);
            }

            fn read(s: &mut Stream) -> StreamResult<Self::Store> {
                let bytes = s.read_bytes($width)?;
                Ok(LittleEndian::$read_fn(bytes))
            }
        }
    };
}

impl_wire_for_arithmetic!(u16, 2, write_u16, read_u16);
impl_wire_for_arithmetic!(i16, 2, write_i16, read_i16);
impl_wire_for_arithmetic!(u32, 4, write_u32, read_u32);
impl_wire_for_arithmetic!(i32, 4, write_i32, read_i32);
impl_wire_for_arithmetic!(u64, 8, write_u64, read_u64);
impl_wire_for_arithmetic!(i64, 8, write_i64, read_i64);
impl_wire_for_arithmetic!(f32, 4, write_f32, read_f32);
impl_wire_for_arithmetic!(f64, 8, write_f64, read_f64);

impl WireType for u8 {
    type Store = u8;
    fn write(s: &mut Stream, v: &Self) {
        s.write_bytes(&[*v]);
    }
    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        Ok(s.read_bytes(1)?[0])
    }
}

impl WireType for i8 {
    type Store = i8;
    fn write(s: &mut Stream, v: &Self) {
        s.write_bytes(&[*v as u8]);
    }
    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        Ok(s.read_bytes(1)?[0] as i8)
    }
}

impl WireType for bool {
    type Store = bool;
    fn write(s: &mut Stream, v: &Self) {
        s.write_bytes(&[if *v { 1 } else { 0 }]);
    }
    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        Ok(s.read_bytes(1)?[0] != 0)
    }
}

impl WireType for () {
    type Store = ();
    fn write(_s: &mut Stream, _v: &Self) {}
    fn read(_s: &mut Stream) -> StreamResult<Self::Store> {
        Ok(())
    }
}

/// Strings and blobs: `i32` length prefix (never negative in practice, but
/// `i32` per the wire spec) followed by raw bytes, no terminator.
impl WireType for String {
    type Store = String;

    fn write(s: &mut Stream, v: &Self) {
        let len = v.len() as i32;
        i32::write(s, &len);
        s.write_bytes(v.as_bytes());
    }

    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        let len = i32::read(s)?;
        if len < 0 {
            return Err(RpcError::protocol("negative string length in RPC frame"));
        }
        let bytes = s.read_bytes(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RpcError::with_cause(RpcErrorKind::Serialization, "invalid utf-8 in RPC string", &e))
    }
}

impl<T: WireType> WireType for Vec<T> {
    type Store = Vec<T::Store>;

    fn write(s: &mut Stream, v: &Self) {
        let len = v.len() as i32;
        i32::write(s, &len);
        for item in v {
            T::write(s, item);
        }
    }

    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        let len = i32::read(s)?;
        if len < 0 {
            return Err(RpcError::protocol("negative vector length in RPC frame"));
        }
        let mut out = Vec::with_capacity(len.min(1 << 20) as usize);
        for _ in 0..len {
            out.push(T::read(s)?);
        }
        Ok(out)
    }
}

/// A raw byte blob -- the distinct "blob" wire representation `Any` uses,
/// kept separate from `Vec<u8>` so a generic `Vec<T: WireType>` impl and a
/// length-prefixed-bytes impl can coexist without overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

impl WireType for Blob {
    type Store = Blob;

    fn write(s: &mut Stream, v: &Self) {
        let len = v.0.len() as i32;
        i32::write(s, &len);
        s.write_bytes(&v.0);
    }

    fn read(s: &mut Stream) -> StreamResult<Self::Store> {
        let len = i32::read(s)?;
        if len < 0 {
            return Err(RpcError::protocol("negative blob length in RPC frame"));
        }
        Ok(Blob(s.read_bytes(len as usize)?.to_vec()))
    }
}

macro_rules! impl_wire_for_tuple {
    () => {};
    ($head:ident $($tail:ident)*) => {
        impl_wire_for_tuple!($($tail)*);

        #[allow(non_snake_case)]
        impl<$head: WireType, $($tail: WireType),*> WireType for ($head, $($tail,)*) {
            type Store = ($head::Store, $($tail::Store,)*);

            fn write(s: &mut Stream, v: &Self) {
                let ($head, $($tail,)*) = v;
                $head::write(s, $head);
                $($tail::write(s, $tail);)*
            }

            fn read(s: &mut Stream) -> StreamResult<Self::Store> {
                let $head = $head::read(s)?;
                $(let $tail = $tail::read(s)?;)*
                Ok(($head, $($tail,)*))
            }
        }
    };
}

impl_wire_for_tuple!(A B C D E F G H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_round_trip() {
        let mut s = Stream::new();
        i32::write(&mut s, &-42);
        u64::write(&mut s, &9_000_000_000);
        f32::write(&mut s, &3.5);
        bool::write(&mut s, &true);

        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(i32::read(&mut s).unwrap(), -42);
        assert_eq!(u64::read(&mut s).unwrap(), 9_000_000_000);
        assert_eq!(f32::read(&mut s).unwrap(), 3.5);
        assert!(bool::read(&mut s).unwrap());
    }

    #[test]
    fn string_round_trip() {
        let mut s = Stream::new();
        String::write(&mut s, &"hello rpc".to_string());
        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(String::read(&mut s).unwrap(), "hello rpc");
    }

    #[test]
    fn vector_round_trip() {
        let mut s = Stream::new();
        let v = vec![1i32, 2, 3];
        Vec::<i32>::write(&mut s, &v);
        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(Vec::<i32>::read(&mut s).unwrap(), v);
    }

    #[test]
    fn empty_vector_round_trip() {
        let mut s = Stream::new();
        let v: Vec<i32> = vec![];
        Vec::<i32>::write(&mut s, &v);
        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(Vec::<i32>::read(&mut s).unwrap(), v);
    }

    #[test]
    fn tuple_round_trip() {
        let mut s = Stream::new();
        let t = (1i32, "two".to_string(), 3.0f32);
        <(i32, String, f32)>::write(&mut s, &t);
        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(<(i32, String, f32)>::read(&mut s).unwrap(), t);
    }

    #[test]
    fn reading_past_end_is_protocol_error() {
        let mut s = Stream::new();
        i32::write(&mut s, &1);
        let mut s = Stream::from_vec(s.extract_buffer());
        let _ = i32::read(&mut s).unwrap();
        assert!(i32::read(&mut s).is_err());
    }

    #[test]
    fn blob_round_trip() {
        let mut s = Stream::new();
        let b = Blob(vec![1, 2, 3, 4]);
        Blob::write(&mut s, &b);
        let mut s = Stream::from_vec(s.extract_buffer());
        assert_eq!(Blob::read(&mut s).unwrap(), b);
    }
}
