// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Canonical binary encoding for RPC arguments and return values.
//!
//! Fixed-width primitives, `u64`-prefixed strings and sequences, a one-byte
//! presence tag for options, and — crucially — a deserializer whose cursor is
//! pinned to the end of the buffer the moment a read fails, so a truncated
//! message can never be partially accepted. Every multi-byte field goes
//! through `byteorder::NativeEndian` rather than hand-rolled `to_ne_bytes`
//! calls; native endianness is fine here since cross-architecture wire
//! compatibility is out of scope.

use byteorder::{ByteOrder, NativeEndian};

use crate::handle::Handle;

/// Growing byte buffer plus a side channel of OS handles collected while
/// encoding a call's arguments or results.
#[derive(Default)]
pub struct Serializer {
    data: Vec<u8>,
    handles: Vec<Handle>,
}

impl Serializer {
    pub fn new() -> Serializer {
        Serializer::default()
    }

    pub fn encode<T: Encode + ?Sized>(&mut self, value: &T) {
        value.encode(self);
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn push_handle(&mut self, handle: Handle) {
        self.handles.push(handle);
    }

    /// Moves the payload bytes out, leaving the serializer empty.
    pub fn get_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Moves the collected handles out, leaving the serializer empty.
    pub fn get_handles(&mut self) -> Vec<Handle> {
        std::mem::take(&mut self.handles)
    }
}

/// Immutable byte buffer plus cursor, and a handle list plus cursor.
pub struct Deserializer {
    data: Vec<u8>,
    cursor: usize,
    handles: Vec<Handle>,
    handle_cursor: usize,
}

impl Deserializer {
    pub fn new(data: Vec<u8>, handles: Vec<Handle>) -> Deserializer {
        Deserializer {
            data,
            cursor: 0,
            handles,
            handle_cursor: 0,
        }
    }

    pub fn decode<T: Decode>(&mut self) -> Option<T> {
        T::decode(self)
    }

    /// Reads `len` raw bytes, or fails and pins the cursor to the end.
    pub(crate) fn read_bytes(&mut self, len: usize) -> Option<&[u8]> {
        if self.cursor + len > self.data.len() {
            self.invalidate();
            return None;
        }

        let start = self.cursor;
        self.cursor += len;
        Some(&self.data[start..self.cursor])
    }

    fn invalidate(&mut self) {
        self.cursor = self.data.len();
    }

    /// Takes the next handle from the received handle list, in order.
    pub fn next_handle(&mut self) -> Option<Handle> {
        if self.handle_cursor >= self.handles.len() {
            return None;
        }

        // Handles are move-only and consumed at most once each; swap in a
        // placeholder by index shift instead of leaving a hole.
        let idx = self.handle_cursor;
        self.handle_cursor += 1;
        self.handles.drain(idx..idx + 1).next()
    }

    /// Returns whatever bytes remain unconsumed, without failing.
    pub fn get_remaining(&mut self) -> Vec<u8> {
        let remaining = self.data[self.cursor..].to_vec();
        self.cursor = self.data.len();
        remaining
    }
}

/// Implemented by every type the wire format can carry as an RPC argument or
/// return value.
pub trait Encode {
    fn encode(&self, s: &mut Serializer);
}

/// The decoding counterpart of [`Encode`]. Returns `None` on a short read;
/// callers must treat `None` as fatal to the whole decode (the cursor is
/// already pinned past recovery).
pub trait Decode: Sized {
    fn decode(d: &mut Deserializer) -> Option<Self>;
}

macro_rules! impl_codec_for_int {
    ($ty:ty, $write:ident, $read:ident, $size:expr) => {
        impl Encode for $ty {
            fn encode(&self, s: &mut Serializer) {
                let mut buf = [0u8; $size];
                NativeEndian::$write(&mut buf, *self);
                s.push_bytes(&buf);
            }
        }

        impl Decode for $ty {
            fn decode(d: &mut Deserializer) -> Option<$ty> {
                let bytes = d.read_bytes($size)?;
                Some(NativeEndian::$read(bytes))
            }
        }
    };
}

impl_codec_for_int!(u16, write_u16, read_u16, 2);
impl_codec_for_int!(u32, write_u32, read_u32, 4);
impl_codec_for_int!(u64, write_u64, read_u64, 8);
impl_codec_for_int!(i16, write_i16, read_i16, 2);
impl_codec_for_int!(i32, write_i32, read_i32, 4);
impl_codec_for_int!(i64, write_i64, read_i64, 8);

impl Encode for u8 {
    fn encode(&self, s: &mut Serializer) {
        s.push_bytes(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(d: &mut Deserializer) -> Option<u8> {
        d.read_bytes(1).map(|b| b[0])
    }
}

impl Encode for i8 {
    fn encode(&self, s: &mut Serializer) {
        s.push_bytes(&[*self as u8]);
    }
}

impl Decode for i8 {
    fn decode(d: &mut Deserializer) -> Option<i8> {
        d.read_bytes(1).map(|b| b[0] as i8)
    }
}

impl Encode for bool {
    fn encode(&self, s: &mut Serializer) {
        (*self as u8).encode(s);
    }
}

impl Decode for bool {
    fn decode(d: &mut Deserializer) -> Option<bool> {
        u8::decode(d).map(|b| b != 0)
    }
}

impl Encode for str {
    fn encode(&self, s: &mut Serializer) {
        (self.len() as u64).encode(s);
        s.push_bytes(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, s: &mut Serializer) {
        self.as_str().encode(s);
    }
}

impl Decode for String {
    fn decode(d: &mut Deserializer) -> Option<String> {
        let len = u64::decode(d)? as usize;
        let bytes = d.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, s: &mut Serializer) {
        (self.len() as u64).encode(s);
        for item in self {
            item.encode(s);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(d: &mut Deserializer) -> Option<Vec<T>> {
        let len = u64::decode(d)? as usize;
        let mut out = Vec::with_capacity(len.min(1024));

        for _ in 0..len {
            out.push(T::decode(d)?);
        }

        Some(out)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, s: &mut Serializer) {
        match self {
            Some(value) => {
                1u8.encode(s);
                value.encode(s);
            }
            None => 0u8.encode(s),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(d: &mut Deserializer) -> Option<Option<T>> {
        match u8::decode(d)? {
            0 => Some(None),
            _ => Some(Some(T::decode(d)?)),
        }
    }
}

// A handle is never in the byte stream: it travels in the message's handle
// list instead, so it has no `Encode`/`Decode` impl.
// Stub code moves one in with `Serializer::encode_handle` and pulls the next
// one out with `Deserializer::next_handle`.
impl Serializer {
    /// Moves `handle` into this message's handle list instead of the byte stream.
    pub fn encode_handle(&mut self, handle: Handle) {
        self.push_handle(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let mut s = Serializer::new();
        value.encode(&mut s);
        let payload = s.get_payload();
        let mut d = Deserializer::new(payload, Vec::new());
        let decoded = T::decode(&mut d).expect("decode should succeed");
        assert_eq!(value, decoded);
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(42u64);
        round_trip(-7i32);
        round_trip(true);
        round_trip(false);
    }

    #[test]
    fn string_round_trips() {
        round_trip("7253c09bd391db2cd370455fc64e520ac79fca31".to_string());
        round_trip(String::new());
    }

    #[test]
    fn sequence_round_trips() {
        round_trip(vec![1u32, 2, 3, 4, 5]);
        round_trip(Vec::<u8>::new());
    }

    #[test]
    fn option_round_trips() {
        round_trip(Some(99u16));
        round_trip(None::<u16>);
    }

    #[test]
    fn struct_like_concatenation_round_trips() {
        #[derive(Debug, PartialEq)]
        struct Point {
            x: i64,
            y: i64,
        }

        impl Encode for Point {
            fn encode(&self, s: &mut Serializer) {
                self.x.encode(s);
                self.y.encode(s);
            }
        }

        impl Decode for Point {
            fn decode(d: &mut Deserializer) -> Option<Point> {
                Some(Point {
                    x: i64::decode(d)?,
                    y: i64::decode(d)?,
                })
            }
        }

        round_trip(Point { x: -1, y: 2 });
    }

    #[test]
    fn short_read_invalidates_cursor_for_subsequent_reads() {
        let mut d = Deserializer::new(vec![1, 2, 3], Vec::new());

        // Asking for a u64 out of a 3-byte buffer fails...
        assert!(u64::decode(&mut d).is_none());

        // ...and the cursor is pinned at the end, so a trivially small read
        // that would otherwise succeed also fails.
        assert!(u8::decode(&mut d).is_none());
    }
}
