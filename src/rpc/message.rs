// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The RPC envelope carried inside a transport [`Message`](crate::message::Message)'s
//! payload.
//!
//! Source and destination object ids plus an opcode are serialized ahead of
//! the call's own argument bytes, using the same [`Encode`]/[`Decode`]
//! machinery a stub uses for its arguments.

use crate::codec::{Decode, Deserializer, Encode, Serializer};
use crate::error::ChannelError;
use crate::handle::Handle;
use crate::rpc::object::ObjectId;

/// One RPC call or reply, addressed by object id rather than by port.
///
/// `handles` ride alongside the envelope at the transport layer; they are
/// not part of `payload`'s byte stream and are handed to the call's own
/// argument deserializer unchanged.
pub struct RpcMessage {
    pub source: ObjectId,
    pub destination: ObjectId,
    pub opcode: u64,
    pub payload: Vec<u8>,
    pub handles: Vec<Handle>,
}

impl RpcMessage {
    pub fn new(
        source: ObjectId,
        destination: ObjectId,
        opcode: u64,
        payload: Vec<u8>,
        handles: Vec<Handle>,
    ) -> RpcMessage {
        RpcMessage {
            source,
            destination,
            opcode,
            payload,
            handles,
        }
    }

    /// Serializes `source`, `destination`, `opcode` and then `payload` as a
    /// length-prefixed byte sequence, in that order. Handles are not encoded
    /// here; the caller attaches them to the outgoing transport message.
    pub fn encode(&self) -> Vec<u8> {
        let mut s = Serializer::new();
        self.source.encode(&mut s);
        self.destination.encode(&mut s);
        self.opcode.encode(&mut s);
        self.payload.encode(&mut s);
        s.get_payload()
    }

    /// Inverse of [`RpcMessage::encode`]. `handles` come from the transport
    /// message that carried `bytes` and are attached to the envelope as-is.
    pub fn decode(bytes: Vec<u8>, handles: Vec<Handle>) -> Result<RpcMessage, ChannelError> {
        let mut d = Deserializer::new(bytes, Vec::new());

        let source = u64::decode(&mut d).ok_or_else(|| ChannelError::Decode("source".into()))?;
        let destination =
            u64::decode(&mut d).ok_or_else(|| ChannelError::Decode("destination".into()))?;
        let opcode = u64::decode(&mut d).ok_or_else(|| ChannelError::Decode("opcode".into()))?;
        let payload =
            Vec::<u8>::decode(&mut d).ok_or_else(|| ChannelError::Decode("payload".into()))?;

        Ok(RpcMessage {
            source,
            destination,
            opcode,
            payload,
            handles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_with_handles_passed_through() {
        let original = RpcMessage::new(7, 9, 42, vec![0xAA, 0xBB, 0xCC], Vec::new());
        let encoded = original.encode();

        let decoded = RpcMessage::decode(encoded, Vec::new()).unwrap();
        assert_eq!(decoded.source, 7);
        assert_eq!(decoded.destination, 9);
        assert_eq!(decoded.opcode, 42);
        assert_eq!(decoded.payload, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn truncated_envelope_fails_to_decode() {
        assert!(RpcMessage::decode(vec![1, 2, 3], Vec::new()).is_err());
    }
}
