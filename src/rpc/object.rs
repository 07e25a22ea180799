// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Base contracts every generated stub builds on.
//!
//! A receiver is addressed by id and dispatched to by the owning channel; a
//! proxy is a handle to a remote object that knows how to reach it. Receivers
//! are a trait, so a bound object can hold arbitrary state; proxies are a
//! plain struct that generated stubs wrap rather than inherit from.

use crate::error::ChannelError;
use crate::handle::Handle;
use crate::router::PortId;
use crate::rpc::channel::Channel;
use crate::rpc::message::RpcMessage;

/// Identifies an object within a single [`Channel`]'s registry.
pub type ObjectId = u64;

/// Implemented by a type bound into a channel to receive incoming calls.
///
/// `self_object_id` is the id the receiver was bound under; `source_port` is
/// the port the call arrived on (after the router's rewrite, this is the
/// caller's own port id, the right address for a reply). `msg.destination`
/// carries the caller's object id — a stub replies by building an
/// [`RpcMessage`] addressed back to it and calling
/// [`Channel::send_message`] on `source_port`.
pub trait Receiver: Send {
    fn on_message(
        &mut self,
        channel: &Channel,
        self_object_id: ObjectId,
        source_port: PortId,
        msg: RpcMessage,
    );
}

/// A handle to a remote object, reachable through the [`Channel`] that
/// created it.
///
/// Generated stubs wrap a `Proxy` and add typed methods that serialize
/// arguments, call [`Proxy::send_message`] or [`Proxy::send_request`], and
/// deserialize the result.
#[derive(Clone)]
pub struct Proxy {
    channel: Channel,
    local_id: ObjectId,
    remote_port: PortId,
    remote_object: ObjectId,
}

impl Proxy {
    pub(crate) fn new(
        channel: Channel,
        local_id: ObjectId,
        remote_port: PortId,
        remote_object: ObjectId,
    ) -> Proxy {
        Proxy {
            channel,
            local_id,
            remote_port,
            remote_object,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.local_id
    }

    pub fn remote_port(&self) -> PortId {
        self.remote_port
    }

    pub fn remote_object(&self) -> ObjectId {
        self.remote_object
    }

    /// Fire-and-forget call. Returns `false` if the underlying transport
    /// send failed; no reply will ever arrive for it.
    pub fn send_message(&self, opcode: u64, payload: Vec<u8>, handles: Vec<Handle>) -> bool {
        let msg = RpcMessage::new(self.local_id, self.remote_object, opcode, payload, handles);
        self.channel.send_message(self.remote_port, msg)
    }

    /// Blocking call: sends `payload` and waits for the matching reply,
    /// dispatching any unrelated traffic that arrives in the meantime.
    pub fn send_request(
        &self,
        opcode: u64,
        payload: Vec<u8>,
        handles: Vec<Handle>,
    ) -> Result<RpcMessage, ChannelError> {
        let msg = RpcMessage::new(self.local_id, self.remote_object, opcode, payload, handles);
        self.channel.send_request(self.remote_port, msg)
    }
}
