// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-process object registry and message dispatcher.
//!
//! Receiving a message decodes an envelope and swaps its source/destination
//! so a receiver always sees "destination is the peer, source is me";
//! `send_request` sends and then loops over incoming traffic inline,
//! requeuing anything that isn't the reply it's waiting for; `run` drains
//! that queue by dispatching to the bound receiver. The port and the rest of
//! the channel's state sit behind two separate locks, so a blocking
//! `Channel::run` parked on its own thread — which spends essentially all of
//! its time inside the port's `receive` — never blocks a
//! [`Proxy`](crate::rpc::object::Proxy) on another thread from binding a new
//! receiver or issuing its own request.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ChannelError, PortError};
use crate::message::Message;
use crate::port::Port;
use crate::router::PortId;
use crate::rpc::message::RpcMessage;
use crate::rpc::object::{ObjectId, Proxy, Receiver};

struct PendingRpcMessage {
    source_port: PortId,
    destination_object: ObjectId,
    message: RpcMessage,
}

struct ChannelState {
    next_id: ObjectId,
    allocated_ids: HashSet<ObjectId>,
    receivers: HashMap<ObjectId, Box<dyn Receiver>>,
    queue: VecDeque<PendingRpcMessage>,
}

fn allocate_id(state: &mut ChannelState) -> ObjectId {
    loop {
        let candidate = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        if state.allocated_ids.insert(candidate) {
            return candidate;
        }
    }
}

struct ChannelInner {
    port_id: PortId,
    port: Mutex<Port>,
    state: Mutex<ChannelState>,
}

/// Owns one [`Port`] and the local objects reachable through it.
///
/// Cheap to clone: every clone shares the same underlying state, which is
/// how a [`Proxy`] keeps a live reference to the channel that created it,
/// and how a caller can hand one clone to a background thread running
/// [`Channel::run`] while keeping another to issue requests from. The port
/// and the registry/queue state lock independently, so a clone blocked
/// inside `run`'s receive never holds up a clone doing `bind` or `connect`.
#[derive(Clone)]
pub struct Channel(Arc<ChannelInner>);

impl Channel {
    pub fn new(port_id: PortId, port: Port) -> Channel {
        Channel(Arc::new(ChannelInner {
            port_id,
            port: Mutex::new(port),
            state: Mutex::new(ChannelState {
                next_id: 0,
                allocated_ids: HashSet::new(),
                receivers: HashMap::new(),
                queue: VecDeque::new(),
            }),
        }))
    }

    pub fn port_id(&self) -> PortId {
        self.0.port_id
    }

    /// Allocates an object id and binds `make(id)` as its receiver.
    pub fn bind<T, F>(&self, make: F) -> ObjectId
    where
        T: Receiver + 'static,
        F: FnOnce(ObjectId) -> T,
    {
        let mut state = self.state();
        let id = allocate_id(&mut state);
        let receiver = make(id);
        state.receivers.insert(id, Box::new(receiver));
        log::debug!("channel {}: bound receiver {id}", self.port_id());
        id
    }

    /// Binds `make(id)` under a caller-chosen id, e.g. a well-known root
    /// object both ends agree on in advance. Overwrites any existing
    /// receiver at `id`.
    pub fn bind_static<T, F>(&self, id: ObjectId, make: F)
    where
        T: Receiver + 'static,
        F: FnOnce(ObjectId) -> T,
    {
        let mut state = self.state();
        state.allocated_ids.insert(id);
        let receiver = make(id);
        state.receivers.insert(id, Box::new(receiver));
        log::debug!("channel {}: bound static receiver {id}", self.port_id());
    }

    /// Allocates a local id and returns a [`Proxy`] addressing
    /// `remote_object` on the channel reachable through `remote_port`.
    pub fn connect(&self, remote_port: PortId, remote_object: ObjectId) -> Proxy {
        let local_id = allocate_id(&mut self.state());
        Proxy::new(self.clone(), local_id, remote_port, remote_object)
    }

    /// Fire-and-forget send. Returns `false` if the transport send failed.
    pub fn send_message(&self, remote_port: PortId, msg: RpcMessage) -> bool {
        self.encode_and_send(remote_port, msg).is_ok()
    }

    /// Sends `msg` and blocks until the matching reply arrives, requeuing
    /// any other traffic received in the meantime for a later [`Channel::run`].
    pub fn send_request(
        &self,
        remote_port: PortId,
        msg: RpcMessage,
    ) -> Result<RpcMessage, ChannelError> {
        let expected_destination = msg.destination;
        let expected_opcode = msg.opcode;

        log::debug!(
            "channel {}: send_request to port {remote_port} destination={expected_destination} opcode={expected_opcode}, waiting for reply",
            self.port_id()
        );

        self.encode_and_send(remote_port, msg)
            .map_err(ChannelError::Transport)?;

        loop {
            let pending = self.next_message()?;

            if pending.message.destination == expected_destination
                && pending.message.opcode == expected_opcode
                && pending.source_port == remote_port
            {
                log::debug!(
                    "channel {}: send_request to port {remote_port} opcode={expected_opcode} got its reply",
                    self.port_id()
                );
                return Ok(pending.message);
            }

            self.state().queue.push_back(pending);
        }
    }

    /// Blocks forever, receiving and dispatching messages to bound
    /// receivers. Returns a [`ChannelError`] only on a fatal transport or
    /// protocol error; there is no way to stop a running channel except by
    /// closing its port from another thread.
    pub fn run(&self) -> Result<(), ChannelError> {
        log::debug!("channel {}: run loop starting", self.port_id());
        loop {
            let pending = self.next_message()?;
            self.state().queue.push_back(pending);
            self.drain_queue()?;
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.0.state.lock().expect("channel state mutex poisoned by a prior panic")
    }

    fn drain_queue(&self) -> Result<(), ChannelError> {
        loop {
            let pending = match self.state().queue.pop_front() {
                Some(p) => p,
                None => return Ok(()),
            };

            let destination_object = pending.destination_object;
            let mut receiver = match self.state().receivers.remove(&destination_object) {
                Some(r) => r,
                None => return Err(ChannelError::UnknownDestination(destination_object)),
            };

            // Dropped while the receiver runs, so a nested send_message or
            // send_request from within on_message can lock us again.
            receiver.on_message(self, destination_object, pending.source_port, pending.message);

            self.state().receivers.insert(destination_object, receiver);
        }
    }

    fn encode_and_send(&self, remote_port: PortId, msg: RpcMessage) -> Result<(), PortError> {
        let bytes = msg.encode();
        let transport_msg = Message::new(remote_port, 0, bytes, msg.handles);
        self.0.port.lock().expect("channel port mutex poisoned by a prior panic").send(transport_msg)
    }

    fn next_message(&self) -> Result<PendingRpcMessage, ChannelError> {
        let transport_msg = {
            let mut port = self.0.port.lock().expect("channel port mutex poisoned by a prior panic");
            port.receive().map_err(ChannelError::Transport)?
        };

        let source_port = transport_msg.destination;
        let mut envelope = RpcMessage::decode(transport_msg.payload, transport_msg.handles)?;

        // Swap so the receiver sees "destination is me, source is the peer".
        let destination_object = envelope.destination;
        envelope.destination = envelope.source;
        envelope.source = destination_object;

        Ok(PendingRpcMessage {
            source_port,
            destination_object,
            message: envelope,
        })
    }
}
