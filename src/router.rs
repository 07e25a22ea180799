// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Central forwarding node multiplexing many [`Port`]s.
//!
//! A single poll-driven loop rewrites `destination := src_id` on every
//! forwarded message, so the receiver always knows who to reply to, and
//! silently drops messages aimed at an unknown destination. Multiplexing
//! is built on `mio::Poll` rather than a hand-rolled `epoll_wait` loop.

use std::collections::HashMap;
use std::io;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::error::PortError;
use crate::port::Port;

pub type PortId = u64;

/// Owns every [`Port`] handed to it and forwards messages between them by
/// destination id.
pub struct Router {
    poll: Poll,
    ports: HashMap<PortId, Port>,
    next_port_id: PortId,
}

impl Router {
    pub fn new() -> Result<Router, PortError> {
        let poll = Poll::new().map_err(PortError::PollError)?;

        Ok(Router {
            poll,
            ports: HashMap::new(),
            next_port_id: 0,
        })
    }

    /// Assigns a new id, arms the poll set for readable events, and takes
    /// ownership of `port`.
    pub fn add_port(&mut self, port: Port) -> Result<PortId, PortError> {
        let id = self.next_port_id;
        self.next_port_id += 1;

        let fd = port.handle();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(id as usize), Interest::READABLE)
            .map_err(PortError::PollError)?;

        self.ports.insert(id, port);
        log::debug!("router: added port {id}");

        Ok(id)
    }

    /// Disarms the poll set and closes the port. Returns `false` if `id` is
    /// unknown.
    pub fn remove_port(&mut self, id: PortId) -> bool {
        match self.ports.remove(&id) {
            Some(mut port) => {
                let fd = port.handle();
                let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                port.close();
                log::debug!("router: removed port {id}");
                true
            }
            None => false,
        }
    }

    /// Blocks forever, forwarding messages. Returns a [`PortError`] only on
    /// unrecoverable poll or transport error; an unknown destination just
    /// drops the offending message.
    pub fn run(&mut self) -> Result<(), PortError> {
        let mut events = Events::with_capacity(16);

        loop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PortError::PollError(e)),
            }

            // Service every port reported ready by this batch before blocking again.
            let ready: Vec<PortId> = events.iter().map(|ev| ev.token().0 as PortId).collect();

            for src_id in ready {
                self.forward_one(src_id)?;
            }
        }
    }

    fn forward_one(&mut self, src_id: PortId) -> Result<(), PortError> {
        let mut message = match self.ports.get_mut(&src_id) {
            Some(source) => source.receive()?,
            // Port was removed between the poll batch and now.
            None => return Ok(()),
        };

        let dst_id = message.destination;
        message.destination = src_id;

        match self.ports.get_mut(&dst_id) {
            Some(dest) => {
                if dest.send(message).is_err() {
                    log::debug!("router: dropping message, send to port {dst_id} failed");
                }
            }
            None => {
                log::debug!("router: dropping message to unknown port {dst_id}");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::port::SocketKind;

    #[test]
    fn forwards_and_rewrites_destination() {
        let (router_side_a, client_a) = Port::create_pair(SocketKind::Datagram).unwrap();
        let (router_side_b, client_b) = Port::create_pair(SocketKind::Datagram).unwrap();

        let mut router = Router::new().unwrap();
        let a = router.add_port(router_side_a).unwrap();
        let b = router.add_port(router_side_b).unwrap();

        let mut client_a = client_a;
        let mut client_b = client_b;

        client_a
            .send(Message::new(b, 0, vec![0x41, 0x42, 0x43], Vec::new()))
            .unwrap();

        // Drive exactly one forwarding step without blocking the test forever.
        router.forward_one(a).unwrap();

        let received = client_b.receive().unwrap();
        assert_eq!(received.destination, a);
        assert_eq!(received.payload, vec![0x41, 0x42, 0x43]);
    }

    #[test]
    fn drops_message_to_unknown_destination() {
        let (router_side_a, client_a) = Port::create_pair(SocketKind::Datagram).unwrap();

        let mut router = Router::new().unwrap();
        let a = router.add_port(router_side_a).unwrap();

        let mut client_a = client_a;
        client_a
            .send(Message::new(9999, 0, vec![1, 2, 3], Vec::new()))
            .unwrap();

        // Must not error: unknown destination is dropped, not fatal.
        router.forward_one(a).unwrap();
    }

    #[test]
    fn remove_unknown_port_returns_false() {
        let mut router = Router::new().unwrap();
        assert!(!router.remove_port(42));
    }
}
