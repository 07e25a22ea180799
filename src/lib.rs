// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Inter-process RPC substrate over local, handle-carrying sockets.
//!
//! Three layers, built bottom-up:
//!
//! - [`port`] frames messages (with handles riding alongside the bytes) over
//!   one datagram or stream Unix-domain socket.
//! - [`router`] multiplexes many ports in one process, forwarding by
//!   destination id and rewriting it to the sender's id so replies know
//!   where to go.
//! - [`rpc`] turns a `Port` into a per-process object registry with a
//!   synchronous request/response call convention, built on [`codec`]'s
//!   binary encoding.

pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod message;
pub mod port;
pub mod router;
pub mod rpc;

pub use codec::{Decode, Deserializer, Encode, Serializer};
pub use error::{ChannelError, PortError};
pub use handle::Handle;
pub use message::Message;
pub use port::{Port, SocketKind};
pub use router::{PortId, Router};
pub use rpc::{Channel, ObjectId, Proxy, Receiver, RpcMessage};
