// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-process object registry and synchronous request/response dispatcher
//! built on top of [`crate::port`] and [`crate::router`].

pub mod channel;
pub mod message;
pub mod object;

pub use channel::Channel;
pub use message::RpcMessage;
pub use object::{ObjectId, Proxy, Receiver};
