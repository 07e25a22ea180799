// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Error taxonomy for the transport and RPC layers.

use std::io;

/// Errors surfaced by [`Port`](crate::port::Port) and [`Router`](crate::router::Router).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("peer closed the connection mid-message")]
    IncompleteMessage,

    #[error("read failed: {0}")]
    ReadFailed(#[source] io::Error),

    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("operation attempted on a closed or invalid file descriptor")]
    BadFileDescriptor,

    #[error("poll failed: {0}")]
    PollError(#[source] io::Error),

    #[error("message carries {0} handles, more than the {1} allowed")]
    TooManyHandles(usize, usize),

    #[error("unknown transport error: {0}")]
    Unknown(#[source] io::Error),
}

/// Errors that are fatal to a [`Channel`](crate::rpc::channel::Channel)'s
/// dispatch loop — peer protocol violations, as opposed to transport faults.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] PortError),

    #[error("could not decode rpc envelope: {0}")]
    Decode(String),

    #[error("dispatch to unknown object id {0}")]
    UnknownDestination(u64),
}
