// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Tunables recognized by the transport layer.
//!
//! These are the only "configuration" the core understands: there is no
//! config file, no environment variable, and no runtime-settable option
//! beyond what a `Port` is constructed with.

/// Hard cap on the number of handles a single [`Message`](crate::message::Message)
/// may carry. Bounds the ancillary-data control buffer sized in [`Port`](crate::port::Port).
pub const MAX_HANDLES_PER_MESSAGE: usize = 128;

/// Maximum body chunk written/read per `send`/`recv` syscall on a stream
/// socket. Some kernels cap how much can ride alongside a control message in
/// a single call, so the body is drained in chunks no larger than this even
/// though the logical message is sent as one frame.
pub const MSG_MAX_SIZE: usize = 8 * 1024;

/// Upper bound accepted by the `Port` round-trip tests; not enforced at
/// runtime, just the property-test ceiling named in the testable properties.
#[cfg(test)]
pub const MAX_TESTED_PAYLOAD: usize = 64 * 1024 * 1024;
