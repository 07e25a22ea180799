// Copyright 2024 protorpc contributors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Framed, handle-carrying local socket.
//!
//! A message is framed as a fixed 32-byte header — payload size, handle
//! count, destination, opcode, all native-endian `u64`s — followed by the
//! payload bytes. Ancillary data (`SCM_RIGHTS`) only ever travels alongside
//! the header, never the body, so a stream socket's chunked body reads never
//! need to touch the control buffer.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use byteorder::{ByteOrder, NativeEndian};
use nix::errno::Errno;
use nix::sys::socket::{
    self, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags, SockFlag, SockType,
    UnixAddr,
};

use crate::config::{MAX_HANDLES_PER_MESSAGE, MSG_MAX_SIZE};
use crate::error::PortError;
use crate::handle::Handle;
use crate::message::Message;

const HEADER_LEN: usize = 32;

/// Which wire path a [`Port`] uses: datagram is primary, stream is the
/// fallback for transports that don't preserve message boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Datagram,
    Stream,
}

/// One end of a connected local socket, framing whole [`Message`]s.
///
/// A `Port` exclusively owns its fd: dropping it, or calling [`Port::close`],
/// closes the underlying socket.
pub struct Port {
    fd: Option<OwnedFd>,
    kind: SocketKind,
}

impl Port {
    /// Wraps an already-connected fd. The `Port` takes ownership of it.
    pub fn new(fd: OwnedFd, kind: SocketKind) -> Port {
        Port {
            fd: Some(fd),
            kind,
        }
    }

    /// Creates a connected pair of local-domain sockets of the given kind.
    pub fn create_pair(kind: SocketKind) -> Result<(Port, Port), PortError> {
        let sock_type = match kind {
            SocketKind::Datagram => SockType::Datagram,
            SocketKind::Stream => SockType::Stream,
        };

        let (a, b) = socket::socketpair(AddressFamily::Unix, sock_type, None, SockFlag::empty())
            .map_err(|e| PortError::Unknown(e.into()))?;

        Ok((Port::new(a, kind), Port::new(b, kind)))
    }

    /// Returns the raw fd for polling. Non-owning: the caller must not close it.
    pub fn handle(&self) -> RawFd {
        self.raw_fd()
    }

    fn raw_fd(&self) -> RawFd {
        self.fd
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .unwrap_or(-1)
    }

    fn fd_or_closed(&self) -> Result<RawFd, PortError> {
        match &self.fd {
            Some(fd) => Ok(fd.as_raw_fd()),
            None => Err(PortError::BadFileDescriptor),
        }
    }

    /// Releases the fd. Idempotent: calling it again is a no-op.
    pub fn close(&mut self) {
        self.fd.take();
    }

    /// Atomically enqueues one [`Message`]. On success the caller relinquishes
    /// ownership of every handle in `msg.handles`.
    pub fn send(&mut self, msg: Message) -> Result<(), PortError> {
        log::trace!(
            "port {:?}: send destination={} opcode={} payload_len={} handles={}",
            self.raw_fd(),
            msg.destination,
            msg.opcode,
            msg.payload.len(),
            msg.handles.len()
        );

        if msg.handles.len() > MAX_HANDLES_PER_MESSAGE {
            return Err(PortError::TooManyHandles(
                msg.handles.len(),
                MAX_HANDLES_PER_MESSAGE,
            ));
        }

        let fd = self.fd_or_closed()?;
        let header = encode_header(
            msg.payload.len() as u64,
            msg.handles.len() as u64,
            msg.destination,
            msg.opcode,
        );

        let raw_fds: Vec<RawFd> = msg.handles.iter().map(|h| h.as_raw_fd()).collect();
        let cmsgs: Vec<ControlMessage> = if raw_fds.is_empty() {
            Vec::new()
        } else {
            vec![ControlMessage::ScmRights(&raw_fds)]
        };

        match self.kind {
            SocketKind::Datagram => {
                let iov = [IoSlice::new(&header), IoSlice::new(&msg.payload)];
                send_retrying(|| {
                    socket::sendmsg::<UnixAddr>(fd, &iov, &cmsgs, MsgFlags::empty(), None)
                })?;
            }
            SocketKind::Stream => {
                let iov = [IoSlice::new(&header)];
                send_retrying(|| {
                    socket::sendmsg::<UnixAddr>(fd, &iov, &cmsgs, MsgFlags::empty(), None)
                })?;
                send_body_chunked(fd, &msg.payload)?;
            }
        }

        // The kernel has duplicated every handle to the peer; we must not
        // close our originals ourselves, so let them leak out of this scope
        // without running their Drop.
        for h in msg.handles {
            std::mem::forget(h);
        }

        log::trace!("port {:?}: send complete", self.raw_fd());

        Ok(())
    }

    /// Reads exactly one [`Message`]. Blocks until one is available.
    pub fn receive(&mut self) -> Result<Message, PortError> {
        let fd = self.fd_or_closed()?;

        log::trace!("port {fd:?}: receive blocking");

        let result = match self.kind {
            SocketKind::Datagram => self.receive_datagram(fd),
            SocketKind::Stream => self.receive_stream(fd),
        };

        match &result {
            Ok(msg) => log::trace!(
                "port {fd:?}: received destination={} opcode={} payload_len={}",
                msg.destination,
                msg.opcode,
                msg.payload.len()
            ),
            Err(e) => log::debug!("port {fd:?}: receive failed: {e}"),
        }

        result
    }

    fn receive_datagram(&mut self, fd: RawFd) -> Result<Message, PortError> {
        // First, peek the header without requesting ancillary data: peeking
        // a message that carries SCM_RIGHTS still dup()s the descriptors
        // into this process on every call, so we must not ask for control
        // data until the read that actually consumes the datagram.
        let mut peek_buf = [0u8; HEADER_LEN];
        let mut peek_iov = [IoSliceMut::new(&mut peek_buf)];
        let peeked = recv_retrying(|| {
            socket::recvmsg::<UnixAddr>(fd, &mut peek_iov, None, MsgFlags::MSG_PEEK)
        })?;

        if peeked.bytes == 0 {
            return Err(PortError::IncompleteMessage);
        }
        if peeked.bytes < HEADER_LEN {
            return Err(PortError::IncompleteMessage);
        }

        let (payload_size, handle_count, destination, opcode) = decode_header(&peek_buf);
        check_handle_count(handle_count)?;

        let mut header_buf = [0u8; HEADER_LEN];
        let mut payload = vec![0u8; payload_size as usize];
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_HANDLES_PER_MESSAGE]);

        let received = {
            let mut iov = [
                IoSliceMut::new(&mut header_buf),
                IoSliceMut::new(&mut payload),
            ];
            recv_retrying(|| {
                socket::recvmsg::<UnixAddr>(
                    fd,
                    &mut iov,
                    Some(&mut cmsg_space),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
            })?
        };

        if received.bytes < HEADER_LEN {
            return Err(PortError::IncompleteMessage);
        }

        let handles = collect_handles(received.cmsgs());

        Ok(Message::new(destination, opcode, payload, handles))
    }

    fn receive_stream(&mut self, fd: RawFd) -> Result<Message, PortError> {
        let mut header_buf = [0u8; HEADER_LEN];
        let mut cmsg_space = nix::cmsg_space!([RawFd; MAX_HANDLES_PER_MESSAGE]);
        let mut handles = Vec::new();
        let mut read = 0usize;

        while read < HEADER_LEN {
            let mut iov = [IoSliceMut::new(&mut header_buf[read..])];
            let msg = recv_retrying(|| {
                socket::recvmsg::<UnixAddr>(
                    fd,
                    &mut iov,
                    Some(&mut cmsg_space),
                    MsgFlags::MSG_CMSG_CLOEXEC,
                )
            })?;

            if msg.bytes == 0 {
                return Err(PortError::IncompleteMessage);
            }

            if handles.is_empty() {
                handles = collect_handles(msg.cmsgs());
            }

            read += msg.bytes;
        }

        let (payload_size, handle_count, destination, opcode) = decode_header(&header_buf);
        check_handle_count(handle_count)?;

        let payload = recv_body_chunked(fd, payload_size as usize)?;

        Ok(Message::new(destination, opcode, payload, handles))
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_handle_count(count: u64) -> Result<(), PortError> {
    if count as usize > MAX_HANDLES_PER_MESSAGE {
        Err(PortError::TooManyHandles(
            count as usize,
            MAX_HANDLES_PER_MESSAGE,
        ))
    } else {
        Ok(())
    }
}

fn collect_handles(cmsgs: impl Iterator<Item = ControlMessageOwned>) -> Vec<Handle> {
    cmsgs
        .filter_map(|cmsg| match cmsg {
            ControlMessageOwned::ScmRights(fds) => Some(fds),
            _ => None,
        })
        .flatten()
        .map(|fd| unsafe { Handle::from_raw_fd(fd) })
        .collect()
}

fn encode_header(payload_size: u64, handle_count: u64, destination: u64, opcode: u64) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    NativeEndian::write_u64(&mut buf[0..8], payload_size);
    NativeEndian::write_u64(&mut buf[8..16], handle_count);
    NativeEndian::write_u64(&mut buf[16..24], destination);
    NativeEndian::write_u64(&mut buf[24..32], opcode);
    buf
}

fn decode_header(buf: &[u8; HEADER_LEN]) -> (u64, u64, u64, u64) {
    let payload_size = NativeEndian::read_u64(&buf[0..8]);
    let handle_count = NativeEndian::read_u64(&buf[8..16]);
    let destination = NativeEndian::read_u64(&buf[16..24]);
    let opcode = NativeEndian::read_u64(&buf[24..32]);
    (payload_size, handle_count, destination, opcode)
}

fn send_body_chunked(fd: RawFd, data: &[u8]) -> Result<(), PortError> {
    let mut written = 0usize;

    while written < data.len() {
        let remaining = &data[written..];
        let chunk = &remaining[..remaining.len().min(MSG_MAX_SIZE)];

        let n = loop {
            match socket::send(fd, chunk, MsgFlags::empty()) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(Errno::EBADF) => return Err(PortError::BadFileDescriptor),
                Err(e) => return Err(PortError::WriteFailed(e.into())),
            }
        };

        written += n;
    }

    Ok(())
}

fn recv_body_chunked(fd: RawFd, payload_size: usize) -> Result<Vec<u8>, PortError> {
    let mut buffer = vec![0u8; payload_size];
    let mut read = 0usize;

    while read < payload_size {
        let remaining = &mut buffer[read..];
        let chunk_len = remaining.len().min(MSG_MAX_SIZE);

        let n = loop {
            match socket::recv(fd, &mut remaining[..chunk_len], MsgFlags::empty()) {
                Ok(n) => break n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PortError::ReadFailed(e.into())),
            }
        };

        if n == 0 {
            return Err(PortError::IncompleteMessage);
        }

        read += n;
    }

    Ok(buffer)
}

fn send_retrying<F, T>(mut f: F) -> Result<T, PortError>
where
    F: FnMut() -> nix::Result<T>,
{
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(Errno::EINTR) => continue,
            Err(Errno::EBADF) => return Err(PortError::BadFileDescriptor),
            Err(e) => return Err(PortError::WriteFailed(e.into())),
        }
    }
}

fn recv_retrying<F, T>(mut f: F) -> Result<T, PortError>
where
    F: FnMut() -> nix::Result<T>,
{
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(Errno::EINTR) => continue,
            Err(Errno::EBADF) => return Err(PortError::BadFileDescriptor),
            Err(e) => return Err(PortError::ReadFailed(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_message_round_trip_datagram() {
        let (mut a, mut b) = Port::create_pair(SocketKind::Datagram).unwrap();

        let sent = Message::new(78, 42, vec![0x41u8; 123], Vec::new());
        a.send(sent).unwrap();

        let received = b.receive().unwrap();
        assert_eq!(received.destination, 78);
        assert_eq!(received.opcode, 42);
        assert_eq!(received.payload, vec![0x41u8; 123]);
        assert!(received.handles.is_empty());
    }

    #[test]
    fn small_message_round_trip_stream() {
        let (mut a, mut b) = Port::create_pair(SocketKind::Stream).unwrap();

        let sent = Message::new(5, 9, b"hello stream".to_vec(), Vec::new());
        a.send(sent).unwrap();

        let received = b.receive().unwrap();
        assert_eq!(received.destination, 5);
        assert_eq!(received.opcode, 9);
        assert_eq!(received.payload, b"hello stream");
    }

    #[test]
    fn large_payload_round_trip() {
        let (mut a, mut b) = Port::create_pair(SocketKind::Stream).unwrap();

        let payload = vec![0xFEu8; 50 * 1024 * 1024];
        let sent = Message::new(1, 2, payload.clone(), Vec::new());
        a.send(sent).unwrap();

        let received = b.receive().unwrap();
        assert_eq!(received.payload, payload);
    }

    #[test]
    fn too_many_handles_rejected_on_send() {
        let (mut a, _b) = Port::create_pair(SocketKind::Datagram).unwrap();

        let handles: Vec<Handle> = (0..MAX_HANDLES_PER_MESSAGE + 1)
            .map(|_| unsafe { Handle::from_raw_fd(libc_dup_stdin()) })
            .collect();

        let msg = Message::new(0, 0, Vec::new(), handles);
        let err = a.send(msg).unwrap_err();
        assert!(matches!(err, PortError::TooManyHandles(_, _)));
    }

    fn libc_dup_stdin() -> RawFd {
        nix::unistd::dup(0).unwrap()
    }

    #[test]
    fn close_is_idempotent() {
        let (mut a, _b) = Port::create_pair(SocketKind::Datagram).unwrap();
        a.close();
        a.close();
    }
}
