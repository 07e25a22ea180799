// S6 — handle passing: a parent process holds a socket pair (X, Y). It
// sends Y as a handle over a Port to a child process, then writes
// 0xDEADBEEF through X. The child, after receiving the handle, reads it
// through its own duplicate of Y and sees the same bytes.

use std::os::fd::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixDatagram;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

use protorpc::{Handle, Message, Port, SocketKind};

#[test]
fn handle_crosses_a_port_and_carries_live_data() {
    let _ = env_logger::try_init();

    let (x, y) = socketpair(
        AddressFamily::Unix,
        SockType::Datagram,
        None,
        SockFlag::empty(),
    )
    .unwrap();
    let x = unsafe { UnixDatagram::from_raw_fd(x.into_raw_fd()) };

    let (mut parent, mut child) = Port::create_pair(SocketKind::Datagram).unwrap();

    parent
        .send(Message::new(0, 0, Vec::new(), vec![Handle::from_owned_fd(y)]))
        .unwrap();

    let mut received = child.receive().unwrap();
    let received_y = received
        .handles
        .pop()
        .expect("the handle should have crossed with the message");

    let received_y = unsafe { UnixDatagram::from_raw_fd(received_y.into_raw_fd()) };

    x.send(&0xDEADBEEFu32.to_ne_bytes()).unwrap();

    let mut buf = [0u8; 4];
    let n = received_y.recv(&mut buf).unwrap();

    assert_eq!(n, 4);
    assert_eq!(u32::from_ne_bytes(buf), 0xDEADBEEF);
}
