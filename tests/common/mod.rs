// Shared fixtures for the integration tests: a router wiring two channels
// together, and a hand-written ping/echo stub standing in for what a
// generator would emit from an interface definition.

use std::thread;

use protorpc::codec::{Decode, Deserializer, Encode, Serializer};
use protorpc::{Channel, ObjectId, Port, PortId, Proxy, Receiver, Router, RpcMessage, SocketKind};

pub const OPCODE_PING: u64 = 42;

pub struct PingReceiver;

impl Receiver for PingReceiver {
    fn on_message(
        &mut self,
        channel: &Channel,
        self_object_id: ObjectId,
        source_port: PortId,
        msg: RpcMessage,
    ) {
        if msg.opcode != OPCODE_PING {
            return;
        }

        let mut d = Deserializer::new(msg.payload, Vec::new());
        let text: String = d.decode().expect("ping argument should decode");

        let mut s = Serializer::new();
        s.encode(&text);

        let reply = RpcMessage::new(
            self_object_id,
            msg.destination,
            OPCODE_PING,
            s.get_payload(),
            Vec::new(),
        );
        channel.send_message(source_port, reply);
    }
}

pub struct PingProxy(pub Proxy);

impl PingProxy {
    pub fn ping(&self, text: &str) -> String {
        let mut s = Serializer::new();
        s.encode(text);

        let reply = self
            .0
            .send_request(OPCODE_PING, s.get_payload(), Vec::new())
            .expect("ping should succeed");

        let mut d = Deserializer::new(reply.payload, Vec::new());
        d.decode().expect("reply should decode")
    }
}

/// Wires a `Router` forwarding between two fresh port pairs, starts it on a
/// background thread, and returns a `Channel` for each side.
pub fn spawn_router_and_channels() -> (Channel, Channel) {
    let (router_side_a, client_a) = Port::create_pair(SocketKind::Datagram).unwrap();
    let (router_side_b, client_b) = Port::create_pair(SocketKind::Datagram).unwrap();

    let mut router = Router::new().unwrap();
    let a = router.add_port(router_side_a).unwrap();
    let b = router.add_port(router_side_b).unwrap();

    thread::spawn(move || {
        let _ = router.run();
    });

    let channel_1 = Channel::new(a, client_a);
    let channel_2 = Channel::new(b, client_b);

    (channel_1, channel_2)
}
