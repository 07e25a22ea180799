// S4 — ping/pong proxy: a receiver bound in one channel echoes its
// argument on opcode 42; a proxy in another channel, reachable only through
// a Router, calls it and gets the same string back.

mod common;

use common::{spawn_router_and_channels, PingProxy, PingReceiver};

#[test]
fn ping_pong_across_a_router() {
    let _ = env_logger::try_init();

    let (channel_1, channel_2) = spawn_router_and_channels();

    let receiver_id = channel_2.bind(|_id| PingReceiver);

    let channel_2_bg = channel_2.clone();
    std::thread::spawn(move || {
        let _ = channel_2_bg.run();
    });

    let proxy = PingProxy(channel_1.connect(channel_2.port_id(), receiver_id));
    let reply = proxy.ping("7253c09bd391db2cd370455fc64e520ac79fca31");

    assert_eq!(reply, "7253c09bd391db2cd370455fc64e520ac79fca31");
}
