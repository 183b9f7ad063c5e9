//! Gateway smoke test over real UDP sockets: a legacy peer's heartbeat is
//! forwarded to the flight controller peer through a spinning pipeline.

use std::net::UdpSocket;
use std::thread;
use std::time::Duration;

use mavlink_gateway::codec::{Heartbeat, MAX_FRAME_LEN};
use mavlink_gateway::pipeline::Pipeline;
use mavlink_gateway::transport::{hook_udp, SinkId, SourceId, UdpConfig};

/// Ports derived from the pid keep parallel test runs from colliding.
fn test_ports() -> (u16, u16) {
    let base = 17000 + (std::process::id() % 2000) as u16;
    (base, base + 2000)
}

#[test]
fn legacy_heartbeat_forwards_to_vmc_peer() {
    let (vmc_port, legacy_port) = test_ports();

    let mut pipeline = Pipeline::new();
    hook_udp(
        &mut pipeline,
        UdpConfig {
            host: "127.0.0.1".into(),
            port: vmc_port,
        },
        SourceId::Vmc,
        SinkId::Vmc,
    )
    .expect("bind vmc port");
    hook_udp(
        &mut pipeline,
        UdpConfig {
            host: "127.0.0.1".into(),
            port: legacy_port,
        },
        SourceId::Legacy,
        SinkId::Legacy,
    )
    .expect("bind legacy port");
    pipeline.connect();

    let flags = pipeline.flags();
    let driver = thread::spawn(move || {
        while !pipeline.flags().terminated() {
            let worked = pipeline.spin().expect("spin");
            if !worked {
                thread::sleep(Duration::from_millis(1));
            }
        }
        pipeline.disconnect();
    });

    let vmc_peer = UdpSocket::bind("127.0.0.1:0").expect("vmc peer socket");
    vmc_peer
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let legacy_peer = UdpSocket::bind("127.0.0.1:0").expect("legacy peer socket");

    // The VMC sink replies to the last peer the VMC socket heard from, so
    // the controller announces itself first.
    let hello = Heartbeat {
        custom_mode: 0,
        mav_type: 2,
        autopilot: 3,
        base_mode: 81,
        system_status: 4,
        mavlink_version: 3,
    }
    .encode(1, 1, 0);
    vmc_peer
        .send_to(&hello.to_bytes(), ("127.0.0.1", vmc_port))
        .unwrap();

    // Give the gateway a moment to register the controller's address, then
    // send the frame that should be forwarded.
    thread::sleep(Duration::from_millis(200));
    let forwarded = Heartbeat {
        custom_mode: 7,
        mav_type: 2,
        autopilot: 3,
        base_mode: 81,
        system_status: 4,
        mavlink_version: 3,
    }
    .encode(42, 1, 0);
    legacy_peer
        .send_to(&forwarded.to_bytes(), ("127.0.0.1", legacy_port))
        .unwrap();

    // The VMC peer should observe exactly the forwarded frame bytes.
    let mut buf = [0u8; MAX_FRAME_LEN];
    let (n, _) = vmc_peer
        .recv_from(&mut buf)
        .expect("forwarded frame within the read timeout");
    assert_eq!(&buf[..n], forwarded.to_bytes().as_slice());

    flags.set_terminated();
    driver.join().expect("driver thread");
}
