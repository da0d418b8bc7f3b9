use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

use ibflit_common::Timed;
use ibflit_port::{
    DriverOptions, HoqSlots, Outbound, PortController, PortDriver, PortMode, PortOptions,
    DEFAULT_BUFFER_SIZE,
};
use ibflit_wire::{link::Codec, FlowControlPacket, LinkMessage};

use crate::{no_route, packet, t};

/// A peer streams framed link messages into a port and reads the port's advertisements back
/// from the other direction of the link.
#[tokio::test]
async fn port_over_a_framed_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let (peer_tx, port_rx) = tokio::io::duplex(256);
    let (port_tx, peer_rx) = tokio::io::duplex(256);

    let slots = Arc::new(HoqSlots::new(1, 2));
    let options = PortOptions::default()
        .with_mode(PortMode::Host)
        .with_max_vl(1)
        .with_max_static([4, 2]);
    let controller = PortController::new(options, no_route, Arc::clone(&slots)).unwrap();
    let (driver, mut handle) = PortDriver::new(controller, DriverOptions::default());
    let task = driver.spawn();

    // Port side: feed the link into the port, then let the local transmitter put its
    // advertisements on the wire. It sends no data, so its FCTBS stays 0.
    tokio::spawn(async move {
        handle.feed(FramedRead::new(port_rx, Codec::new())).await.unwrap();
        handle.close();

        let mut link = FramedWrite::new(port_tx, Codec::new());
        while let Some(out) = handle.recv().await {
            if let Outbound::CreditAdvertisement { vl, fccl } = out.inner {
                let fc = FlowControlPacket { vl, fctbs: 0, fccl };
                link.send(Timed::new(out.at, LinkMessage::from(fc))).await.unwrap();
            }
        }
    });

    // Peer side.
    let mut to_port = FramedWrite::new(peer_tx, Codec::new());
    for flit in packet(1, 1, 2) {
        to_port.send(Timed::new(t(10), LinkMessage::from(flit))).await.unwrap();
    }
    let fc = FlowControlPacket {
        vl: 1,
        fctbs: 2,
        fccl: 9,
    };
    to_port.send(Timed::new(t(15), LinkMessage::from(fc))).await.unwrap();
    drop(to_port);

    let mut from_port = FramedRead::new(peer_rx, Codec::new());
    let mut limits = Vec::new();
    while let Some(frame) = from_port.next().await {
        let Timed { at, inner } = frame.unwrap();
        if let LinkMessage::FlowControl(fc) = inner {
            limits.push((at, fc.vl, fc.fccl));
        }
    }

    assert_eq!(
        limits,
        vec![
            // Initial limits.
            (t(1), 0, 4),
            (t(1), 1, 2),
            // One per accepted flit.
            (t(10), 1, 2),
            (t(10), 1, 2),
            // The answer to the peer's flow control packet.
            (t(15), 1, 2),
        ]
    );

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.flits_received, 2);
    assert_eq!(report.abr_inconsistencies, 0);
    assert!(!slots.is_free(0, 1));
}

/// A link carrying many times what the driver channels hold is fed in full before anything is
/// received.
#[tokio::test]
async fn long_link_is_fed_before_receiving() {
    let _ = tracing_subscriber::fmt::try_init();

    let (peer_tx, port_rx) = tokio::io::duplex(256);

    let slots = Arc::new(HoqSlots::new(1, 1));
    let options = PortOptions::default().with_mode(PortMode::Host).with_max_static([4]);
    let controller = PortController::new(options, no_route, slots).unwrap();
    let (driver, mut handle) = PortDriver::new(controller, DriverOptions::default());
    let task = driver.spawn();

    // Each flow control packet makes the port emit two messages.
    let frames = 3 * DEFAULT_BUFFER_SIZE;
    tokio::spawn(async move {
        let mut to_port = FramedWrite::new(peer_tx, Codec::new());
        for i in 0..frames as u64 {
            let fc = FlowControlPacket {
                vl: 0,
                fctbs: 0,
                fccl: i,
            };
            to_port.send(Timed::new(t(i + 2), LinkMessage::from(fc))).await.unwrap();
        }
    });

    let link = FramedRead::new(port_rx, Codec::new());
    let fed = tokio::time::timeout(Duration::from_secs(5), handle.feed(link)).await;
    assert!(matches!(fed, Ok(Ok(()))), "feeding the link stalled: {fed:?}");
    handle.close();

    let mut limits = Vec::with_capacity(frames);
    let mut advertisements = 0;
    while let Some(out) = handle.recv().await {
        match out.inner {
            Outbound::CreditForward { fccl, .. } => limits.push(fccl),
            Outbound::CreditAdvertisement { .. } => advertisements += 1,
            Outbound::BatchDone { .. } => {}
        }
    }

    assert_eq!(limits, (0..frames as u64).collect::<Vec<_>>());
    assert_eq!(advertisements, frames + 1);
    assert_eq!(handle.stats().flow_control_received(), frames);

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.abr_inconsistencies, 0);
}
