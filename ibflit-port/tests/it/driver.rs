use std::sync::Arc;

use futures::{SinkExt, StreamExt};

use ibflit_common::Timed;
use ibflit_port::{
    DriverOptions, Event, HoqSlots, Outbound, PortController, PortDriver, PortError, PortMode,
    PortOptions,
};
use ibflit_wire::FlowControlPacket;

use crate::{no_route, packet, t};

fn host_options() -> PortOptions {
    PortOptions::default().with_mode(PortMode::Host).with_max_static([4])
}

async fn next_advertisement(handle: &mut ibflit_port::PortHandle) -> Timed<u64> {
    loop {
        let out = handle.recv().await.expect("driver stopped");
        if let Outbound::CreditAdvertisement { fccl, .. } = out.inner {
            return Timed::new(out.at, fccl);
        }
    }
}

#[tokio::test]
async fn driver_forwards_and_reports() {
    let _ = tracing_subscriber::fmt::try_init();

    let slots = Arc::new(HoqSlots::new(1, 1));
    let controller = PortController::new(host_options(), no_route, Arc::clone(&slots)).unwrap();
    let (driver, mut handle) = PortDriver::new(controller, DriverOptions::default());
    let task = driver.spawn();

    assert_eq!(next_advertisement(&mut handle).await, Timed::new(t(1), 4));

    for flit in packet(1, 0, 2) {
        handle.send(t(10), flit).await.unwrap();
    }
    // Every accepted flit is followed by an advertisement.
    assert_eq!(next_advertisement(&mut handle).await, Timed::new(t(10), 4));
    assert_eq!(next_advertisement(&mut handle).await, Timed::new(t(10), 4));
    assert_eq!(handle.stats().flits_received(), 2);

    let head = slots.take(0, 0).unwrap();
    assert_eq!(head.flit.flit_sn, 0);
    // Host ports leave the flag to the first switch.
    assert!(head.flit.before_any_switch);
    handle.send(t(20), head.sent(false)).await.unwrap();
    assert_eq!(next_advertisement(&mut handle).await, Timed::new(t(20), 2 + 3));

    // The confirmation freed the slot and the tail moved in.
    let tail = slots.take(0, 0).unwrap();
    assert_eq!(tail.flit.flit_sn, 1);
    assert_eq!(tail.send_at, t(20));
    handle.send(t(30), tail.sent(false)).await.unwrap();
    assert_eq!(next_advertisement(&mut handle).await, Timed::new(t(30), 2 + 4));

    handle.close();
    while handle.recv().await.is_some() {}

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.flits_received, 2);
    assert_eq!(report.flits_forwarded, 2);
    assert_eq!(report.in_order_packets, 1);
    assert!((report.mean_used_static - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn fatal_error_stops_the_driver() {
    let _ = tracing_subscriber::fmt::try_init();

    let slots = Arc::new(HoqSlots::new(1, 1));
    let controller = PortController::new(host_options(), no_route, slots).unwrap();
    let (driver, mut handle) = PortDriver::new(controller, DriverOptions::default());
    let task = driver.spawn();

    let orphan = packet(1, 0, 3).nth(1).unwrap();
    handle.send(t(5), orphan).await.unwrap();

    match task.await.unwrap() {
        Err(PortError::OrphanContinuation {
            packet_id: 1,
            src: 1,
        }) => {}
        other => panic!("expected OrphanContinuation, got {other:?}"),
    }

    assert!(matches!(handle.send(t(6), orphan).await, Err(PortError::ChannelClosed)));
}

#[tokio::test]
async fn dropped_handle_finishes_the_driver() {
    let slots = Arc::new(HoqSlots::new(1, 1));
    let controller = PortController::new(host_options(), no_route, slots).unwrap();
    let (driver, handle) = PortDriver::new(
        controller,
        DriverOptions {
            inbound_buffer: 4,
            outbound_buffer: 1,
        },
    );

    drop(handle);

    let report = driver.await.unwrap();
    assert_eq!(report.flits_received, 0);
    assert_eq!(report.vls.len(), 1);
}

#[tokio::test]
async fn split_handle_sends_and_receives_from_separate_tasks() {
    let _ = tracing_subscriber::fmt::try_init();

    let slots = Arc::new(HoqSlots::new(1, 1));
    let controller = PortController::new(host_options(), no_route, slots).unwrap();
    let (driver, handle) = PortDriver::new(
        controller,
        DriverOptions {
            inbound_buffer: 2,
            outbound_buffer: 2,
        },
    );
    let task = driver.spawn();

    let (mut events, mut outbound) = handle.split();

    let sender = tokio::spawn(async move {
        for fccl in 0..100 {
            let fc = FlowControlPacket {
                vl: 0,
                fctbs: 0,
                fccl,
            };
            events.send(Timed::new(t(fccl + 2), Event::from(fc))).await?;
        }
        events.close().await
    });

    let mut limits = Vec::new();
    let mut advertisements = Vec::new();
    while let Some(out) = outbound.next().await {
        match out.inner {
            Outbound::CreditForward { fccl, .. } => limits.push(fccl),
            Outbound::CreditAdvertisement { fccl, .. } => advertisements.push((out.at, fccl)),
            Outbound::BatchDone { .. } => {}
        }
    }

    sender.await.unwrap().unwrap();
    assert_eq!(limits, (0..100).collect::<Vec<_>>());
    assert_eq!(advertisements.len(), 101);
    assert_eq!(advertisements[0], (t(1), 4));
    assert_eq!(advertisements[100], (t(101), 4));

    let report = task.await.unwrap().unwrap();
    assert_eq!(report.flits_received, 0);
    assert_eq!(report.abr_inconsistencies, 0);
}
