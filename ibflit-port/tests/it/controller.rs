use rand::{rngs::StdRng, Rng, SeedableRng};

use ibflit_common::{Lid, PortNum, Timed, Vl};
use ibflit_port::{
    Event, ForwardingTable, HoqSlots, Outbound, PortController, PortError, PortMode, PortOptions,
    ResolveError, DEFAULT_STORE_DELAY,
};
use ibflit_wire::{DataFlit, FlowControlPacket};

use crate::{no_route, packet, t};

type Port = PortController<fn(Lid) -> Result<PortNum, ResolveError>, HoqSlots>;

fn host_port(max_static: &[u32], lossy: bool) -> Port {
    let options = PortOptions::default()
        .with_mode(PortMode::Host)
        .with_max_vl((max_static.len() - 1) as Vl)
        .with_max_static(max_static)
        .with_lossy(lossy);
    let slots = HoqSlots::new(1, options.num_vls());
    PortController::new(options, no_route as fn(Lid) -> Result<PortNum, ResolveError>, slots)
        .unwrap()
}

/// Plays the arbiter: sends whatever sits in the head-of-queue slots until they stay empty.
fn drain_slots(port: &mut Port, now: u64) -> usize {
    let num_vls = port.options().num_vls() as Vl;
    let mut sent = 0;
    loop {
        let mut progress = false;
        for vl in 0..num_vls {
            if let Some(flit) = port.arbiter_mut().take(0, vl) {
                port.handle(flit.sent(false).into(), t(now)).unwrap();
                sent += 1;
                progress = true;
            }
        }
        if !progress {
            return sent;
        }
    }
}

#[test]
fn lossless_overflow_is_fatal() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut port = host_port(&[4], false);

    for flit in packet(1, 0, 4) {
        port.handle(flit.into(), t(10)).unwrap();
    }
    assert_eq!(port.ledger().static_free(0).unwrap(), 0);
    assert_eq!(port.ledger().abr(0).unwrap(), 4);

    let overflow = packet(2, 0, 1).next().unwrap();
    match port.handle(overflow.into(), t(11)) {
        Err(PortError::CreditOverflow {
            vl: 0,
            required: 1,
            available: 0,
        }) => {}
        other => panic!("expected CreditOverflow, got {other:?}"),
    }
}

#[test]
fn lossless_credits_come_back() {
    let mut port = host_port(&[4], false);

    for flit in packet(1, 0, 4) {
        port.handle(flit.into(), t(10)).unwrap();
    }
    assert_eq!(port.ledger().static_free(0).unwrap(), 0);

    assert_eq!(drain_slots(&mut port, 20), 4);
    assert_eq!(port.ledger().static_free(0).unwrap(), 4);
    assert_eq!(port.ledger().abr(0).unwrap(), 4);
    assert_eq!(port.stats().flits_forwarded(), 4);
}

#[test]
fn lossy_overflow_drops_silently() {
    let mut port = host_port(&[4], true);

    for flit in packet(1, 0, 4) {
        port.handle(flit.into(), t(10)).unwrap();
    }
    port.drain_outbound().for_each(drop);

    for flit in packet(2, 0, 3) {
        port.handle(flit.into(), t(11)).unwrap();
    }

    assert_eq!(port.ledger().static_free(0).unwrap(), 0);
    assert_eq!(port.ledger().abr(0).unwrap(), 4);
    assert_eq!(port.stats().dropped_packets(), 1);
    assert_eq!(port.stats().dropped_credits(), 3);
    // Nothing of the dropped packet reached a queue or produced a message.
    assert_eq!(port.queued(0, 0), 3);
    assert_eq!(port.drain_outbound().count(), 0);

    assert_eq!(drain_slots(&mut port, 20), 4);
    assert_eq!(port.ledger().static_free(0).unwrap(), 4);
}

#[test]
fn vls_are_independent() {
    let mut port = host_port(&[2, 2], false);

    for flit in packet(1, 0, 2) {
        port.handle(flit.into(), t(1)).unwrap();
    }
    for flit in packet(2, 1, 2) {
        port.handle(flit.into(), t(2)).unwrap();
    }

    assert_eq!(port.ledger().static_free(0).unwrap(), 0);
    assert_eq!(port.ledger().static_free(1).unwrap(), 0);
    assert!(!port.arbiter().is_free(0, 0));
    assert!(!port.arbiter().is_free(0, 1));

    let first = port.arbiter_mut().take(0, 1).unwrap();
    port.handle(first.sent(false).into(), t(3)).unwrap();
    assert_eq!(port.ledger().static_free(0).unwrap(), 0);
    assert_eq!(port.ledger().static_free(1).unwrap(), 1);

    let advertised: Vec<_> = port
        .drain_outbound()
        .filter_map(|out| match out.inner {
            Outbound::CreditAdvertisement { vl: 1, fccl } if out.at == t(3) => Some(fccl),
            _ => None,
        })
        .collect();
    assert_eq!(advertised, vec![2 + 1]);
}

#[test]
fn random_traffic_conserves_credits() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut rng = StdRng::seed_from_u64(0x1bf1);
    let max_static = [6, 3, 8];
    let mut port = host_port(&max_static, true);

    let mut now = 0;
    for packet_id in 1..=500 {
        let vl = rng.gen_range(0..max_static.len()) as Vl;
        let length = rng.gen_range(1..=4);

        for flit in packet(packet_id, vl, length) {
            now += 1;
            port.handle(flit.into(), t(now)).unwrap();

            // Randomly let the arbiter catch up.
            if rng.gen_bool(0.3) {
                now += 1;
                drain_slots(&mut port, now);
            }

            for vl in 0..max_static.len() as Vl {
                let credits = port.ledger().credits(vl).unwrap();
                assert!(credits.static_free <= credits.max_static, "vl {vl}: {credits:?}");
            }
        }
    }

    drain_slots(&mut port, now + 1);

    for (vl, max) in max_static.iter().enumerate() {
        assert_eq!(port.ledger().static_free(vl as Vl).unwrap(), *max);
    }

    let report = port.finish();
    assert_eq!(report.flits_forwarded + report.dropped_credits, report.flits_received);
    // Dropped packets leave holes in the sequence of the admitted ones.
    assert_eq!(report.in_order_packets + report.out_of_order_packets + report.dropped_packets, 500);
    assert!(report.dropped_packets > 0);

    let abr: u64 = (0..max_static.len() as Vl).map(|vl| port.ledger().abr(vl).unwrap()).sum();
    assert_eq!(abr, report.flits_forwarded as u64);
}

#[test]
fn advertisements_reach_the_peer_transmitter() {
    let _ = tracing_subscriber::fmt::try_init();

    // `rx` receives a packet from the peer; `peer` is the input on the other end of the link.
    let mut rx = host_port(&[4], false);
    let mut peer = host_port(&[4], false);
    peer.drain_outbound().for_each(drop);

    for flit in packet(1, 0, 2) {
        rx.handle(flit.into(), t(10)).unwrap();
    }

    // The transmitter next to `rx` sent nothing on the link, so its FCTBS is 0.
    let relayed: Vec<_> = rx
        .drain_outbound()
        .filter_map(|out| match out.inner {
            Outbound::CreditAdvertisement { vl, fccl } => {
                Some(Timed::new(out.at, FlowControlPacket { vl, fctbs: 0, fccl }))
            }
            _ => None,
        })
        .collect();
    assert_eq!(relayed.len(), 3);

    for fc in relayed {
        peer.handle(Event::from(fc.inner), fc.at).unwrap();
    }

    let limits: Vec<_> = peer
        .drain_outbound()
        .filter_map(|out| match out.inner {
            Outbound::CreditForward { vl: 0, fccl } => Some(fccl),
            _ => None,
        })
        .collect();
    // ABR and free credits move together until a flit is sent on.
    assert_eq!(limits, vec![4, 4, 4]);
    assert_eq!(peer.stats().flow_control_received(), 3);
    assert_eq!(peer.stats().abr_inconsistencies(), 0);
    assert_eq!(peer.stats().abr_resyncs(), 0);
}

#[test]
fn switch_routes_through_a_forwarding_table() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut table = ForwardingTable::from_ports([0, 0, 2]);
    table.set(5, 3);
    assert_eq!(table.len(), 6);

    let options = PortOptions::default()
        .with_num_ports(4)
        .with_port_num(1)
        .with_max_static([8]);
    let mut port = PortController::new(options, table, HoqSlots::new(4, 1)).unwrap();

    let to = |packet_id: u32, dst_lid: Lid| DataFlit {
        dst_lid,
        ..packet(packet_id, 0, 1).next().unwrap()
    };
    port.handle(to(1, 2).into(), t(10)).unwrap();
    port.handle(to(2, 5).into(), t(20)).unwrap();

    let store_delay = DEFAULT_STORE_DELAY.as_nanos() as u64;
    let first = port.arbiter().take(2, 0).unwrap();
    assert_eq!(first.send_at, t(10 + store_delay));
    assert!(!first.flit.before_any_switch);
    let second = port.arbiter().take(3, 0).unwrap();
    assert_eq!(second.send_at, t(20 + store_delay));

    // LID 7 is past the end of the table.
    match port.handle(to(3, 7).into(), t(30)) {
        Err(PortError::Unroutable {
            dst: 7,
            source: ResolveError::OutOfRange { lid: 7, len: 6 },
            ..
        }) => {}
        other => panic!("expected Unroutable, got {other:?}"),
    }
}
