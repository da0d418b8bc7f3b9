mod controller;
mod driver;
mod link;

use ibflit_common::{Lid, PortNum, SimTime, Vl};
use ibflit_port::ResolveError;
use ibflit_wire::DataFlit;

/// The flits of one packet, head first.
pub(crate) fn packet(packet_id: u32, vl: Vl, length: u16) -> impl Iterator<Item = DataFlit> {
    (0..length).map(move |flit_sn| DataFlit {
        packet_id,
        flit_sn,
        packet_length: length,
        packet_sn: packet_id,
        vl,
        src_lid: 1,
        dst_lid: 2,
        byte_length: 64,
        before_any_switch: true,
    })
}

pub(crate) fn no_route(dst: Lid) -> Result<PortNum, ResolveError> {
    Err(ResolveError::NoRoute(dst))
}

pub(crate) const fn t(nanos: u64) -> SimTime {
    SimTime::from_nanos(nanos)
}
