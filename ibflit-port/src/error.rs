use thiserror::Error;

use ibflit_common::{Lid, PortNum, Vl};

/// Why a [`PortResolver`](crate::PortResolver) could not produce an output port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no route to LID {0}")]
    NoRoute(Lid),
    #[error("LID {lid} is out of the forwarding table range ({len} entries)")]
    OutOfRange { lid: Lid, len: usize },
}

/// Fatal port errors. Every variant is a contract breach between cooperating components and ends
/// the run; lossy drops and ABR inconsistencies never surface here.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Credit overflow on VL {vl}: required {required}, available {available}")]
    CreditOverflow {
        vl: Vl,
        required: u32,
        available: u32,
    },
    #[error("Insufficient credit on VL {vl}: required {required}, available {available}")]
    InsufficientCredit {
        vl: Vl,
        required: u32,
        available: u32,
    },
    #[error("Credit leak on VL {vl}: releasing into a full buffer of {max_static} credits")]
    CreditLeak { vl: Vl, max_static: u32 },
    #[error("VL {vl} out of range (max VL {max_vl})")]
    VlOutOfRange { vl: Vl, max_vl: Vl },
    #[error("Packet {packet_id} from LID {src} has a null destination")]
    NullDestination { packet_id: u32, src: Lid },
    #[error("Packet {packet_id} from LID {src} declares zero flits")]
    EmptyPacket { packet_id: u32, src: Lid },
    #[error("Cannot route packet {packet_id} to LID {dst}: {source}")]
    Unroutable {
        packet_id: u32,
        dst: Lid,
        source: ResolveError,
    },
    #[error("Output port {port} out of range ({num_ports} ports)")]
    PortOutOfRange { port: PortNum, num_ports: usize },
    #[error(
        "Loopback: packet {packet_id} from LID {src} to LID {dst} is sent back through port {port}"
    )]
    Loopback {
        packet_id: u32,
        src: Lid,
        dst: Lid,
        port: PortNum,
    },
    #[error("Continuation flit of packet {packet_id} from LID {src} with no open packet")]
    OrphanContinuation { packet_id: u32, src: Lid },
    #[error(
        "Flit of packet {packet_id} from LID {src} during packet {open_id} from LID {open_src}"
    )]
    UnexpectedContinuation {
        packet_id: u32,
        src: Lid,
        open_id: u32,
        open_src: Lid,
    },
    #[error("Flit {flit_sn} of packet {packet_id} arrived while expecting flit {expected}")]
    FlitOutOfOrder {
        packet_id: u32,
        flit_sn: u16,
        expected: u16,
    },
    #[error(
        "Head of packet {packet_id} arrived while packet {open_id} still expects {remaining} flits"
    )]
    TruncatedPacket {
        packet_id: u32,
        open_id: u32,
        remaining: u16,
    },
    #[error("Duplicate head from LID {src}: packet sequence number {sn} equals the previous one")]
    DuplicateHead { src: Lid, sn: u32 },
    #[error("Got the last flit of a batch with no batch being sent")]
    BeingSentUnderflow,
    #[error("Total static credits ({total}) exceed the total buffer size ({buffer})")]
    StaticExceedsBuffer { total: u32, buffer: u32 },
    #[error("Invalid port options: {0}")]
    InvalidOptions(String),
    #[error("Wire protocol error: {0:?}")]
    Wire(#[from] ibflit_wire::link::Error),
    #[error("Port channel closed")]
    ChannelClosed,
}
