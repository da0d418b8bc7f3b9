use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use ibflit_common::{Lid, SimTime, Timed, Vl};

/// Errors produced by the link [`Codec`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Unknown link message kind: {0}")]
    UnknownKind(u8),
    #[error("VL {0} does not fit the 4-bit VL field")]
    InvalidVl(u8),
}

/// One flit of a data packet, as seen on the link.
///
/// A packet of `packet_length` flits is sent as flits `0..packet_length`. Flit `0` is the head and
/// carries the routing decision for the whole packet; the remaining flits are continuations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFlit {
    /// Identifier of the packet, unique per source.
    pub packet_id: u32,
    /// Position of this flit inside its packet.
    pub flit_sn: u16,
    /// Total number of flits (credits) of the packet.
    pub packet_length: u16,
    /// Ordinal sequence number of the packet among all packets of its source.
    pub packet_sn: u32,
    /// VL the packet travels on.
    pub vl: Vl,
    /// LID of the sending end port.
    pub src_lid: Lid,
    /// LID of the destination end port.
    pub dst_lid: Lid,
    /// Number of payload bytes carried by this flit.
    pub byte_length: u32,
    /// Set by the sending host, cleared by the first switch that accepts the flit.
    pub before_any_switch: bool,
}

impl DataFlit {
    /// Encoded size of the flit body in bytes.
    const BODY_LEN: usize = 22;

    /// Whether this flit opens its packet.
    #[inline]
    pub const fn is_head(&self) -> bool {
        self.flit_sn == 0
    }

    fn decode_body(src: &mut BytesMut) -> Self {
        let packet_id = src.get_u32();
        let flit_sn = src.get_u16();
        let packet_length = src.get_u16();
        let packet_sn = src.get_u32();
        let vl = src.get_u8();
        let src_lid = src.get_u16();
        let dst_lid = src.get_u16();
        let byte_length = src.get_u32();
        let flags = src.get_u8();

        Self {
            packet_id,
            flit_sn,
            packet_length,
            packet_sn,
            vl,
            src_lid,
            dst_lid,
            byte_length,
            before_any_switch: flags & FLAG_BEFORE_ANY_SWITCH != 0,
        }
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u32(self.packet_id);
        dst.put_u16(self.flit_sn);
        dst.put_u16(self.packet_length);
        dst.put_u32(self.packet_sn);
        dst.put_u8(self.vl);
        dst.put_u16(self.src_lid);
        dst.put_u16(self.dst_lid);
        dst.put_u32(self.byte_length);
        let flags = if self.before_any_switch {
            FLAG_BEFORE_ANY_SWITCH
        } else {
            0
        };
        dst.put_u8(flags);
    }
}

/// A per-VL flow control packet exchanged between link peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControlPacket {
    /// VL the credits apply to.
    pub vl: Vl,
    /// Flow Control Total Blocks Sent: the number of data flits the peer sent on this VL.
    pub fctbs: u64,
    /// Flow Control Credit Limit advertised by the peer.
    pub fccl: u64,
}

impl FlowControlPacket {
    const BODY_LEN: usize = 17;

    fn decode_body(src: &mut BytesMut) -> Self {
        Self {
            vl: src.get_u8(),
            fctbs: src.get_u64(),
            fccl: src.get_u64(),
        }
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_u8(self.vl);
        dst.put_u64(self.fctbs);
        dst.put_u64(self.fccl);
    }
}

/// Everything a link peer can push into a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMessage {
    /// A flit of a data packet.
    Data(DataFlit),
    /// The peer's credit state for one VL.
    FlowControl(FlowControlPacket),
}

impl LinkMessage {
    /// VL the message travels on.
    #[inline]
    pub const fn vl(&self) -> Vl {
        match self {
            Self::Data(flit) => flit.vl,
            Self::FlowControl(fc) => fc.vl,
        }
    }

    const fn kind(&self) -> u8 {
        match self {
            Self::Data(_) => KIND_DATA,
            Self::FlowControl(_) => KIND_FLOW_CONTROL,
        }
    }
}

impl From<DataFlit> for LinkMessage {
    fn from(flit: DataFlit) -> Self {
        Self::Data(flit)
    }
}

impl From<FlowControlPacket> for LinkMessage {
    fn from(packet: FlowControlPacket) -> Self {
        Self::FlowControl(packet)
    }
}

/// A link message stamped with the simulated time it was put on the wire.
pub type Frame = Timed<LinkMessage>;

const KIND_DATA: u8 = 1;
const KIND_FLOW_CONTROL: u8 = 2;

const FLAG_BEFORE_ANY_SWITCH: u8 = 0b0000_0001;

/// VLs are carried in 4 bits on a real link.
const MAX_WIRE_VL: Vl = 15;

#[derive(Debug, Clone, Copy)]
struct Header {
    kind: u8,
    at: SimTime,
}

impl Header {
    /// Returns the length of the header in bytes: kind (1) and timestamp (8).
    #[inline]
    const fn len() -> usize {
        9
    }

    fn body_len(&self) -> Result<usize, Error> {
        match self.kind {
            KIND_DATA => Ok(DataFlit::BODY_LEN),
            KIND_FLOW_CONTROL => Ok(FlowControlPacket::BODY_LEN),
            other => Err(Error::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Body(Header),
}

/// Big-endian codec for [`Frame`]s: `[kind:u8][time_ns:u64][body]`.
#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
}

impl Codec {
    /// Creates a codec waiting for a frame header.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < Header::len() {
                        return Ok(None);
                    }

                    let header = Header {
                        kind: src.get_u8(),
                        at: SimTime::from_nanos(src.get_u64()),
                    };
                    // Reject unknown kinds before waiting on a body we can't size.
                    header.body_len()?;

                    self.state = State::Body(header);
                }
                State::Body(header) => {
                    let body_len = header.body_len()?;
                    if src.len() < body_len {
                        src.reserve(body_len - src.len());
                        return Ok(None);
                    }

                    let message = match header.kind {
                        KIND_DATA => LinkMessage::Data(DataFlit::decode_body(src)),
                        KIND_FLOW_CONTROL => {
                            LinkMessage::FlowControl(FlowControlPacket::decode_body(src))
                        }
                        other => return Err(Error::UnknownKind(other)),
                    };

                    self.state = State::Header;
                    if message.vl() > MAX_WIRE_VL {
                        return Err(Error::InvalidVl(message.vl()));
                    }

                    tracing::trace!(at = %header.at, ?message, "decoded link frame");

                    return Ok(Some(Timed::new(header.at, message)));
                }
            }
        }
    }
}

impl Encoder<Frame> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = Header {
            kind: item.inner.kind(),
            at: item.at,
        };
        dst.reserve(Header::len() + header.body_len()?);

        dst.put_u8(header.kind);
        dst.put_u64(header.at.as_nanos());
        match &item.inner {
            LinkMessage::Data(flit) => flit.encode_body(dst),
            LinkMessage::FlowControl(fc) => fc.encode_body(dst),
        }

        Ok(())
    }
}
