use ibflit_common::{Lid, PortNum, Vl};
use ibflit_wire::{DataFlit, FlowControlPacket, LinkMessage};

/// Emitted by the arbiter once a forwarded flit has left the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentConfirmation {
    /// Output port the flit left through.
    pub port: PortNum,
    /// VL the flit was sent on.
    pub vl: Vl,
    /// Destination of the packet the flit belongs to.
    pub dst: Lid,
    /// Whether the flit closed a batch opened with `try_begin_batch`.
    pub was_last: bool,
}

/// Everything an input port reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A data flit arrived from the link.
    Data(DataFlit),
    /// A flow control packet arrived from the link.
    FlowControl(FlowControlPacket),
    /// A previously forwarded flit was sent.
    Sent(SentConfirmation),
}

impl From<LinkMessage> for Event {
    fn from(msg: LinkMessage) -> Self {
        match msg {
            LinkMessage::Data(flit) => Self::Data(flit),
            LinkMessage::FlowControl(fc) => Self::FlowControl(fc),
        }
    }
}

impl From<DataFlit> for Event {
    fn from(flit: DataFlit) -> Self {
        Self::Data(flit)
    }
}

impl From<FlowControlPacket> for Event {
    fn from(fc: FlowControlPacket) -> Self {
        Self::FlowControl(fc)
    }
}

impl From<SentConfirmation> for Event {
    fn from(sent: SentConfirmation) -> Self {
        Self::Sent(sent)
    }
}

/// Messages produced by an input port.
///
/// None of them is a link frame. A [`CreditAdvertisement`](Self::CreditAdvertisement) is handed to
/// the local transmitter of the link, which puts it on the wire in a [`FlowControlPacket`]
/// together with its own count of flits sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// The credit limit advertised back to the upstream transmitter.
    CreditAdvertisement {
        /// VL the limit applies to.
        vl: Vl,
        /// The new credit limit.
        fccl: u64,
    },
    /// The peer's advertised limit, handed on to the local arbitration stage.
    CreditForward {
        /// VL the limit applies to.
        vl: Vl,
        /// The peer's credit limit.
        fccl: u64,
    },
    /// A batch finished on this input. Sent to every output port.
    BatchDone {
        /// Output port notified.
        port: PortNum,
        /// Batch identifier, shared by every notice of the same batch.
        id: u64,
    },
}
