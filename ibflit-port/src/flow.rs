//! The link-level flow control exchange of an input port.
//!
//! A flow control packet from the peer carries the peer's FCTBS and FCCL for one VL. The port
//! hands the FCCL on to its own output side, reconciles its ABR against the FCTBS and answers with
//! a fresh credit advertisement.

use ibflit_common::Vl;
use ibflit_wire::FlowControlPacket;

use crate::{ledger::CreditLedger, Outbound, PortError, PortStats, Reconcile};

/// The credit advertisement for `vl` given the current state of `ledger`.
pub fn advertisement(ledger: &CreditLedger, vl: Vl, lossy: bool) -> Result<Outbound, PortError> {
    Ok(Outbound::CreditAdvertisement {
        vl,
        fccl: ledger.advertise(vl, lossy)?,
    })
}

/// Processes one flow control packet from the peer.
///
/// Returns the messages to emit, in order: the forwarded peer FCCL, then the new advertisement.
pub fn exchange(
    ledger: &mut CreditLedger,
    packet: &FlowControlPacket,
    lossy: bool,
    stats: &PortStats,
) -> Result<[Outbound; 2], PortError> {
    let vl = packet.vl;
    let forward = Outbound::CreditForward {
        vl,
        fccl: packet.fccl,
    };

    match ledger.reconcile(vl, packet.fctbs)? {
        Reconcile::InSync => {}
        Reconcile::AheadOfPeer { abr, fctbs } => {
            stats.increment_abr_inconsistencies();
            tracing::error!(vl, abr, fctbs, "ABR is ahead of the peer's FCTBS");
        }
        Reconcile::Resynced { from, to } => {
            stats.increment_abr_resyncs();
            tracing::warn!(vl, from, to, "ABR resynced to the peer's FCTBS");
        }
    }

    let advertisement = advertisement(ledger, vl, lossy)?;
    tracing::debug!(
        vl,
        fccl = packet.fccl,
        fctbs = packet.fctbs,
        ?advertisement,
        "flow control exchange"
    );

    Ok([forward, advertisement])
}
