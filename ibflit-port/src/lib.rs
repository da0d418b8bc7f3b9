#![doc(issue_tracker_base_url = "https://github.com/chainbound/ibflit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

use ibflit_common::{Lid, PortNum, Vl};

mod controller;
mod dispatch;
mod driver;
mod error;
mod event;
/// Credit advertisement and flow control exchange.
pub mod flow;
mod hoq;
mod ledger;
mod options;
mod reassembly;
mod routing;
mod sequence;
mod stats;

pub use controller::PortController;
pub use dispatch::{DispatchEngine, ForwardedFlit};
pub use driver::{PortDriver, PortHandle};
pub use error::{PortError, ResolveError};
pub use event::{Event, Outbound, SentConfirmation};
pub use hoq::HoqSlots;
pub use ledger::{CreditLedger, Reconcile, VlCredits};
pub use options::{
    DriverOptions, LinkWidth, PortMode, PortOptions, DEFAULT_BUFFER_SIZE, DEFAULT_STORE_DELAY,
};
pub use reassembly::{AcceptedFlit, Admission, ReassemblyTracker};
pub use routing::ForwardingTable;
pub use sequence::{SequenceClass, SequenceTracker};
pub use stats::{Histogram, PortReport, PortStats, VlUsage};

/// Maps a destination LID to the output port of the switch that leads to it.
pub trait PortResolver {
    /// Returns the output port leading to `dst`.
    fn resolve(&self, dst: Lid) -> Result<PortNum, ResolveError>;
}

impl<F> PortResolver for F
where
    F: Fn(Lid) -> Result<PortNum, ResolveError>,
{
    fn resolve(&self, dst: Lid) -> Result<PortNum, ResolveError> {
        self(dst)
    }
}

/// The downstream arbitration stage, seen from an input port.
///
/// Each `(port, vl)` pair has a single head-of-queue slot. Reserving the slot and handing over
/// the flit happen in one call, so no other hand-off can slip in between the check and the use.
pub trait Arbiter {
    /// Moves `flit` into the head-of-queue slot of `(port, vl)` if the slot is free. When it is
    /// occupied the flit is handed back untouched.
    fn try_reserve_head_of_queue(
        &mut self,
        port: PortNum,
        vl: Vl,
        flit: ForwardedFlit,
    ) -> Result<(), ForwardedFlit>;
}

/// Receives best-effort reports of how many flits are queued from an input towards an output.
/// Reports are fire-and-forget; an implementation must not block.
pub trait LoadReporter {
    /// Adds `delta` flits to the queue from `in_port` to `out_port` for packets headed to `dst`.
    fn report_queued_units(&self, in_port: PortNum, out_port: PortNum, dst: Lid, delta: i64);
}

/// Discards every report.
impl LoadReporter for () {
    #[inline]
    fn report_queued_units(&self, _: PortNum, _: PortNum, _: Lid, _: i64) {}
}
