use std::{collections::VecDeque, sync::Arc};

use ibflit_common::{PortNum, SimTime, Timed, Vl};
use ibflit_wire::{DataFlit, FlowControlPacket};

use crate::{
    dispatch::DispatchEngine,
    flow,
    ledger::CreditLedger,
    reassembly::{Admission, ReassemblyTracker},
    sequence::SequenceTracker,
    stats::{Histogram, PortReport, PortStats, VlUsage},
    Arbiter, Event, LoadReporter, Outbound, PortError, PortOptions, PortResolver,
    SentConfirmation,
};

/// The input side of one switch or host port.
///
/// A controller owns the credit ledger of its input, rebuilds packets from arriving flits, queues
/// them per output and VL and hands them to the arbiter one at a time. Everything it has to tell
/// the outside world is buffered as [`Outbound`] messages, collected with
/// [`drain_outbound`](Self::drain_outbound).
///
/// Every method runs to completion. Concurrent use goes through a
/// [`PortDriver`](crate::PortDriver).
#[derive(Debug)]
pub struct PortController<R, A, L = ()> {
    options: PortOptions,
    ledger: CreditLedger,
    tracker: ReassemblyTracker,
    dispatch: DispatchEngine,
    resolver: R,
    arbiter: A,
    reporter: L,
    stats: Arc<PortStats>,
    /// Total used static credits, sampled on every sent confirmation.
    used_static: Histogram,
    /// Batches started and not yet confirmed.
    being_sent: usize,
    next_done_id: u64,
    egress: VecDeque<Timed<Outbound>>,
}

impl<R, A> PortController<R, A>
where
    R: PortResolver,
    A: Arbiter,
{
    /// Creates a controller, validating `options`. One credit advertisement per VL is queued,
    /// 1ns into the run.
    pub fn new(options: PortOptions, resolver: R, arbiter: A) -> Result<Self, PortError> {
        let credits = options.static_credits()?;
        let ledger = CreditLedger::new(&credits);

        let mut egress = VecDeque::with_capacity(credits.len());
        for vl in 0..=options.max_vl() {
            let adv = flow::advertisement(&ledger, vl, options.lossy())?;
            egress.push_back(Timed::new(SimTime::NANOSECOND, adv));
        }

        tracing::debug!(
            port = options.port_num(),
            ?credits,
            mode = ?options.mode(),
            "port created"
        );

        Ok(Self {
            tracker: ReassemblyTracker::new(&options),
            dispatch: DispatchEngine::new(options.num_ports(), credits.len(), options.mode()),
            ledger,
            resolver,
            arbiter,
            reporter: (),
            stats: Arc::new(PortStats::default()),
            used_static: Histogram::default(),
            being_sent: 0,
            next_done_id: 0,
            egress,
            options,
        })
    }
}

impl<R, A, L> PortController<R, A, L>
where
    R: PortResolver,
    A: Arbiter,
    L: LoadReporter,
{
    /// Replaces the load reporter.
    pub fn with_reporter<L2: LoadReporter>(self, reporter: L2) -> PortController<R, A, L2> {
        PortController {
            options: self.options,
            ledger: self.ledger,
            tracker: self.tracker,
            dispatch: self.dispatch,
            resolver: self.resolver,
            arbiter: self.arbiter,
            reporter,
            stats: self.stats,
            used_static: self.used_static,
            being_sent: self.being_sent,
            next_done_id: self.next_done_id,
            egress: self.egress,
        }
    }

    /// Processes one event occurring at `now`.
    ///
    /// An error is fatal: the controller is left in an unspecified state and must not be used
    /// further.
    pub fn handle(&mut self, event: Event, now: SimTime) -> Result<(), PortError> {
        match event {
            Event::Data(flit) => self.on_data(flit, now),
            Event::FlowControl(packet) => self.on_flow_control(&packet, now),
            Event::Sent(sent) => self.on_sent(sent, now),
        }
    }

    /// Starts a batch if fewer than `max_being_sent` are in flight.
    pub fn try_begin_batch(&mut self) -> bool {
        if self.being_sent >= self.options.max_being_sent() {
            return false;
        }

        self.being_sent += 1;
        true
    }

    /// Closes a batch and tells every output about it.
    pub fn end_batch(&mut self, now: SimTime) -> Result<(), PortError> {
        self.being_sent = self.being_sent.checked_sub(1).ok_or(PortError::BeingSentUnderflow)?;

        let id = self.next_done_id;
        self.next_done_id += 1;
        for port in 0..self.options.num_ports() {
            self.emit(now, Outbound::BatchDone { port, id });
        }

        self.stats.increment_batches_completed();
        tracing::debug!(id, being_sent = self.being_sent, "batch done");
        Ok(())
    }

    /// Takes every outbound message produced so far, oldest first.
    pub fn drain_outbound(&mut self) -> impl Iterator<Item = Timed<Outbound>> + '_ {
        self.egress.drain(..)
    }

    /// The credit ledger of this input.
    #[inline]
    pub const fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// The live counters of this port.
    #[inline]
    pub fn stats(&self) -> &Arc<PortStats> {
        &self.stats
    }

    /// Batches started and not yet confirmed.
    #[inline]
    pub const fn being_sent(&self) -> usize {
        self.being_sent
    }

    /// The validated options.
    #[inline]
    pub const fn options(&self) -> &PortOptions {
        &self.options
    }

    /// Per-source packet ordering counters.
    #[inline]
    pub const fn sequence(&self) -> &SequenceTracker {
        self.tracker.sequence()
    }

    /// Number of flits waiting for the head-of-queue slot of `(port, vl)`.
    #[inline]
    pub fn queued(&self, port: PortNum, vl: Vl) -> usize {
        self.dispatch.queued(port, vl)
    }

    /// The arbiter flits are forwarded to.
    #[inline]
    pub const fn arbiter(&self) -> &A {
        &self.arbiter
    }

    /// Mutable access to the arbiter, for single-threaded setups that empty it by hand.
    #[inline]
    pub fn arbiter_mut(&mut self) -> &mut A {
        &mut self.arbiter
    }

    /// Logs the usage statistics of the run and returns them.
    pub fn finish(&self) -> PortReport {
        let port = self.options.port_num();

        let vls: Vec<_> = (0..self.ledger.num_vls())
            .filter_map(|vl| Vl::try_from(vl).ok())
            .filter_map(|vl| {
                let usage = self.ledger.usage(vl)?;
                Some(VlUsage {
                    vl,
                    samples: usage.count(),
                    mean_free: usage.mean(),
                    max_free: usage.max().unwrap_or_default(),
                    stddev_free: usage.stddev(),
                })
            })
            .collect();

        for usage in vls.iter().filter(|usage| usage.samples > 0) {
            tracing::info!(
                port,
                vl = usage.vl,
                samples = usage.samples,
                mean = usage.mean_free,
                max = usage.max_free,
                stddev = usage.stddev_free,
                "free static credits"
            );
        }

        let sequence = self.tracker.sequence();
        let report = PortReport {
            vls,
            mean_used_static: self.used_static.mean(),
            flits_received: self.stats.flits_received(),
            flits_forwarded: self.stats.flits_forwarded(),
            queued_flits: self.dispatch.total_queued(),
            packets_admitted: self.stats.packets_admitted(),
            dropped_packets: self.stats.dropped_packets(),
            dropped_credits: self.stats.dropped_credits(),
            in_order_packets: sequence.in_order(),
            out_of_order_packets: sequence.out_of_order(),
            out_of_order_gap: sequence.gap(),
            abr_inconsistencies: self.stats.abr_inconsistencies(),
            abr_resyncs: self.stats.abr_resyncs(),
        };

        tracing::info!(
            port,
            received = report.flits_received,
            forwarded = report.flits_forwarded,
            queued = report.queued_flits,
            admitted = report.packets_admitted,
            dropped = report.dropped_packets,
            in_order = report.in_order_packets,
            out_of_order = report.out_of_order_packets,
            gap = report.out_of_order_gap,
            "port finished"
        );

        report
    }

    fn on_data(&mut self, flit: DataFlit, now: SimTime) -> Result<(), PortError> {
        self.stats.increment_flits_received();

        let accepted = match self.tracker.accept(
            flit,
            &mut self.ledger,
            &self.resolver,
            &self.reporter,
            &self.stats,
        )? {
            Admission::Accepted(accepted) => accepted,
            Admission::Dropped => return Ok(()),
        };

        let (port, vl) = (accepted.out_port, accepted.vl);
        if !self.dispatch.enqueue(port, vl, accepted.flit, now) {
            return Err(PortError::PortOutOfRange {
                port,
                num_ports: self.options.num_ports(),
            });
        }
        tracing::trace!(port, vl, queued = self.dispatch.queued(port, vl), "queued flit");

        self.advertise(vl, now)?;
        self.pump(port, vl, now);
        Ok(())
    }

    fn on_flow_control(
        &mut self,
        packet: &FlowControlPacket,
        now: SimTime,
    ) -> Result<(), PortError> {
        self.stats.increment_flow_control_received();

        let [forward, advertisement] =
            flow::exchange(&mut self.ledger, packet, self.options.lossy(), &self.stats)?;
        self.emit(now, forward);
        self.emit(now, advertisement);
        Ok(())
    }

    fn on_sent(&mut self, sent: SentConfirmation, now: SimTime) -> Result<(), PortError> {
        self.ledger.release(sent.vl)?;
        self.used_static.record(self.ledger.used_static());
        self.advertise(sent.vl, now)?;

        if self.options.mode().is_switch() && self.options.num_ports() > 1 {
            self.reporter.report_queued_units(self.options.port_num(), sent.port, sent.dst, -1);
        }

        if sent.was_last {
            self.end_batch(now)?;
        }

        self.pump(sent.port, sent.vl, now);
        Ok(())
    }

    /// Forwards queued flits of `(port, vl)` until the arbiter refuses one.
    fn pump(&mut self, port: PortNum, vl: Vl, now: SimTime) {
        while self.dispatch.dispatch(port, vl, now, &mut self.arbiter) {
            self.stats.increment_flits_forwarded();
        }
    }

    fn advertise(&mut self, vl: Vl, now: SimTime) -> Result<(), PortError> {
        let adv = flow::advertisement(&self.ledger, vl, self.options.lossy())?;
        self.emit(now, adv);
        Ok(())
    }

    #[inline]
    fn emit(&mut self, at: SimTime, outbound: Outbound) {
        self.egress.push_back(Timed::new(at, outbound));
    }
}
