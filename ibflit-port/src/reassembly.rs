use ibflit_common::{constants::NULL_LID, Lid, PortNum, Vl};
use ibflit_wire::DataFlit;

use crate::{
    ledger::CreditLedger,
    sequence::SequenceTracker,
    stats::PortStats,
    LoadReporter, PortError, PortMode, PortOptions, PortResolver,
};

/// The packet currently being received on the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenPacket {
    packet_id: u32,
    src: Lid,
    vl: Vl,
    out_port: PortNum,
    /// Flit sequence number expected next.
    next_sn: u16,
    length: u16,
}

impl OpenPacket {
    const fn remaining(&self) -> u16 {
        self.length - self.next_sn
    }
}

/// Receive state of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Idle,
    /// A head was admitted and the packet is still incomplete.
    Open(OpenPacket),
    /// A head was dropped in lossy mode; its continuations are swallowed.
    Discarding(OpenPacket),
}

/// A flit that was accepted and charged one credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedFlit {
    /// Output the packet was routed to.
    pub out_port: PortNum,
    /// VL whose credit the flit holds.
    pub vl: Vl,
    /// The flit, as it leaves the port.
    pub flit: DataFlit,
    /// Whether this flit completed its packet.
    pub completes_packet: bool,
}

/// What happened to an incoming data flit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The flit holds one credit and is ready to be queued.
    Accepted(AcceptedFlit),
    /// The flit belongs to a packet dropped in lossy mode.
    Dropped,
}

/// Rebuilds packets from the flits arriving on one input and charges their credits.
#[derive(Debug)]
pub struct ReassemblyTracker {
    context: Context,
    sequence: SequenceTracker,
    port_num: PortNum,
    num_ports: usize,
    max_vl: Vl,
    lossy: bool,
    mode: PortMode,
}

impl ReassemblyTracker {
    /// Creates an idle tracker for a port configured with `options`.
    pub fn new(options: &PortOptions) -> Self {
        Self {
            context: Context::Idle,
            sequence: SequenceTracker::new(),
            port_num: options.port_num(),
            num_ports: options.num_ports(),
            max_vl: options.max_vl(),
            lossy: options.lossy(),
            mode: options.mode(),
        }
    }

    /// Whether no packet is being received or discarded.
    #[inline]
    pub const fn is_idle(&self) -> bool {
        matches!(self.context, Context::Idle)
    }

    /// Per-source packet ordering counters.
    #[inline]
    pub const fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    /// Accepts one data flit.
    ///
    /// Heads are validated, routed and checked against the free credits of their VL. Every
    /// accepted flit, head included, consumes exactly one credit of `ledger`.
    pub fn accept<R, L>(
        &mut self,
        mut flit: DataFlit,
        ledger: &mut CreditLedger,
        resolver: &R,
        reporter: &L,
        stats: &PortStats,
    ) -> Result<Admission, PortError>
    where
        R: PortResolver + ?Sized,
        L: LoadReporter + ?Sized,
    {
        let mut open = if flit.is_head() {
            match self.admit_head(&flit, ledger, resolver, reporter, stats)? {
                Some(open) => open,
                None => return Ok(Admission::Dropped),
            }
        } else {
            let mut open = self.continuation(&flit)?;
            if let Context::Discarding(_) = self.context {
                open.next_sn += 1;
                self.context = if open.remaining() == 0 {
                    Context::Idle
                } else {
                    Context::Discarding(open)
                };
                tracing::trace!(
                    packet_id = flit.packet_id,
                    flit_sn = flit.flit_sn,
                    "discarding flit"
                );
                return Ok(Admission::Dropped);
            }
            open
        };

        // The head already checked that the whole packet fits.
        ledger.reserve(open.vl, 1)?;

        if self.mode.is_switch() {
            flit.before_any_switch = false;
        }

        open.next_sn += 1;
        let completes_packet = open.remaining() == 0;
        self.context = if completes_packet {
            Context::Idle
        } else {
            Context::Open(open)
        };

        Ok(Admission::Accepted(AcceptedFlit {
            out_port: open.out_port,
            vl: open.vl,
            flit,
            completes_packet,
        }))
    }

    /// Validates and routes a head. Returns `None` when the packet is dropped.
    fn admit_head<R, L>(
        &mut self,
        flit: &DataFlit,
        ledger: &CreditLedger,
        resolver: &R,
        reporter: &L,
        stats: &PortStats,
    ) -> Result<Option<OpenPacket>, PortError>
    where
        R: PortResolver + ?Sized,
        L: LoadReporter + ?Sized,
    {
        let packet_id = flit.packet_id;
        let src = flit.src_lid;

        if let Context::Open(open) | Context::Discarding(open) = self.context {
            return Err(PortError::TruncatedPacket {
                packet_id,
                open_id: open.packet_id,
                remaining: open.remaining(),
            });
        }
        if flit.packet_length == 0 {
            return Err(PortError::EmptyPacket { packet_id, src });
        }
        if flit.dst_lid == NULL_LID {
            return Err(PortError::NullDestination { packet_id, src });
        }
        if flit.vl > self.max_vl {
            return Err(PortError::VlOutOfRange {
                vl: flit.vl,
                max_vl: self.max_vl,
            });
        }

        let required = u32::from(flit.packet_length);
        if !ledger.can_reserve(flit.vl, required)? {
            let available = ledger.static_free(flit.vl)?;
            if !self.lossy {
                return Err(PortError::CreditOverflow {
                    vl: flit.vl,
                    required,
                    available,
                });
            }

            stats.record_drop(usize::from(flit.packet_length));
            tracing::debug!(packet_id, src, vl = flit.vl, required, available, "dropping packet");

            let dropped = OpenPacket {
                packet_id,
                src,
                vl: flit.vl,
                out_port: 0,
                next_sn: 1,
                length: flit.packet_length,
            };
            if dropped.remaining() > 0 {
                self.context = Context::Discarding(dropped);
            }
            return Ok(None);
        }

        let out_port = self.route(flit, resolver)?;
        let class = self.sequence.observe(src, flit.packet_sn)?;
        if self.mode.is_switch() && self.num_ports > 1 {
            let delta = i64::from(required);
            reporter.report_queued_units(self.port_num, out_port, flit.dst_lid, delta);
        }
        stats.increment_packets_admitted();
        tracing::trace!(packet_id, src, vl = flit.vl, out_port, ?class, "admitted packet");

        Ok(Some(OpenPacket {
            packet_id,
            src,
            vl: flit.vl,
            out_port,
            next_sn: 0,
            length: flit.packet_length,
        }))
    }

    fn route<R>(&self, flit: &DataFlit, resolver: &R) -> Result<PortNum, PortError>
    where
        R: PortResolver + ?Sized,
    {
        if !self.mode.is_switch() || self.num_ports == 1 {
            return Ok(0);
        }

        let port = resolver.resolve(flit.dst_lid).map_err(|source| PortError::Unroutable {
            packet_id: flit.packet_id,
            dst: flit.dst_lid,
            source,
        })?;

        if port >= self.num_ports {
            return Err(PortError::PortOutOfRange {
                port,
                num_ports: self.num_ports,
            });
        }
        if !flit.before_any_switch && port == self.port_num {
            return Err(PortError::Loopback {
                packet_id: flit.packet_id,
                src: flit.src_lid,
                dst: flit.dst_lid,
                port,
            });
        }

        Ok(port)
    }

    /// Checks a continuation flit against the packet being received or discarded.
    fn continuation(&self, flit: &DataFlit) -> Result<OpenPacket, PortError> {
        let open = match self.context {
            Context::Idle => {
                return Err(PortError::OrphanContinuation {
                    packet_id: flit.packet_id,
                    src: flit.src_lid,
                })
            }
            Context::Open(open) | Context::Discarding(open) => open,
        };

        if open.packet_id != flit.packet_id || open.src != flit.src_lid {
            return Err(PortError::UnexpectedContinuation {
                packet_id: flit.packet_id,
                src: flit.src_lid,
                open_id: open.packet_id,
                open_src: open.src,
            });
        }
        if flit.flit_sn != open.next_sn {
            return Err(PortError::FlitOutOfOrder {
                packet_id: flit.packet_id,
                flit_sn: flit.flit_sn,
                expected: open.next_sn,
            });
        }

        Ok(open)
    }
}
