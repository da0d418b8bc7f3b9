use std::collections::VecDeque;

use ibflit_common::{PortNum, SimTime, Vl};
use ibflit_wire::DataFlit;

use crate::{Arbiter, PortMode, SentConfirmation};

/// A flit handed to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedFlit {
    /// Output port the flit leaves through.
    pub port: PortNum,
    /// The flit itself, `before_any_switch` already cleared on switch ports.
    pub flit: DataFlit,
    /// When the flit arrived on the input.
    pub arrival: SimTime,
    /// When the flit is delivered to the arbiter. Never earlier than the dispatch time.
    pub send_at: SimTime,
}

impl ForwardedFlit {
    /// The confirmation to report back once this flit has been sent.
    pub const fn sent(&self, was_last: bool) -> SentConfirmation {
        SentConfirmation {
            port: self.port,
            vl: self.flit.vl,
            dst: self.flit.dst_lid,
            was_last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedFlit {
    flit: DataFlit,
    arrival: SimTime,
}

/// Per-(output port, VL) FIFOs of accepted flits, drained one flit at a time into the arbiter's
/// head-of-queue slots.
#[derive(Debug)]
pub struct DispatchEngine {
    /// Indexed by `[port][vl]`.
    queues: Vec<Vec<VecDeque<QueuedFlit>>>,
    /// Minimum time a flit spends in the port, `None` for cut-through.
    store_delay: Option<SimTime>,
    /// Send time of the last flit forwarded by a store-and-forward port.
    last_send_time: SimTime,
}

impl DispatchEngine {
    /// Creates empty queues for every output and VL.
    pub fn new(num_ports: usize, num_vls: usize, mode: PortMode) -> Self {
        Self {
            queues: vec![vec![VecDeque::new(); num_vls]; num_ports],
            store_delay: mode.store_delay(),
            last_send_time: SimTime::ZERO,
        }
    }

    /// Appends an accepted flit to the queue of `(port, vl)`. Returns `false` if the queue does
    /// not exist.
    pub fn enqueue(&mut self, port: PortNum, vl: Vl, flit: DataFlit, arrival: SimTime) -> bool {
        let Some(queue) = self.queue_mut(port, vl) else {
            return false;
        };

        queue.push_back(QueuedFlit { flit, arrival });
        true
    }

    /// Tries to move the oldest flit of `(port, vl)` into the arbiter. Returns whether a flit was
    /// forwarded.
    pub fn dispatch<A>(&mut self, port: PortNum, vl: Vl, now: SimTime, arbiter: &mut A) -> bool
    where
        A: Arbiter + ?Sized,
    {
        let Some(queue) = self.queues.get_mut(port).and_then(|vls| vls.get_mut(usize::from(vl)))
        else {
            return false;
        };
        let Some(QueuedFlit { flit, arrival }) = queue.pop_front() else {
            return false;
        };

        let send_at = send_time(self.store_delay, self.last_send_time, arrival, now);
        let forwarded = ForwardedFlit {
            port,
            flit,
            arrival,
            send_at,
        };
        match arbiter.try_reserve_head_of_queue(port, vl, forwarded) {
            Ok(()) => {
                if self.store_delay.is_some() {
                    self.last_send_time = send_at;
                }
                tracing::trace!(
                    port,
                    vl,
                    packet_id = flit.packet_id,
                    flit_sn = flit.flit_sn,
                    %send_at,
                    "forwarded flit"
                );
                true
            }
            Err(rejected) => {
                queue.push_front(QueuedFlit {
                    flit: rejected.flit,
                    arrival: rejected.arrival,
                });
                tracing::trace!(port, vl, queued = queue.len(), "head of queue busy");
                false
            }
        }
    }

    /// Number of flits waiting on `(port, vl)`.
    pub fn queued(&self, port: PortNum, vl: Vl) -> usize {
        self.queues
            .get(port)
            .and_then(|vls| vls.get(usize::from(vl)))
            .map_or(0, VecDeque::len)
    }

    /// Number of flits waiting on every queue.
    pub fn total_queued(&self) -> usize {
        self.queues.iter().flatten().map(VecDeque::len).sum()
    }

    /// Send time of the last flit forwarded in switch mode, zero before any.
    #[inline]
    pub const fn last_send_time(&self) -> SimTime {
        self.last_send_time
    }

    fn queue_mut(&mut self, port: PortNum, vl: Vl) -> Option<&mut VecDeque<QueuedFlit>> {
        self.queues.get_mut(port).and_then(|vls| vls.get_mut(usize::from(vl)))
    }
}

/// When a flit that arrived at `arrival` and is dispatched at `now` may leave.
///
/// A store-and-forward port holds every flit `store_delay` past its arrival and never lets a
/// flit leave at or before the previous one.
fn send_time(
    store_delay: Option<SimTime>,
    last_send_time: SimTime,
    arrival: SimTime,
    now: SimTime,
) -> SimTime {
    let Some(store_delay) = store_delay else {
        return now;
    };

    let mut target = arrival + store_delay;
    if target <= last_send_time {
        target = last_send_time + SimTime::NANOSECOND;
    }

    target.max(now)
}
