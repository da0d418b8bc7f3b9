use std::sync::Arc;

use parking_lot::Mutex;

use ibflit_common::{PortNum, Vl};

use crate::{Arbiter, ForwardedFlit};

/// Head-of-queue slots shared between input ports and the arbitration stage, one per
/// `(output port, VL)`.
///
/// Each slot sits behind its own mutex, so filling a slot is a single check-and-set even when
/// input ports run on different tasks.
#[derive(Debug)]
pub struct HoqSlots {
    num_vls: usize,
    /// Indexed by `port * num_vls + vl`.
    slots: Vec<Mutex<Option<ForwardedFlit>>>,
}

impl HoqSlots {
    /// Creates a free slot for every `(port, vl)`.
    pub fn new(num_ports: usize, num_vls: usize) -> Self {
        Self {
            num_vls,
            slots: (0..num_ports * num_vls).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Places `flit` into the slot of `(port, vl)` if it is free. Hands the flit back otherwise,
    /// or if the slot doesn't exist.
    pub fn try_fill(
        &self,
        port: PortNum,
        vl: Vl,
        flit: ForwardedFlit,
    ) -> Result<(), ForwardedFlit> {
        let Some(slot) = self.slot(port, vl) else {
            return Err(flit);
        };

        let mut slot = slot.lock();
        if slot.is_some() {
            return Err(flit);
        }

        *slot = Some(flit);
        Ok(())
    }

    /// Empties the slot of `(port, vl)`, returning what it held.
    pub fn take(&self, port: PortNum, vl: Vl) -> Option<ForwardedFlit> {
        self.slot(port, vl)?.lock().take()
    }

    /// Whether the slot of `(port, vl)` exists and is empty.
    pub fn is_free(&self, port: PortNum, vl: Vl) -> bool {
        self.slot(port, vl).is_some_and(|slot| slot.lock().is_none())
    }

    fn slot(&self, port: PortNum, vl: Vl) -> Option<&Mutex<Option<ForwardedFlit>>> {
        let vl = usize::from(vl);
        if vl >= self.num_vls {
            return None;
        }
        self.slots.get(port.checked_mul(self.num_vls)?.checked_add(vl)?)
    }
}

impl Arbiter for HoqSlots {
    fn try_reserve_head_of_queue(
        &mut self,
        port: PortNum,
        vl: Vl,
        flit: ForwardedFlit,
    ) -> Result<(), ForwardedFlit> {
        self.try_fill(port, vl, flit)
    }
}

impl Arbiter for Arc<HoqSlots> {
    fn try_reserve_head_of_queue(
        &mut self,
        port: PortNum,
        vl: Vl,
        flit: ForwardedFlit,
    ) -> Result<(), ForwardedFlit> {
        self.try_fill(port, vl, flit)
    }
}
