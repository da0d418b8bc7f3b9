use ibflit_common::Vl;

use crate::{stats::Histogram, PortError};

/// Credit state of a single VL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlCredits {
    /// Configured static credits.
    pub max_static: u32,
    /// Static credits not holding a flit. Always `<= max_static`.
    pub static_free: u32,
    /// Adjusted Blocks Received: flits received on this VL since the link came up, resynced to
    /// the peer's FCTBS when it runs ahead.
    pub abr: u64,
}

/// Outcome of reconciling the local ABR with a peer FCTBS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// Both sides agree on the number of flits.
    InSync,
    /// We counted more flits than the peer claims to have sent. Left untouched.
    AheadOfPeer { abr: u64, fctbs: u64 },
    /// The peer sent flits we never counted; ABR was pulled forward.
    Resynced { from: u64, to: u64 },
}

/// Per-VL static credit accounting of one input port.
#[derive(Debug, Clone)]
pub struct CreditLedger {
    vls: Vec<VlCredits>,
    /// Free static credits, sampled after every consumption.
    usage: Vec<Histogram>,
}

impl CreditLedger {
    /// Creates a ledger with every VL fully free. `max_static[vl]` is the capacity of VL `vl`.
    pub fn new(max_static: &[u32]) -> Self {
        let vls = max_static
            .iter()
            .map(|&max_static| VlCredits {
                max_static,
                static_free: max_static,
                abr: 0,
            })
            .collect();

        Self {
            vls,
            usage: vec![Histogram::default(); max_static.len()],
        }
    }

    /// Number of VLs with a credit account.
    #[inline]
    pub fn num_vls(&self) -> usize {
        self.vls.len()
    }

    /// The full credit state of `vl`, `None` if it has no account.
    #[inline]
    pub fn credits(&self, vl: Vl) -> Option<&VlCredits> {
        self.vls.get(usize::from(vl))
    }

    /// Static credits of `vl` not holding a flit.
    pub fn static_free(&self, vl: Vl) -> Result<u32, PortError> {
        self.get(vl).map(|c| c.static_free)
    }

    /// Configured static credits of `vl`.
    pub fn max_static(&self, vl: Vl) -> Result<u32, PortError> {
        self.get(vl).map(|c| c.max_static)
    }

    /// Adjusted Blocks Received on `vl`.
    pub fn abr(&self, vl: Vl) -> Result<u64, PortError> {
        self.get(vl).map(|c| c.abr)
    }

    /// Static credits holding a flit, summed over every VL.
    pub fn used_static(&self) -> u32 {
        self.vls.iter().map(|c| c.max_static - c.static_free).sum()
    }

    /// Histogram of free static credits of `vl`, sampled on every reservation.
    pub fn usage(&self, vl: Vl) -> Option<&Histogram> {
        self.usage.get(usize::from(vl))
    }

    /// Whether `n` credits could be reserved on `vl` right now.
    pub fn can_reserve(&self, vl: Vl, n: u32) -> Result<bool, PortError> {
        Ok(self.get(vl)?.static_free >= n)
    }

    /// Takes `n` static credits of `vl`, counting them in the ABR.
    pub fn reserve(&mut self, vl: Vl, n: u32) -> Result<(), PortError> {
        let credits = self.get_mut(vl)?;
        if credits.static_free < n {
            return Err(PortError::InsufficientCredit {
                vl,
                required: n,
                available: credits.static_free,
            });
        }

        credits.static_free -= n;
        credits.abr += u64::from(n);
        let (free, abr) = (credits.static_free, credits.abr);
        self.usage[usize::from(vl)].record(free);

        tracing::trace!(vl, abr, free, "reserved {n} credits");
        Ok(())
    }

    /// Returns one static credit of `vl`. Releasing into a full VL is a credit leak.
    pub fn release(&mut self, vl: Vl) -> Result<(), PortError> {
        let credits = self.get_mut(vl)?;
        if credits.static_free >= credits.max_static {
            return Err(PortError::CreditLeak {
                vl,
                max_static: credits.max_static,
            });
        }

        credits.static_free += 1;
        Ok(())
    }

    /// The FCCL to advertise to the peer for `vl`.
    ///
    /// A lossless port advertises only what it can hold (`ABR + free`); a lossy port always
    /// advertises its full capacity (`ABR + max`) and drops what doesn't fit.
    pub fn advertise(&self, vl: Vl, lossy: bool) -> Result<u64, PortError> {
        let credits = self.get(vl)?;
        let room = if lossy {
            credits.max_static
        } else {
            credits.static_free
        };
        Ok(credits.abr + u64::from(room))
    }

    /// Reconciles the ABR of `vl` with the FCTBS reported by the peer.
    pub fn reconcile(&mut self, vl: Vl, fctbs: u64) -> Result<Reconcile, PortError> {
        let credits = self.get_mut(vl)?;
        let outcome = match credits.abr.cmp(&fctbs) {
            std::cmp::Ordering::Equal => Reconcile::InSync,
            std::cmp::Ordering::Greater => Reconcile::AheadOfPeer {
                abr: credits.abr,
                fctbs,
            },
            std::cmp::Ordering::Less => {
                let from = credits.abr;
                credits.abr = fctbs;
                Reconcile::Resynced { from, to: fctbs }
            }
        };

        Ok(outcome)
    }

    fn get(&self, vl: Vl) -> Result<&VlCredits, PortError> {
        let max_vl = self.max_vl();
        self.vls.get(usize::from(vl)).ok_or(PortError::VlOutOfRange { vl, max_vl })
    }

    fn get_mut(&mut self, vl: Vl) -> Result<&mut VlCredits, PortError> {
        let max_vl = self.max_vl();
        self.vls.get_mut(usize::from(vl)).ok_or(PortError::VlOutOfRange { vl, max_vl })
    }

    fn max_vl(&self) -> Vl {
        Vl::try_from(self.vls.len().saturating_sub(1)).unwrap_or(Vl::MAX)
    }
}
