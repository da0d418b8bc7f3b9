use rustc_hash::FxHashMap;

use ibflit_common::Lid;

use crate::PortError;

/// How a packet head relates to the previous packet of the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceClass {
    /// First packet ever seen from this source.
    First,
    /// Exactly one past the last seen.
    InOrder,
    /// Behind the last seen: the tail of an earlier reordering. Not counted.
    Tail,
    /// Skipped ahead of the last seen by `gap`.
    OutOfOrder { gap: u32 },
}

/// Tracks the last packet sequence number seen per source, and counts reordering.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    /// Uses [`FxHashMap`], LIDs are small integers.
    last: FxHashMap<Lid, u32>,
    in_order: usize,
    out_of_order: usize,
    gap: u64,
}

impl SequenceTracker {
    /// Creates a tracker that has seen no source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies the head of packet `sn` from `src`. A head repeating the last seen sequence
    /// number is a duplicate and fails.
    pub fn observe(&mut self, src: Lid, sn: u32) -> Result<SequenceClass, PortError> {
        let Some(last) = self.last.get_mut(&src) else {
            self.last.insert(src, sn);
            self.in_order += 1;
            return Ok(SequenceClass::First);
        };

        let class = if sn == *last {
            return Err(PortError::DuplicateHead { src, sn });
        } else if sn < *last {
            SequenceClass::Tail
        } else if sn - *last == 1 {
            *last = sn;
            self.in_order += 1;
            SequenceClass::InOrder
        } else {
            let gap = sn - *last;
            *last = sn;
            self.out_of_order += 1;
            self.gap += u64::from(gap);
            tracing::debug!(src, sn, gap, "out of order packet");
            SequenceClass::OutOfOrder { gap }
        };

        Ok(class)
    }

    /// The last sequence number accepted from `src`.
    pub fn last_seen(&self, src: Lid) -> Option<u32> {
        self.last.get(&src).copied()
    }

    /// Packets that arrived in order, first packets of each source included.
    #[inline]
    pub const fn in_order(&self) -> usize {
        self.in_order
    }

    /// Out of order events.
    #[inline]
    pub const fn out_of_order(&self) -> usize {
        self.out_of_order
    }

    /// Sum of the sequence jumps of every out of order event.
    #[inline]
    pub const fn gap(&self) -> u64 {
        self.gap
    }
}
