use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use ibflit_common::Vl;

/// Counters for a port. These are shared between the driver task and whoever
/// holds the port handle.
#[derive(Debug, Default)]
pub struct PortStats {
    /// Data flits received from the link, dropped ones included
    flits_received: AtomicUsize,
    /// Flits handed to the arbiter
    flits_forwarded: AtomicUsize,
    /// Packets whose head was admitted
    packets_admitted: AtomicUsize,
    /// Packets dropped in lossy mode
    dropped_packets: AtomicUsize,
    /// Credits (flits) of the dropped packets
    dropped_credits: AtomicUsize,
    /// Flow control packets received from the link
    flow_control_received: AtomicUsize,
    /// Times the local ABR was ahead of the peer FCTBS
    abr_inconsistencies: AtomicUsize,
    /// Times the local ABR had to be pulled forward to the peer FCTBS
    abr_resyncs: AtomicUsize,
    /// Batches confirmed as fully sent
    batches_completed: AtomicUsize,
}

impl PortStats {
    #[inline]
    pub(crate) fn increment_flits_received(&self) {
        self.flits_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_flits_forwarded(&self) {
        self.flits_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_packets_admitted(&self) {
        self.packets_admitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_drop(&self, credits: usize) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
        self.dropped_credits.fetch_add(credits, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_flow_control_received(&self) {
        self.flow_control_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_abr_inconsistencies(&self) {
        self.abr_inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_abr_resyncs(&self) {
        self.abr_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_batches_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Data flits received from the link, dropped ones included.
    #[inline]
    pub fn flits_received(&self) -> usize {
        self.flits_received.load(Ordering::Relaxed)
    }

    /// Flits handed to the arbiter.
    #[inline]
    pub fn flits_forwarded(&self) -> usize {
        self.flits_forwarded.load(Ordering::Relaxed)
    }

    /// Packets whose head was admitted.
    #[inline]
    pub fn packets_admitted(&self) -> usize {
        self.packets_admitted.load(Ordering::Relaxed)
    }

    /// Packets dropped in lossy mode.
    #[inline]
    pub fn dropped_packets(&self) -> usize {
        self.dropped_packets.load(Ordering::Relaxed)
    }

    /// Credits of the dropped packets.
    #[inline]
    pub fn dropped_credits(&self) -> usize {
        self.dropped_credits.load(Ordering::Relaxed)
    }

    /// Flow control packets received from the link.
    #[inline]
    pub fn flow_control_received(&self) -> usize {
        self.flow_control_received.load(Ordering::Relaxed)
    }

    /// Times the local ABR was ahead of the peer FCTBS.
    #[inline]
    pub fn abr_inconsistencies(&self) -> usize {
        self.abr_inconsistencies.load(Ordering::Relaxed)
    }

    /// Times the local ABR was pulled forward to the peer FCTBS.
    #[inline]
    pub fn abr_resyncs(&self) -> usize {
        self.abr_resyncs.load(Ordering::Relaxed)
    }

    /// Batches confirmed as fully sent.
    #[inline]
    pub fn batches_completed(&self) -> usize {
        self.batches_completed.load(Ordering::Relaxed)
    }
}

/// An integer histogram with unit-wide buckets.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    buckets: BTreeMap<u32, u64>,
    count: u64,
    sum: f64,
    sum_sq: f64,
}

impl Histogram {
    /// Records one sample.
    pub fn record(&mut self, value: u32) {
        *self.buckets.entry(value).or_default() += 1;
        self.count += 1;
        let value = f64::from(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Number of samples.
    #[inline]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the samples, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Largest sample.
    pub fn max(&self) -> Option<u32> {
        self.buckets.keys().next_back().copied()
    }

    /// Sample standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let variance = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
        variance.max(0.0).sqrt()
    }
}

/// Static credit usage of one VL over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct VlUsage {
    /// The VL sampled.
    pub vl: Vl,
    /// Number of times the free static credits were sampled.
    pub samples: u64,
    /// Mean free static credits.
    pub mean_free: f64,
    /// Most free static credits seen.
    pub max_free: u32,
    /// Sample standard deviation of the free static credits.
    pub stddev_free: f64,
}

/// A summary of a port's activity, taken at teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct PortReport {
    /// One entry per configured VL.
    pub vls: Vec<VlUsage>,
    /// Mean of the total used static credits, sampled on every sent confirmation.
    pub mean_used_static: f64,
    /// Data flits received from the link, dropped ones included.
    pub flits_received: usize,
    /// Flits handed to the arbiter.
    pub flits_forwarded: usize,
    /// Flits accepted but still waiting for their head-of-queue slot.
    pub queued_flits: usize,
    /// Packets whose head was admitted.
    pub packets_admitted: usize,
    /// Packets dropped in lossy mode.
    pub dropped_packets: usize,
    /// Credits (flits) of the dropped packets.
    pub dropped_credits: usize,
    /// Packets that followed their predecessor from the same source.
    pub in_order_packets: usize,
    /// Packets that skipped ahead of their source sequence.
    pub out_of_order_packets: usize,
    /// Sum of the sequence gaps of the out of order packets.
    pub out_of_order_gap: u64,
    /// Times the local ABR was ahead of the peer FCTBS.
    pub abr_inconsistencies: usize,
    /// Times the local ABR was pulled forward to the peer FCTBS.
    pub abr_resyncs: usize,
}
