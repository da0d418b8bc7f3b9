use std::{fmt, ops::Add, time::Duration};

/// A point in simulated time, in nanoseconds since the start of the run.
///
/// Simulated time is provided by whoever schedules the events; nothing in the ibflit crates reads
/// the wall clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of the simulation.
    pub const ZERO: Self = Self(0);

    /// The smallest representable step.
    pub const NANOSECOND: Self = Self(1);

    /// A time `nanos` nanoseconds into the run.
    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the start of the run.
    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }
}

impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        // Saturates after ~584 years of simulated time.
        Self(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<SimTime> for Duration {
    fn from(time: SimTime) -> Self {
        Duration::from_nanos(time.0)
    }
}

impl Add for SimTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A value stamped with the simulated time it takes effect at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timed<T> {
    /// When the value takes effect.
    pub at: SimTime,
    /// The stamped value.
    pub inner: T,
}

impl<T> Timed<T> {
    /// Stamps `inner` with `at`.
    #[inline]
    pub const fn new(at: SimTime, inner: T) -> Self {
        Self { at, inner }
    }

    /// Maps the inner value, keeping the timestamp.
    #[inline]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timed<U> {
        Timed {
            at: self.at,
            inner: f(self.inner),
        }
    }
}
