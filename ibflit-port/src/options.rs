use std::time::Duration;

use ibflit_common::{
    constants::{MAX_DATA_VL, REFERENCE_LANES},
    PortNum, SimTime, Vl,
};

use crate::PortError;

/// The default buffer size of the driver channels.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// The default switch store-and-forward delay.
pub const DEFAULT_STORE_DELAY: Duration = Duration::from_nanos(100);

/// Physical width of the link. Static credit sizes are configured for a 4x link and scaled by
/// `lanes / 4`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkWidth {
    X1,
    #[default]
    X4,
    X8,
    X12,
}

impl LinkWidth {
    /// Number of physical lanes.
    #[inline]
    pub const fn lanes(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X4 => 4,
            Self::X8 => 8,
            Self::X12 => 12,
        }
    }

    /// Scales a credit count expressed for a 4x link to this width. `None` on overflow.
    #[inline]
    pub const fn scale(self, credits: u32) -> Option<u32> {
        match credits.checked_mul(self.lanes()) {
            Some(scaled) => Some(scaled / REFERENCE_LANES),
            None => None,
        }
    }
}

/// Where the port sits in the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortMode {
    /// A switch input port. Packets are routed through the
    /// [`PortResolver`](crate::PortResolver), and every flit is held for at least `store_delay`
    /// after its arrival before it is sent on.
    Switch { store_delay: Duration },
    /// A host adapter input port: everything goes to output 0, cut-through.
    Host,
}

impl PortMode {
    /// Whether this is a switch input port.
    #[inline]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Self::Switch { .. })
    }

    pub(crate) fn store_delay(&self) -> Option<SimTime> {
        match self {
            Self::Switch { store_delay } => Some(SimTime::from(*store_delay)),
            Self::Host => None,
        }
    }
}

impl Default for PortMode {
    fn default() -> Self {
        Self::Switch {
            store_delay: DEFAULT_STORE_DELAY,
        }
    }
}

/// Options for a [`PortController`](crate::PortController).
#[derive(Debug, Clone)]
pub struct PortOptions {
    /// Index of this port inside its switch, used for loopback detection and load reports.
    port_num: PortNum,
    /// Highest VL carrying data.
    max_vl: Vl,
    /// Static credits per VL for a 4x link. Missing entries are 0.
    max_static: Vec<u32>,
    /// Total buffer size in credits for a 4x link.
    total_buffer_size: u32,
    /// Drop packets that overflow their VL instead of failing.
    lossy: bool,
    /// How many batches may be sent out of this port in parallel.
    max_being_sent: usize,
    /// Number of outputs this port drives.
    num_ports: usize,
    link_width: LinkWidth,
    mode: PortMode,
}

impl Default for PortOptions {
    fn default() -> Self {
        Self {
            port_num: 0,
            max_vl: 0,
            max_static: vec![64],
            total_buffer_size: 128,
            lossy: false,
            max_being_sent: 1,
            num_ports: 1,
            link_width: LinkWidth::default(),
            mode: PortMode::default(),
        }
    }
}

impl PortOptions {
    /// Sets the index of this port inside its switch.
    pub fn with_port_num(mut self, port_num: PortNum) -> Self {
        self.port_num = port_num;
        self
    }

    /// Sets the highest data VL.
    pub fn with_max_vl(mut self, max_vl: Vl) -> Self {
        self.max_vl = max_vl;
        self
    }

    /// Sets the static credits of each VL, starting at VL 0.
    pub fn with_max_static(mut self, max_static: impl Into<Vec<u32>>) -> Self {
        self.max_static = max_static.into();
        self
    }

    /// Sets the total buffer size in credits, for a 4x link.
    pub fn with_total_buffer_size(mut self, total_buffer_size: u32) -> Self {
        self.total_buffer_size = total_buffer_size;
        self
    }

    /// Drops packets that do not fit their VL instead of failing the run.
    pub fn with_lossy(mut self, lossy: bool) -> Self {
        self.lossy = lossy;
        self
    }

    /// Sets how many batches may be sent out of this port in parallel.
    pub fn with_max_being_sent(mut self, max_being_sent: usize) -> Self {
        self.max_being_sent = max_being_sent;
        self
    }

    /// Sets the number of outputs this port drives.
    pub fn with_num_ports(mut self, num_ports: usize) -> Self {
        self.num_ports = num_ports;
        self
    }

    /// Sets the link width the static credits are scaled to.
    pub fn with_link_width(mut self, link_width: LinkWidth) -> Self {
        self.link_width = link_width;
        self
    }

    /// Sets whether this is a switch or a host port.
    pub fn with_mode(mut self, mode: PortMode) -> Self {
        self.mode = mode;
        self
    }

    /// Index of this port inside its switch.
    #[inline]
    pub const fn port_num(&self) -> PortNum {
        self.port_num
    }

    /// Highest data VL.
    #[inline]
    pub const fn max_vl(&self) -> Vl {
        self.max_vl
    }

    /// Whether overflowing packets are dropped.
    #[inline]
    pub const fn lossy(&self) -> bool {
        self.lossy
    }

    /// How many batches may be sent in parallel.
    #[inline]
    pub const fn max_being_sent(&self) -> usize {
        self.max_being_sent
    }

    /// Number of outputs this port drives.
    #[inline]
    pub const fn num_ports(&self) -> usize {
        self.num_ports
    }

    /// Switch or host port.
    #[inline]
    pub const fn mode(&self) -> PortMode {
        self.mode
    }

    /// Number of data VLs, `max_vl + 1`.
    #[inline]
    pub const fn num_vls(&self) -> usize {
        self.max_vl as usize + 1
    }

    /// Validates the options and returns the per-VL static credits scaled to the link width.
    pub(crate) fn static_credits(&self) -> Result<Vec<u32>, PortError> {
        if self.max_vl > MAX_DATA_VL {
            return Err(PortError::InvalidOptions(format!(
                "max VL {} exceeds the highest data VL {MAX_DATA_VL}",
                self.max_vl
            )));
        }
        if self.max_static.len() > self.num_vls() {
            return Err(PortError::InvalidOptions(format!(
                "{} static credit entries for {} VLs",
                self.max_static.len(),
                self.num_vls()
            )));
        }
        if self.num_ports == 0 {
            return Err(PortError::InvalidOptions("a port must drive at least one output".into()));
        }
        if self.max_being_sent == 0 {
            return Err(PortError::InvalidOptions("max being sent must be at least 1".into()));
        }
        if self.mode.is_switch() && self.num_ports > 1 && self.port_num >= self.num_ports {
            return Err(PortError::PortOutOfRange {
                port: self.port_num,
                num_ports: self.num_ports,
            });
        }

        let credits = (0..self.num_vls())
            .map(|vl| self.scaled(self.max_static.get(vl).copied().unwrap_or(0)))
            .collect::<Result<Vec<u32>, _>>()?;

        let total = credits
            .iter()
            .try_fold(0u32, |total, &c| total.checked_add(c))
            .ok_or_else(|| PortError::InvalidOptions("total static credits overflow".into()))?;
        let buffer = self.scaled(self.total_buffer_size)?;
        if total > buffer {
            return Err(PortError::StaticExceedsBuffer { total, buffer });
        }

        Ok(credits)
    }

    fn scaled(&self, credits: u32) -> Result<u32, PortError> {
        self.link_width.scale(credits).ok_or_else(|| {
            PortError::InvalidOptions(format!(
                "{credits} credits overflow on a {}x link",
                self.link_width.lanes()
            ))
        })
    }
}

/// Options for a [`PortDriver`](crate::PortDriver).
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Capacity of the channel carrying events into the driver.
    pub inbound_buffer: usize,
    /// Capacity of the channel carrying outbound events out of the driver.
    pub outbound_buffer: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            inbound_buffer: DEFAULT_BUFFER_SIZE,
            outbound_buffer: DEFAULT_BUFFER_SIZE,
        }
    }
}
