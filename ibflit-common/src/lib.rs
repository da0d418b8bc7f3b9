#![doc(issue_tracker_base_url = "https://github.com/chainbound/ibflit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod time;
pub use time::{SimTime, Timed};

/// A local identifier, the layer 2 address of an end port.
pub type Lid = u16;

/// A virtual lane index.
pub type Vl = u8;

/// An output port index inside a switch (or `0` on a host adapter).
pub type PortNum = usize;

/// Protocol constants shared by every ibflit crate.
pub mod constants {
    use super::Vl;

    /// The highest data VL a port can be configured with. VL 15 is reserved for management
    /// traffic and never carries data credits.
    pub const MAX_DATA_VL: Vl = 14;

    /// LID 0 is reserved and never a valid destination.
    pub const NULL_LID: super::Lid = 0;

    /// Number of physical lanes the static credit configuration is expressed for.
    pub const REFERENCE_LANES: u32 = 4;
}
