#![doc(issue_tracker_base_url = "https://github.com/chainbound/ibflit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

/// Framing of the messages exchanged between link peers.
pub mod link;

pub use link::{DataFlit, FlowControlPacket, Frame, LinkMessage};
