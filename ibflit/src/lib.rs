#![doc(issue_tracker_base_url = "https://github.com/chainbound/ibflit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub use ibflit_common::*;
pub use ibflit_port::*;
pub use ibflit_wire::link;
