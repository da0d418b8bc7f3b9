use ibflit_common::{Lid, PortNum};

use crate::{PortResolver, ResolveError};

/// A linear forwarding table, indexed by destination LID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardingTable {
    entries: Vec<Option<PortNum>>,
}

impl ForwardingTable {
    /// Builds a table where every LID is reachable.
    pub fn from_ports(ports: impl IntoIterator<Item = PortNum>) -> Self {
        Self {
            entries: ports.into_iter().map(Some).collect(),
        }
    }

    /// Points `lid` at `port`, growing the table as needed.
    pub fn set(&mut self, lid: Lid, port: PortNum) {
        let idx = usize::from(lid);
        if idx >= self.entries.len() {
            self.entries.resize(idx + 1, None);
        }
        self.entries[idx] = Some(port);
    }

    /// Number of LIDs covered by the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table covers no LID.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PortResolver for ForwardingTable {
    fn resolve(&self, dst: Lid) -> Result<PortNum, ResolveError> {
        match self.entries.get(usize::from(dst)) {
            Some(Some(port)) => Ok(*port),
            Some(None) => Err(ResolveError::NoRoute(dst)),
            None => Err(ResolveError::OutOfRange {
                lid: dst,
                len: self.entries.len(),
            }),
        }
    }
}
