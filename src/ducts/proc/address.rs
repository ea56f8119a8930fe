use std::fmt;

use serde::{Deserialize, Serialize};

use crate::distributed::{CommId, Tag};
use crate::topology::{ProcId, ThreadId};

/// Endpoints of one process-crossing edge.
///
/// The inlet (sending) half lives on `inlet_proc` and sends to `outlet_proc`;
/// the outlet (receiving) half lives on `outlet_proc` and receives from
/// `inlet_proc`. Ordering is lexicographic over
/// `(outlet_proc, inlet_proc, outlet_thread, inlet_thread, tag, comm)`, so
/// pool members sort identically on both processes.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InterProcAddress {
    pub outlet_proc: ProcId,
    pub inlet_proc: ProcId,
    pub outlet_thread: ThreadId,
    pub inlet_thread: ThreadId,
    pub tag: Tag,
    pub comm: CommId,
}

/// Pair of `(process, thread)` endpoints that pooled edges share.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub inlet_proc: ProcId,
    pub inlet_thread: ThreadId,
    pub outlet_proc: ProcId,
    pub outlet_thread: ThreadId,
    pub comm: CommId,
}

impl InterProcAddress {
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            inlet_proc: self.inlet_proc,
            inlet_thread: self.inlet_thread,
            outlet_proc: self.outlet_proc,
            outlet_thread: self.outlet_thread,
            comm: self.comm,
        }
    }

    /// Same address carrying a different tag.
    pub fn with_tag(self, tag: Tag) -> Self {
        Self { tag, ..self }
    }
}

impl fmt::Display for InterProcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{}:t{} -> p{}:t{} tag {} on {}",
            self.inlet_proc,
            self.inlet_thread,
            self.outlet_proc,
            self.outlet_thread,
            self.tag,
            self.comm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(outlet_proc: ProcId, tag: Tag) -> InterProcAddress {
        InterProcAddress {
            outlet_proc,
            inlet_proc: 0,
            outlet_thread: 0,
            inlet_thread: 0,
            tag,
            comm: CommId::WORLD,
        }
    }

    #[test]
    fn orders_outlet_proc_before_tag() {
        assert!(addr(0, 9) < addr(1, 0));
        assert!(addr(1, 0) < addr(1, 1));
    }

    #[test]
    fn tag_does_not_affect_pool_key() {
        assert_eq!(addr(1, 3).pool_key(), addr(1, 7).pool_key());
        assert_ne!(addr(1, 3).pool_key(), addr(2, 3).pool_key());
    }

    #[test]
    fn serde_json_round_trip() {
        let a = addr(2, 5);
        let json = serde_json::to_string(&a).unwrap();
        let back: InterProcAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
