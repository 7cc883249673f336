//! Per-node and per-relationship observation counters.
//!
//! Every peer's advertised system state is tallied twice: once per-node
//! (`NodeCounters`, so a single node flip-flopping doesn't double-count) and
//! once per-relationship (`RelCounters`, the figure `update_state` actually
//! compares against `n`). Both are split into `normal`/`fallback` families
//! that track the two kinds of establishment round independently.

use akm_types::MachState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SubCounters {
    pub cnts: [i32; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NodeCounters {
    pub normal: SubCounters,
    pub fallback: SubCounters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RelSubCounters {
    pub nodes: [i32; 4],
    pub decrypt_fails: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RelCounters {
    pub normal: RelSubCounters,
    pub fallback: RelSubCounters,
}

pub(crate) fn node_sub_counters_mut(n: &mut NodeCounters, mach: MachState) -> &mut SubCounters {
    if mach == MachState::FallbackEstablishing {
        &mut n.fallback
    } else {
        &mut n.normal
    }
}

pub(crate) fn rel_sub_counters(r: &RelCounters, mach: MachState) -> &RelSubCounters {
    if mach == MachState::FallbackEstablishing {
        &r.fallback
    } else {
        &r.normal
    }
}

pub(crate) fn rel_sub_counters_mut(r: &mut RelCounters, mach: MachState) -> &mut RelSubCounters {
    if mach == MachState::FallbackEstablishing {
        &mut r.fallback
    } else {
        &mut r.normal
    }
}

/// Undoes every contribution `node` made to `rel`, for removing a peer.
pub(crate) fn uncount_node_counters(rel: &mut RelCounters, node: &NodeCounters) {
    uncount_sub(&mut rel.normal, &node.normal);
    uncount_sub(&mut rel.fallback, &node.fallback);
}

fn uncount_sub(rel: &mut RelSubCounters, node: &SubCounters) {
    for i in 0..4 {
        if node.cnts[i] != 0 {
            rel.nodes[i] -= 1;
            debug_assert!(rel.nodes[i] >= 0);
        }
    }
}
