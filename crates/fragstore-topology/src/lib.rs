//! CPU-topology round-robin grouping: given an already-discovered set
//! of CPUs sharing an L3 cache, reshape it into a target number of
//! round-robin groups and assign worker threads across them so
//! neighbouring threads land on different cache domains. Topology
//! *discovery* is out of scope; callers supply it.

pub mod rr_groups;

pub use rr_groups::{
    adjust_to_group_count, assign_round_robin, build_rr_groups, rr_group_count, CpuId, RrGroupConfig, Topology,
    MAX_RR_GROUP_SIZE,
};
