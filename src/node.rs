//! Process-wide node setup: the singleton [`PageMemoryManager`] every
//! component allocates metadata pages from, plus the round-robin
//! worker-thread/CPU grouping that query execution is scheduled across.

use itertools::Itertools;

use fragstore_pmm::{PageMemoryManager, PmmConfig, PrioClass, ResourceGroupId};
use fragstore_topology::{build_rr_groups, CpuId, RrGroupConfig, Topology};

/// One process's worth of shared allocator + scheduling state: a single
/// process-wide instance every subsystem pulls pages from, with the
/// round-robin grouping layered on top for query thread placement.
pub struct StorageNode {
    pub pmm: PageMemoryManager,
    topology: Topology,
}

impl StorageNode {
    pub fn new(config: PmmConfig, topology: Topology) -> Self {
        Self {
            pmm: PageMemoryManager::new(config),
            topology,
        }
    }

    /// Registers a resource group's bounds and refreshes the PMM's
    /// priority free limits.
    pub fn register_resource_group(&self, id: ResourceGroupId, min: u32, max: u32, high_prio_max: u32, prio: PrioClass) {
        self.pmm.set_resource_limit(id, min, max, high_prio_max, prio);
    }

    /// Builds the round-robin group assignment for `thread_count` query
    /// worker threads over this node's discovered topology,
    /// returning each round-robin group's member CPUs paired with how
    /// many query threads were assigned to it, for the scheduler's
    /// thread-to-CPU pinning step.
    pub fn query_thread_groups(&self, thread_count: u32, config: RrGroupConfig) -> Vec<(Vec<CpuId>, usize)> {
        let (groups, assignment) = build_rr_groups(&self.topology, thread_count, config);
        let threads_per_group = assignment.into_iter().counts();
        groups
            .into_iter()
            .enumerate()
            .map(|(group_id, cpus)| (cpus, threads_per_group.get(&(group_id as u32)).copied().unwrap_or(0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_thread_groups_covers_every_rr_group_once() {
        let topology = Topology::new(vec![(0..16).collect()]);
        let node = StorageNode::new(PmmConfig::default_for_tests(), topology);
        let groups = node.query_thread_groups(16, RrGroupConfig { max_group_size: 4 });
        assert_eq!(groups.len(), 4);
        let total_cpus: usize = groups.iter().map(|(cpus, _)| cpus.len()).sum();
        assert_eq!(total_cpus, 16);
        let total_threads: usize = groups.iter().map(|(_, n)| n).sum();
        assert_eq!(total_threads, 16);
    }
}
