//! Round-robin thread/CPU grouping. Takes a caller-supplied topology
//! (already-discovered L3 cache groupings) and partitions worker
//! threads into round-robin groups bounded by `MAX_RR_GROUP_SIZE` by
//! repeatedly splitting, merging, and sorting the caller's groups to
//! hit a target count. Topology *discovery* (packages, cores, LLC
//! detection) is out of scope here; this module only operates on an
//! already-discovered topology description.

pub type CpuId = u32;

/// Upper bound on a single round-robin group's thread count. A
/// reasonable CPU-topology default, overridable through
/// [`RrGroupConfig`].
pub const MAX_RR_GROUP_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct RrGroupConfig {
    pub max_group_size: u32,
}

impl RrGroupConfig {
    pub const fn default_config() -> Self {
        Self { max_group_size: MAX_RR_GROUP_SIZE }
    }
}

/// An already-discovered topology: one CPU-id list per shared-L3-cache
/// grouping.
#[derive(Debug, Clone)]
pub struct Topology {
    pub l3_groups: Vec<Vec<CpuId>>,
}

impl Topology {
    pub fn new(l3_groups: Vec<Vec<CpuId>>) -> Self {
        Self { l3_groups }
    }

    pub fn total_cpus(&self) -> usize {
        self.l3_groups.iter().map(|g| g.len()).sum()
    }
}

/// The number of round-robin groups needed to host `thread_count`
/// threads at no more than `max_group_size` per group.
pub fn rr_group_count(thread_count: u32, config: RrGroupConfig) -> u32 {
    (thread_count + config.max_group_size - 1).max(config.max_group_size) / config.max_group_size
}

/// Orders groups by descending CPU count so the split/merge passes
/// below always act on the largest or smallest group first.
fn sort_by_size_desc(groups: &mut [Vec<CpuId>]) {
    groups.sort_by(|a, b| b.len().cmp(&a.len()));
}

/// Carves the largest group in half, used when there are fewer L3
/// groups than the target round-robin group count.
fn split_largest(groups: &mut Vec<Vec<CpuId>>) {
    sort_by_size_desc(groups);
    if let Some(largest) = groups.first().cloned() {
        if largest.len() < 2 {
            return;
        }
        let mid = largest.len() / 2;
        groups[0] = largest[..mid].to_vec();
        groups.push(largest[mid..].to_vec());
    }
}

/// Folds the smallest group into the next smallest, used when there are
/// more L3 groups than the target count.
fn merge_smallest_two(groups: &mut Vec<Vec<CpuId>>) {
    sort_by_size_desc(groups);
    if groups.len() < 2 {
        return;
    }
    let last = groups.pop().unwrap();
    groups.last_mut().unwrap().extend(last);
}

/// Adjusts `groups` by repeated split/merge until its length equals
/// `target_count`, then sorts by descending size.
pub fn adjust_to_group_count(mut groups: Vec<Vec<CpuId>>, target_count: u32) -> Vec<Vec<CpuId>> {
    let target = target_count as usize;
    if groups.is_empty() || target == 0 {
        return groups;
    }
    while groups.len() < target {
        let before = groups.len();
        split_largest(&mut groups);
        if groups.len() == before {
            break; // no group left with >= 2 CPUs to split further
        }
    }
    while groups.len() > target {
        merge_smallest_two(&mut groups);
    }
    sort_by_size_desc(&mut groups);
    groups
}

/// Assigns each of `num_query_instances` threads a round-robin group
/// id, cycling through groups in order so consecutive threads land on
/// different L3 domains.
pub fn assign_round_robin(groups: &[Vec<CpuId>], num_query_instances: u32) -> Vec<u32> {
    if groups.is_empty() {
        return Vec::new();
    }
    (0..num_query_instances).map(|i| (i as usize % groups.len()) as u32).collect()
}

/// Builds the round-robin group assignment for a topology end to end:
/// compute the target group count for `thread_count`, reshape the
/// topology's L3 groups to match it, then assign `thread_count` threads
/// round-robin across the reshaped groups.
pub fn build_rr_groups(topology: &Topology, thread_count: u32, config: RrGroupConfig) -> (Vec<Vec<CpuId>>, Vec<u32>) {
    let target = rr_group_count(thread_count, config);
    let groups = adjust_to_group_count(topology.l3_groups.clone(), target);
    let assignment = assign_round_robin(&groups, thread_count);
    (groups, assignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_rounds_up_to_cover_all_threads() {
        let config = RrGroupConfig { max_group_size: 4 };
        assert_eq!(rr_group_count(9, config), 3);
        assert_eq!(rr_group_count(8, config), 2);
        assert_eq!(rr_group_count(1, config), 1);
    }

    #[test]
    fn fewer_l3_groups_than_target_get_split() {
        let topo = Topology::new(vec![vec![0, 1, 2, 3, 4, 5, 6, 7]]);
        let groups = adjust_to_group_count(topo.l3_groups, 4);
        assert_eq!(groups.len(), 4);
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn more_l3_groups_than_target_get_merged() {
        let topo = Topology::new(vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
        let groups = adjust_to_group_count(topo.l3_groups, 2);
        assert_eq!(groups.len(), 2);
        let total: usize = groups.iter().map(|g| g.len()).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn round_robin_assignment_cycles_through_groups() {
        let groups = vec![vec![0, 1], vec![2, 3], vec![4, 5]];
        let assignment = assign_round_robin(&groups, 7);
        assert_eq!(assignment, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn build_rr_groups_end_to_end() {
        let topo = Topology::new(vec![(0..16).collect()]);
        let config = RrGroupConfig { max_group_size: 4 };
        let (groups, assignment) = build_rr_groups(&topo, 16, config);
        assert_eq!(groups.len(), 4);
        assert_eq!(assignment.len(), 16);
        assert!(assignment.iter().all(|&g| (g as usize) < groups.len()));
    }
}
