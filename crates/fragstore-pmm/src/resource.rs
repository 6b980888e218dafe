//! Resource-group accounting and the top-level `PageMemoryManager`: a
//! buddy zone per page-id width (`zone.rs`) plus per-group reserved/
//! shared/spare/stolen/overflow bookkeeping on top.

use std::collections::BTreeMap;
use std::sync::Mutex;

use fragstore_common::error::{ErrorContext, StorageError, StorageResult};

use crate::zone::Zone;

pub type ResourceGroupId = u32;

/// Caller-declared priority class for a resource group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrioClass {
    Low,
    High,
    Ultra,
}

/// The four page-id zones, each bounding the id width a caller may rely
/// on. Real deployments size each zone to cover
/// up to 16384 regions of 8 GiB; this crate takes each zone's page
/// *capacity* from [`PmmConfig`] instead of literally reserving that much
/// address space, so tests can run with zones sized in the hundreds of
/// pages rather than billions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneKind {
    Bits19,
    Bits27,
    Bits30,
    Bits32,
}

const ZONE_KINDS: [ZoneKind; 4] = [ZoneKind::Bits19, ZoneKind::Bits27, ZoneKind::Bits30, ZoneKind::Bits32];
const ZONE_BIT_WIDTHS: [u32; 4] = [19, 27, 30, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRef {
    pub zone: ZoneKind,
    pub pfn: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PmmConfig {
    pub zone_capacities: [u32; 4],
    pub shared_capacity: u32,
    pub dump_on_alloc_fail: bool,
}

impl PmmConfig {
    pub const fn default_for_tests() -> Self {
        Self {
            zone_capacities: [256, 256, 256, 256],
            shared_capacity: 1024,
            dump_on_alloc_fail: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResourceLimit {
    min: u32,
    max: u32,
    high_prio_max: u32,
    prio: PrioClass,
    curr: u32,
    spare: u32,
    stolen_reserved: u32,
    overflow_reserved: u32,
}

impl ResourceLimit {
    fn new(min: u32, max: u32, high_prio_max: u32, prio: PrioClass) -> Self {
        Self {
            min,
            max,
            high_prio_max,
            prio,
            curr: 0,
            spare: 0,
            stolen_reserved: 0,
            overflow_reserved: 0,
        }
    }
}

struct Inner {
    zones: [Zone; 4],
    groups: BTreeMap<ResourceGroupId, ResourceLimit>,
    shared_capacity: u32,
    shared_in_use: u32,
    free_reserved: u32,
    reserved: u32,
    in_use: u32,
    prio_free_limit: u32,
    ultra_prio_free_limit: u32,
    dump_on_alloc_fail: bool,
}

/// The process-wide page memory manager. A single mutex serialises
/// every operation across all zones and resource groups.
pub struct PageMemoryManager {
    inner: Mutex<Inner>,
}

impl PageMemoryManager {
    pub fn new(config: PmmConfig) -> Self {
        let zones = std::array::from_fn(|i| Zone::new(config.zone_capacities[i]));
        Self {
            inner: Mutex::new(Inner {
                zones,
                groups: BTreeMap::new(),
                shared_capacity: config.shared_capacity,
                shared_in_use: 0,
                free_reserved: 0,
                reserved: 0,
                in_use: 0,
                prio_free_limit: 0,
                ultra_prio_free_limit: 0,
                dump_on_alloc_fail: config.dump_on_alloc_fail,
            }),
        }
    }

    /// Registers (or updates) a resource group's bounds.
    pub fn set_resource_limit(&self, id: ResourceGroupId, min: u32, max: u32, high_prio_max: u32, prio: PrioClass) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.groups.entry(id).or_insert_with(|| ResourceLimit::new(min, max, high_prio_max, prio));
        entry.min = min;
        entry.max = max;
        entry.high_prio_max = high_prio_max;
        entry.prio = prio;

        inner.reserved = inner.groups.values().map(|g| g.min + g.spare + g.stolen_reserved).sum();
        inner.free_reserved = inner
            .groups
            .values()
            .map(|g| g.min.saturating_sub(g.curr.min(g.min)))
            .sum();
        self.recompute_prio_free_limits(&mut inner);
    }

    /// `ultra_prio_free_limit` ~= 4% of `shared + reserved`;
    /// `prio_free_limit` ~= `ultra_prio_free_limit` + 10% of the shared
    /// capacity above it. Refreshed on every resource-limit change rather
    /// than only at init.
    pub fn set_prio_free_limits(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.recompute_prio_free_limits(&mut inner);
    }

    fn recompute_prio_free_limits(&self, inner: &mut Inner) {
        let total = inner.shared_capacity + inner.reserved;
        inner.ultra_prio_free_limit = total * 4 / 100;
        let shared_above = inner.shared_capacity.saturating_sub(inner.ultra_prio_free_limit);
        inner.prio_free_limit = inner.ultra_prio_free_limit + shared_above * 10 / 100;
    }

    fn zone_index_for_bits(bits: u32) -> StorageResult<usize> {
        ZONE_BIT_WIDTHS
            .iter()
            .position(|&w| w >= bits)
            .ok_or(StorageError::ResourceExhausted("no zone wide enough for requested page-id bound"))
    }

    /// Allocates a single page for `group` from the lowest zone that fits
    /// `zone_bits`. `use_spare` permits dipping into the group's
    /// pre-reserved spare headroom before falling back to shared;
    /// `use_max_part = false` disables the shared fallback entirely.
    pub fn alloc_page(&self, group_id: ResourceGroupId, zone_bits: u32, use_spare: bool, use_max_part: bool) -> StorageResult<PageRef> {
        let mut inner = self.inner.lock().unwrap();
        let zone_idx = Self::zone_index_for_bits(zone_bits)?;

        let group = inner
            .groups
            .get(&group_id)
            .copied()
            .ok_or(StorageError::ResourceExhausted("unknown resource group"))?;

        let reserved_cap = group.min + if use_spare { group.spare } else { 0 };
        let from_reserved = group.curr < reserved_cap;
        let from_shared = !from_reserved && use_max_part && group.curr < group.max && inner.shared_in_use < inner.shared_capacity;

        if !from_reserved && !from_shared {
            return Err(StorageError::ResourceExhausted("resource group at capacity"));
        }

        let pfn = inner.zones[zone_idx]
            .alloc(0)
            .ok_or(StorageError::ResourceExhausted("zone exhausted"))?;

        let group = inner.groups.get_mut(&group_id).unwrap();
        group.curr += 1;
        inner.in_use += 1;
        if from_reserved {
            inner.free_reserved -= 1;
        } else {
            inner.shared_in_use += 1;
        }

        Ok(PageRef { zone: ZONE_KINDS[zone_idx], pfn })
    }

    /// Allocates beyond `max`: first from shared ignoring the max ceiling,
    /// else by stealing a page's worth of reserved capacity from the
    /// shared pool and recording the debt in the group's
    /// `stolen_reserved`.
    pub fn alloc_spare_page(&self, group_id: ResourceGroupId, zone_bits: u32) -> StorageResult<PageRef> {
        let mut inner = self.inner.lock().unwrap();
        let zone_idx = Self::zone_index_for_bits(zone_bits)?;

        if !inner.groups.contains_key(&group_id) {
            return Err(StorageError::ResourceExhausted("unknown resource group"));
        }

        let from_shared = inner.shared_in_use < inner.shared_capacity;
        let pfn = inner.zones[zone_idx]
            .alloc(0)
            .ok_or(StorageError::ResourceExhausted("zone exhausted"))?;

        let group = inner.groups.get_mut(&group_id).unwrap();
        group.curr += 1;
        inner.in_use += 1;
        if from_shared {
            inner.shared_in_use += 1;
        } else {
            group.stolen_reserved += 1;
            inner.reserved += 1;
            inner.free_reserved = inner.free_reserved.saturating_sub(1);
        }

        Ok(PageRef { zone: ZONE_KINDS[zone_idx], pfn })
    }

    /// Used by callers that cannot tolerate failure; increments
    /// `overflow_reserved` rather than failing.
    pub fn alloc_emergency_page(&self, group_id: ResourceGroupId, zone_bits: u32) -> StorageResult<PageRef> {
        let mut inner = self.inner.lock().unwrap();
        let zone_idx = Self::zone_index_for_bits(zone_bits)?;

        if !inner.groups.contains_key(&group_id) {
            return Err(StorageError::ResourceExhausted("unknown resource group"));
        }

        let pfn = match inner.zones[zone_idx].alloc(0) {
            Some(pfn) => pfn,
            None => {
                if inner.dump_on_alloc_fail {
                    log::error!(target: "fragstore::pmm", "zone {zone_idx} exhausted on emergency alloc, ctx={}", ErrorContext::new());
                }
                return Err(StorageError::ResourceExhausted("zone exhausted on emergency alloc"));
            }
        };

        let group = inner.groups.get_mut(&group_id).unwrap();
        group.curr += 1;
        group.overflow_reserved += 1;
        inner.in_use += 1;

        Ok(PageRef { zone: ZONE_KINDS[zone_idx], pfn })
    }

    /// Returns a page: repays `overflow_reserved` first, then
    /// `stolen_reserved`, then falls through to the normal reserved/shared
    /// accounting.
    pub fn release_page(&self, group_id: ResourceGroupId, page: PageRef) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let zone_idx = ZONE_KINDS.iter().position(|z| *z == page.zone).unwrap();

        let group = inner
            .groups
            .get(&group_id)
            .copied()
            .ok_or(StorageError::ResourceExhausted("unknown resource group"))?;
        let old_curr = group.curr;

        inner.zones[zone_idx].free(page.pfn, 0);

        let group = inner.groups.get_mut(&group_id).unwrap();
        group.curr -= 1;
        inner.in_use -= 1;

        if group.overflow_reserved > 0 {
            group.overflow_reserved -= 1;
        } else if group.stolen_reserved > 0 {
            group.stolen_reserved -= 1;
            inner.reserved -= 1;
        } else if old_curr <= group.min {
            inner.free_reserved += 1;
        } else {
            inner.shared_in_use -= 1;
        }

        Ok(())
    }

    /// Allocates a run of `cnt` pages, clamped to reasonable free space,
    /// trying the highest zone downward and falling back to smaller
    /// counts no less than `min`.
    ///
    /// Within a zone, classes at or above the requested order up to
    /// order 5 are tried first so small requests never fragment a
    /// >1 MiB run; only if none of those are available does the search
    /// reach into the large classes (order 6..=15).
    pub fn alloc_pages(&self, group_id: ResourceGroupId, cnt: u32, min: u32) -> StorageResult<(PageRef, u32)> {
        let mut want = cnt.max(1);
        loop {
            let order = order_for(want);
            if let Some(result) = self.try_alloc_run(group_id, order)? {
                return Ok(result);
            }
            if want <= min {
                return Err(StorageError::ResourceExhausted("no run available at or above minimum count"));
            }
            want = (want / 2).max(min);
        }
    }

    fn try_alloc_run(&self, group_id: ResourceGroupId, order: u32) -> StorageResult<Option<(PageRef, u32)>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.groups.contains_key(&group_id) {
            return Err(StorageError::ResourceExhausted("unknown resource group"));
        }

        for zone_idx in (0..4).rev() {
            for candidate in search_sequence(order) {
                if let Some(pfn) = inner.zones[zone_idx].alloc(candidate) {
                    let group = inner.groups.get_mut(&group_id).unwrap();
                    let granted = 1u32 << candidate;
                    group.curr += granted;
                    inner.in_use += granted;
                    inner.shared_in_use += granted;
                    return Ok(Some((PageRef { zone: ZONE_KINDS[zone_idx], pfn }, granted)));
                }
            }
        }
        Ok(None)
    }

    pub fn release_pages(&self, group_id: ResourceGroupId, page: PageRef, cnt: u32) -> StorageResult<()> {
        let order = order_for(cnt);
        let mut inner = self.inner.lock().unwrap();
        let zone_idx = ZONE_KINDS.iter().position(|z| *z == page.zone).unwrap();
        inner.zones[zone_idx].free(page.pfn, order);

        let group = inner
            .groups
            .get_mut(&group_id)
            .ok_or(StorageError::ResourceExhausted("unknown resource group"))?;
        let granted = 1u32 << order;
        group.curr -= granted;
        inner.in_use -= granted;
        inner.shared_in_use -= granted;
        Ok(())
    }

    /// Debug-only cross-check of the global invariants.
    pub fn check(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        let in_use: u32 = inner.groups.values().map(|g| g.curr).sum();
        let reserved: u32 = inner.groups.values().map(|g| g.min + g.spare + g.stolen_reserved).sum();
        let allocated = reserved + inner.shared_capacity;
        in_use == inner.in_use
            && reserved == inner.reserved
            && allocated == reserved + inner.shared_capacity
            && inner.shared_in_use <= inner.shared_capacity
            && inner.zones.iter().all(|z| z.check())
    }

    pub fn snapshot(&self, group_id: ResourceGroupId) -> Option<(u32, u32, u32)> {
        let inner = self.inner.lock().unwrap();
        inner.groups.get(&group_id).map(|g| (g.curr, inner.free_reserved, inner.shared_in_use))
    }
}

fn order_for(n: u32) -> u32 {
    n.max(1).next_power_of_two().trailing_zeros().min(crate::zone::MAX_ORDER)
}

fn search_sequence(order: u32) -> Vec<u32> {
    if order >= 6 {
        (order..=crate::zone::MAX_ORDER).collect()
    } else {
        (order..=5).chain(6..=crate::zone::MAX_ORDER).collect()
    }
}
