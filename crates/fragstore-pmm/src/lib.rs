//! Process-wide Page Memory Manager.

pub mod resource;
pub mod zone;

pub use resource::{PageMemoryManager, PageRef, PmmConfig, PrioClass, ResourceGroupId, ZoneKind};

#[cfg(test)]
mod tests {
    use super::*;

    /// End-to-end fixed-size alloc/release round trip.
    #[test]
    fn fixed_size_alloc_release_round_trip() {
        let pmm = PageMemoryManager::new(PmmConfig::default_for_tests());
        pmm.set_resource_limit(1, 100, 200, 200, PrioClass::Low);

        let mut pages = Vec::new();
        for i in 0..150 {
            let p = pmm.alloc_page(1, 32, false, true).unwrap();
            pages.push(p);
            if i == 99 {
                let (_curr, free_reserved, shared_in_use) = pmm.snapshot(1).unwrap();
                assert_eq!(free_reserved, 0);
                assert_eq!(shared_in_use, 50);
            }
        }
        assert!(pmm.check());

        for p in pages.into_iter().rev() {
            pmm.release_page(1, p).unwrap();
        }

        let (curr, free_reserved, shared_in_use) = pmm.snapshot(1).unwrap();
        assert_eq!(curr, 0);
        assert_eq!(free_reserved, 100);
        assert_eq!(shared_in_use, 0);
        assert!(pmm.check());
    }

    #[test]
    fn zero_and_oversized_requests_fail_cleanly() {
        let pmm = PageMemoryManager::new(PmmConfig::default_for_tests());
        pmm.set_resource_limit(1, 10, 10, 10, PrioClass::Low);

        assert!(pmm.alloc_pages(1, 0, 1).is_ok()); // n=0 clamps to 1 page
        assert!(pmm.alloc_pages(1, 1 << 20, 1 << 20).is_err());
        assert!(pmm.check());
    }

    #[test]
    fn unknown_zone_bits_fail_without_partial_state() {
        let pmm = PageMemoryManager::new(PmmConfig::default_for_tests());
        pmm.set_resource_limit(1, 10, 10, 10, PrioClass::Low);
        assert!(pmm.alloc_page(1, 64, false, true).is_err());
        assert!(pmm.check());
    }
}
