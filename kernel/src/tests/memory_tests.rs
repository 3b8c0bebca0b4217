//! Memory Management Unit Tests
//!
//! Scenario tests for the first-fit heap: conservation, coalescing, reuse
//! and rejection of bad frees.

#[cfg(test)]
mod tests {
    use core::ptr::{self, NonNull};
    use std::vec::Vec;

    use crate::allocator::{BlockState, Heap, HeapError, HEADER_SIZE};
    use crate::config::BLOCK_ALIGN;
    use crate::tests::support::TestRegion;

    /// Every byte of the region is accounted for by exactly one block.
    fn assert_conserved(heap: &Heap) {
        let covered: usize = heap.blocks().map(|b| b.size + HEADER_SIZE).sum();
        assert_eq!(covered, heap.capacity());
        assert!(heap.check_invariants().is_ok());
    }

    /// Small deterministic generator so sequences are reproducible.
    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }

        fn below(&mut self, n: usize) -> usize {
            (self.next() % n as u64) as usize
        }
    }

    // ========================================
    // Allocation Tests
    // ========================================

    #[test]
    fn test_allocate_zero_returns_none() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();
        assert!(heap.allocate(0).is_none());
        assert_eq!(heap.stats().blocks, 1);
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let sizes = [1usize, 17, 100, 256, 1000, 4000];
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for size in sizes {
            let p = heap.allocate(size).unwrap().as_ptr() as usize;
            assert_eq!(p % BLOCK_ALIGN, 0);
            spans.push((p, p + size));
        }
        for (i, a) in spans.iter().enumerate() {
            for b in spans.iter().skip(i + 1) {
                assert!(a.1 <= b.0 || b.1 <= a.0, "{:x?} overlaps {:x?}", a, b);
            }
        }
        assert_conserved(&heap);
    }

    #[test]
    fn test_first_fit_reuses_lowest_hole() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let a = heap.allocate(512).unwrap();
        let _b = heap.allocate(512).unwrap();
        let c = heap.allocate(512).unwrap();
        let _d = heap.allocate(512).unwrap();

        unsafe {
            heap.deallocate(c.as_ptr()).unwrap();
            heap.deallocate(a.as_ptr()).unwrap();
        }
        let e = heap.allocate(256).unwrap();
        assert_eq!(e, a);
    }

    // ========================================
    // Coalescing Tests
    // ========================================

    #[test]
    fn test_free_between_two_free_blocks_merges_all() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let a = heap.allocate(256).unwrap();
        let b = heap.allocate(384).unwrap();
        let c = heap.allocate(512).unwrap();
        let _guard = heap.allocate(64).unwrap();

        unsafe {
            heap.deallocate(a.as_ptr()).unwrap();
            heap.deallocate(c.as_ptr()).unwrap();
        }
        let before = heap.stats().blocks;

        unsafe { heap.deallocate(b.as_ptr()).unwrap() };

        let stats = heap.stats();
        assert!(stats.largest_free >= 256 + 384 + 512 + 2 * HEADER_SIZE);
        assert_eq!(stats.blocks, before - 2);

        let first = heap.blocks().next().unwrap();
        assert_eq!(first.payload(), a.as_ptr() as usize);
        assert_eq!(first.state, BlockState::Free);
        assert_conserved(&heap);
    }

    #[test]
    fn test_free_everything_restores_single_block() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();
        let initial = heap.stats();

        let ptrs: Vec<NonNull<u8>> = (1..=8).map(|i| heap.allocate(i * 96).unwrap()).collect();
        // Free in an interleaved order so both merge directions are used.
        for p in ptrs.iter().step_by(2).chain(ptrs.iter().skip(1).step_by(2)) {
            unsafe { heap.deallocate(p.as_ptr()).unwrap() };
        }

        assert_eq!(heap.stats(), initial);
        assert_conserved(&heap);
    }

    #[test]
    fn test_no_adjacent_free_blocks_after_random_sequence() {
        let mut region = TestRegion::new(1 << 18);
        let mut heap = region.heap();
        let mut rng = XorShift(0x2545_F491_4F6C_DD1D);
        let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

        for step in 0..2000 {
            if live.is_empty() || rng.below(3) != 0 {
                let size = 1 + rng.below(3000);
                if let Some(p) = heap.allocate(size) {
                    let fill = (step % 251) as u8;
                    unsafe { ptr::write_bytes(p.as_ptr(), fill, size) };
                    live.push((p, size, fill));
                }
            } else {
                let (p, size, fill) = live.swap_remove(rng.below(live.len()));
                let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
                assert!(bytes.iter().all(|&b| b == fill), "payload clobbered");
                unsafe { heap.deallocate(p.as_ptr()).unwrap() };
            }

            let mut prev_free = false;
            for block in heap.blocks() {
                let free = block.state == BlockState::Free;
                assert!(!(prev_free && free));
                prev_free = free;
            }
            assert_conserved(&heap);
        }
    }

    // ========================================
    // Scenario Tests
    // ========================================

    #[test]
    fn test_megabyte_heap_scenario() {
        let mut region = TestRegion::new(1 << 20);
        let mut heap = region.heap();

        let a = heap.allocate(4096).unwrap();
        let b = heap.allocate(8192).unwrap();
        assert_eq!(
            b.as_ptr() as usize,
            a.as_ptr() as usize + 4096 + HEADER_SIZE
        );

        unsafe { heap.deallocate(a.as_ptr()).unwrap() };
        let c = heap.allocate(2048).unwrap();
        assert!(c.as_ptr() as usize <= a.as_ptr() as usize);
        assert_conserved(&heap);
    }

    // ========================================
    // Rejected Free Tests
    // ========================================

    #[test]
    fn test_double_free_rejected() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let a = heap.allocate(128).unwrap();
        let _b = heap.allocate(128).unwrap();
        unsafe { heap.deallocate(a.as_ptr()).unwrap() };
        let stats = heap.stats();

        let addr = a.as_ptr() as usize;
        assert_eq!(
            unsafe { heap.deallocate(a.as_ptr()) },
            Err(HeapError::DoubleFree { addr })
        );
        assert_eq!(heap.stats(), stats);
    }

    #[test]
    fn test_bad_tag_rejected() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let a = heap.allocate(256).unwrap();
        unsafe { ptr::write_bytes(a.as_ptr(), 0xAA, 256) };
        let stats = heap.stats();

        // On the grid, but the "header" in front of it is payload.
        let inner = unsafe { a.as_ptr().add(64) };
        assert_eq!(
            unsafe { heap.deallocate(inner) },
            Err(HeapError::BadTag { addr: inner as usize })
        );
        assert_eq!(heap.stats(), stats);
        assert_conserved(&heap);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();
        heap.allocate(128).unwrap();
        let stats = heap.stats();

        let below = heap.bottom() as *mut u8;
        let above = (heap.top() + 64) as *mut u8;
        let at_end = heap.top() as *mut u8;
        for p in [below, above, at_end] {
            assert_eq!(
                unsafe { heap.deallocate(p) },
                Err(HeapError::OutOfRange { addr: p as usize })
            );
        }
        assert_eq!(heap.stats(), stats);
    }

    #[test]
    fn test_misaligned_rejected() {
        let mut region = TestRegion::new(1 << 16);
        let mut heap = region.heap();

        let a = heap.allocate(128).unwrap();
        let stats = heap.stats();
        let off = unsafe { a.as_ptr().add(8) };

        assert_eq!(
            unsafe { heap.deallocate(off) },
            Err(HeapError::Misaligned { addr: off as usize })
        );
        assert_eq!(heap.stats(), stats);
        unsafe { heap.deallocate(a.as_ptr()).unwrap() };
    }

    #[test]
    fn test_reinit_forgets_blocks() {
        let mut region = TestRegion::new(1 << 16);
        let (start, end) = (region.start(), region.end());
        let mut heap = region.heap();

        heap.allocate(1024).unwrap();
        heap.allocate(2048).unwrap();
        unsafe { heap.init(start, end) };

        let stats = heap.stats();
        assert_eq!(stats.blocks, 1);
        assert_eq!(stats.used, 0);
        assert_conserved(&heap);
    }
}
