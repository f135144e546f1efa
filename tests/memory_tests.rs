// Integration tests for the flat memory, the allocator and the label registry

use amiexec::emulator::errors::EmuError;
use amiexec::memory::alloc::{Allocation, Allocator};
use amiexec::memory::flat::Memory;
use amiexec::memory::label::{LabelRange, LabelRegistry};
use amiexec::memory::AddressSpace;

fn span(a: &Allocation) -> (u32, u32) {
    (a.address(), a.address() + ((a.size().max(1) + 3) & !3))
}

#[test]
fn test_memory_is_big_endian() {
    let mut mem = Memory::new(0x100);
    mem.w32(0x10, 0x1122_3344).expect("in ram");
    assert_eq!(mem.r8(0x10).expect("in ram"), 0x11);
    assert_eq!(mem.r16(0x12).expect("in ram"), 0x3344);
    assert_eq!(mem.read_bytes(0x10, 4).expect("in ram"), &[0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn test_memory_faults_outside_ram() {
    let mut mem = Memory::new(0x100);
    let fault = mem.w32(0xFE, 1).expect_err("crosses the end of ram");
    assert_eq!(fault.address, 0xFE);
    assert_eq!(fault.width, 4);
    assert!(fault.write);

    let guard = mem.reserve_special_range(0x100);
    assert!(guard >= 0x100);
    assert_eq!(guard % 0x1_0000, 0);
    assert!(mem.is_special(guard + 0x24));
    assert!(!mem.is_special(0x10));
    let fault = mem.r16(guard + 0x24).expect_err("special ranges are unbacked");
    assert!(!fault.write);
}

#[test]
fn test_allocations_never_overlap_under_churn() {
    let mut alloc = Allocator::new(0x1000, 0x20000);
    let mut live: Vec<Allocation> = Vec::new();

    for round in 0..20u32 {
        for i in 0..10u32 {
            let size = 1 + (round * 37 + i * 13) % 300;
            let a = alloc.allocate("churn", size, 4).expect("fits");
            assert_eq!(a.address() % 4, 0);
            live.push(a);
        }
        // Free every other block
        let mut keep = Vec::new();
        for (i, a) in live.drain(..).enumerate() {
            if i % 2 == 0 {
                alloc.free(&a).expect("live");
            } else {
                keep.push(a);
            }
        }
        live = keep;

        let mut spans: Vec<_> = live.iter().map(span).collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap: {:?}", pair);
        }
        assert!(spans.iter().all(|&(lo, hi)| lo >= 0x1000 && hi <= 0x20000));
    }

    assert_eq!(alloc.live_count(), live.len());
    for a in &live {
        alloc.free(a).expect("live");
    }
    assert_eq!(alloc.live_count(), 0);
    assert_eq!(alloc.largest_free(), 0x1F000);
}

#[test]
fn test_double_free_is_rejected() {
    let mut alloc = Allocator::new(0x1000, 0x2000);
    let a = alloc.allocate("a", 16, 4).expect("fits");
    alloc.free(&a).expect("first free");
    assert_eq!(
        alloc.free(&a),
        Err(EmuError::DoubleFreeOrInvalidHandle { address: a.address() })
    );
}

#[test]
fn test_stale_handle_does_not_free_new_block() {
    let mut alloc = Allocator::new(0x1000, 0x2000);
    let old = alloc.allocate("old", 16, 4).expect("fits");
    alloc.free(&old).expect("live");
    let new = alloc.allocate("new", 16, 4).expect("fits");
    assert_eq!(new.address(), old.address());

    assert!(alloc.free(&old).is_err());
    assert!(alloc.is_live(&new));
    assert_eq!(alloc.name_of(&new), Some("new"));
}

#[test]
fn test_out_of_memory_reports_largest_free() {
    let mut alloc = Allocator::new(0x1000, 0x2000);
    let _a = alloc.allocate("a", 0x800, 4).expect("fits");
    match alloc.allocate("big", 0x900, 4) {
        Err(EmuError::OutOfMemory {
            requested,
            largest_free,
        }) => {
            assert_eq!(requested, 0x900);
            assert_eq!(largest_free, 0x800);
        }
        other => panic!("expected OutOfMemory, got {:?}", other),
    }
}

#[test]
fn test_sizes_near_the_address_limit_are_out_of_memory() {
    let mut alloc = Allocator::new(0x1000, 0x10000);
    for (size, align) in [(u32::MAX - 1, 4), (u32::MAX, 4), (16, 0x8000_0001), (0x100, u32::MAX)] {
        assert!(
            matches!(
                alloc.allocate("huge", size, align),
                Err(EmuError::OutOfMemory { requested, .. }) if requested == size
            ),
            "size {:#x} align {:#x}",
            size,
            align
        );
    }
    assert_eq!(alloc.live_count(), 0);
    assert_eq!(alloc.free_bytes(), 0xF000);

    let a = alloc.allocate("a", 16, 4).expect("fits");
    let b = alloc.allocate("b", 16, 4).expect("fits");
    assert_ne!(a.address(), b.address());
}

#[test]
fn test_alignment_and_coalescing() {
    let mut alloc = Allocator::new(0x1000, 0x3000);
    let a = alloc.allocate("a", 6, 4).expect("fits");
    let b = alloc.allocate("b", 3, 64).expect("fits");
    let c = alloc.allocate("c", 100, 4).expect("fits");
    assert_eq!(b.address() % 64, 0);

    alloc.free(&a).expect("live");
    alloc.free(&c).expect("live");
    alloc.free(&b).expect("live");
    assert_eq!(alloc.free_bytes(), 0x2000);
    assert_eq!(alloc.largest_free(), 0x2000);
}

#[test]
fn test_orphans_are_reported_not_freed() {
    let mut alloc = Allocator::new(0x1000, 0x2000);
    let freed = alloc.allocate("freed", 32, 4).expect("fits");
    let kept = alloc.allocate("leaked", 256, 4).expect("fits");
    alloc.free(&freed).expect("live");

    let orphans = alloc.dump_orphans();
    assert_eq!(orphans, vec![kept.clone()]);
    assert_eq!(orphans[0].size(), 256);
    assert!(alloc.is_live(&kept));
    assert_eq!(alloc.live_bytes(), 256);
}

#[test]
fn test_label_resolve_prefers_smallest_range() {
    let mut labels = LabelRegistry::new();
    labels.add(LabelRange::new("region", 0x1000, 0x1000).expect("non-empty"));
    labels.add(LabelRange::new("block", 0x1100, 0x40).expect("non-empty"));

    assert_eq!(labels.resolve(0x1110).map(|r| r.name.as_str()), Some("block"));
    assert_eq!(labels.resolve(0x1140).map(|r| r.name.as_str()), Some("region"));
    assert_eq!(labels.resolve(0x2000), None);
}

#[test]
fn test_label_tie_goes_to_latest() {
    let mut labels = LabelRegistry::new();
    labels.add(LabelRange::new("first", 0x100, 0x10).expect("non-empty"));
    let second = labels.add(LabelRange::new("second", 0x100, 0x10).expect("non-empty"));
    assert_eq!(labels.resolve(0x104).map(|r| r.name.as_str()), Some("second"));

    let removed = labels.remove(second).expect("registered");
    assert_eq!(removed.name, "second");
    assert_eq!(labels.resolve(0x104).map(|r| r.name.as_str()), Some("first"));
    assert!(labels.remove(second).is_none());
}

#[test]
fn test_label_removal_keeps_registration_order() {
    let mut labels = LabelRegistry::new();
    let first = labels.add(LabelRange::new("first", 0x100, 0x10).expect("non-empty"));
    let middle = labels.add(LabelRange::new("middle", 0x100, 0x10).expect("non-empty"));
    let last = labels.add(LabelRange::new("last", 0x100, 0x10).expect("non-empty"));

    assert_eq!(labels.remove(last).map(|r| r.name), Some("last".to_string()));
    assert_eq!(labels.resolve(0x108).map(|r| r.name.as_str()), Some("middle"));
    assert!(labels.remove(last).is_none());
    assert!(labels.get(last).is_none());

    labels.remove(middle);
    assert_eq!(labels.resolve(0x108).map(|r| r.name.as_str()), Some("first"));
    let names: Vec<_> = labels.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["first"]);
    assert_eq!(labels.get(first).map(|r| r.start), Some(0x100));
}

#[test]
fn test_empty_label_is_rejected() {
    assert!(LabelRange::new("empty", 0x100, 0).is_none());
    let top = LabelRange::new("top", 0xFFFF_FFF0, 0x10).expect("non-empty");
    assert!(top.contains(0xFFFF_FFFF));
    assert_eq!(top.end(), 0x1_0000_0000);
}

#[test]
fn test_labeled_allocation_drops_label_on_free() {
    let mut space = AddressSpace::new(0x10000, 0x1000);
    let block = space.alloc_labeled("buffer", 64).expect("fits");
    assert_eq!(
        space.labels.resolve(block.address() + 8).map(|r| r.name.as_str()),
        Some("buffer")
    );
    space.free_labeled(&block).expect("live");
    assert!(space.labels.resolve(block.address() + 8).is_none());
    assert!(space.free_labeled(&block).is_err());
}
