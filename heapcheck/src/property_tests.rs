//! Property tests for the verifier against randomly staged heaps.
//!
//! - single evacuations always pass `verify_correct` and resolve in one hop
//! - arbitrary addresses are classified without dereferencing anything
//! - every broken continuation in a humongous span is reported by index
//! - reports are a pure function of heap state

use proptest::prelude::*;

use crate::{
    Address, HEAP_WORD_SIZE, HeapCreateInfo, HeapModel, MarkGeneration, ObjectHandle,
    RegionFlags, SafetyTier, SnapshotHeap, Verifier, Violation, resolve_raw,
};

const REGIONS: usize = 16;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn heap() -> SnapshotHeap {
    SnapshotHeap::new(HeapCreateInfo {
        region_count: Some(REGIONS),
        region_size: Some(4096),
        connectivity_matrix: Some(true),
        ..Default::default()
    })
}

fn region_words(heap: &SnapshotHeap) -> usize {
    heap.region_size_bytes() / HEAP_WORD_SIZE
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn evacuation_resolves_in_one_hop(
        from in 0..REGIONS / 2,
        to in REGIONS / 2..REGIONS,
        size in 1usize..64,
    ) {
        let heap = heap();
        let verifier = Verifier::new(&heap);
        let obj = heap.allocate(from, size, "Node");
        let copy = heap.evacuate(obj, to);

        let fwd = resolve_raw(&heap, obj);
        prop_assert_eq!(fwd, copy);
        prop_assert_eq!(resolve_raw(&heap, fwd), fwd);
        prop_assert_ne!(
            heap.region_index_containing(fwd.address()),
            heap.region_index_containing(obj.address())
        );

        prop_assert!(verifier.verify_correct(obj, None).is_ok());
        prop_assert!(verifier.verify_forwarded(obj, None).is_ok());
        prop_assert!(verifier.verify_not_forwarded(copy, None).is_ok());
    }

    #[test]
    fn arbitrary_addresses_are_classified(raw in any::<usize>(), with_referrer in any::<bool>()) {
        let heap = heap();
        let holder = heap.allocate(0, 2, "Holder");
        let verifier = if with_referrer {
            Verifier::new(&heap).with_referrer(holder)
        } else {
            Verifier::new(&heap)
        };
        let obj = ObjectHandle::from_raw(raw);
        // nothing was ever allocated past region 0
        prop_assume!(heap.region_index_containing(obj.address()) != 0);

        let failure = verifier
            .verify_correct(obj, Some(holder.address().offset(HEAP_WORD_SIZE)))
            .expect_err("no object lives there");
        if heap.is_in(obj.address()) {
            prop_assert_eq!(failure.violation, Violation::ForwardeeOutsideHeap);
            prop_assert_eq!(failure.tier, SafetyTier::ObjectSafe);
        } else {
            prop_assert_eq!(failure.violation, Violation::ObjectOutsideHeap);
            prop_assert_eq!(failure.tier, SafetyTier::Unknown);
            let minimal = format!("{} - safe print, no details", obj.address());
            prop_assert!(failure.report.to_string().contains(&minimal));
        }
    }

    #[test]
    fn humongous_gap_names_the_region(
        extra in 1usize..3 * 512,
        pick in any::<prop::sample::Index>(),
    ) {
        let heap = heap();
        let words = region_words(&heap) + extra;
        let obj = heap.allocate_humongous(words, "Blob");
        let verifier = Verifier::new(&heap);
        prop_assert!(verifier.verify_in_correct_region(obj, None).is_ok());

        let start = heap.region_index_containing(obj.address());
        let count = heap.required_regions((words + 1) * HEAP_WORD_SIZE);
        prop_assume!(count > 1);
        let broken = start + 1 + pick.index(count - 1);
        heap.set_region_flags(broken, RegionFlags::ACTIVE);

        let failure = verifier
            .verify_in_correct_region(obj, None)
            .expect_err("continuation was cleared");
        prop_assert_eq!(failure.violation, Violation::BadHumongousContinuation { region: broken });
        prop_assert_eq!(failure.tier, SafetyTier::ObjectSafe);
    }

    #[test]
    fn reports_depend_only_on_state(
        marked in any::<bool>(),
        in_cset in any::<bool>(),
        connected in any::<bool>(),
    ) {
        let heap = heap();
        let holder = heap.allocate(0, 2, "Holder");
        let obj = heap.allocate(3, 4, "Node");
        if marked {
            heap.mark(MarkGeneration::Complete, obj);
        }
        if in_cset {
            heap.add_to_collection_set(3);
        }
        if connected {
            heap.connect(0, 3);
        }

        let verifier = Verifier::new(&heap).with_referrer(holder);
        let interior = Some(Address::new(holder.address().raw() + HEAP_WORD_SIZE));
        let run = || verifier.verify_not_in_collection_set(obj, interior).err();
        let first = run();
        let second = run();

        prop_assert_eq!(first.is_some(), in_cset);
        prop_assert_eq!(
            first.map(|failure| failure.report.to_string()),
            second.map(|failure| failure.report.to_string())
        );
    }
}
