//! Canned heap states, one per failure mode, plus a healthy baseline.

use clap::ValueEnum;

use crate::{
    Address, HEAP_WORD_SIZE, HeapCreateInfo, HeapModel, MarkGeneration, ObjectHandle,
    RegionFlags, SnapshotHeap, Verifier, VerifyResult, report,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Consistent heap; every check passes
    Healthy,
    /// Reference to an address outside the heap
    OutsideHeap,
    /// Object forwarded into its own region
    SameRegionForward,
    /// Forwardee forwarded again
    MultipleForwardings,
    /// Object expected to be forwarded but self-referencing
    NotForwarded,
    /// Humongous object missing a continuation flag
    HumongousGap,
    /// Liveness closure left installed outside root processing
    ClosureInstalled,
    /// Object found in the collection set
    InCollectionSet,
    /// Live object without a complete mark
    Unmarked,
    /// Forwarding pointer used during a full GC move
    FullGcForward,
}

impl Scenario {
    pub fn name(self) -> String {
        self.to_possible_value()
            .map(|value| value.get_name().to_string())
            .unwrap_or_default()
    }

    /// Stages the scenario on a fresh heap and runs its checks in the
    /// data-returning form.
    pub fn verify(self, matrix: bool) -> VerifyResult {
        let heap = SnapshotHeap::new(HeapCreateInfo {
            region_count: Some(16),
            connectivity_matrix: Some(matrix),
            ..Default::default()
        });

        // every scenario reaches its object through the first field of `holder`
        let holder = heap.allocate(0, 4, "Holder");
        let interior = holder.address().offset(HEAP_WORD_SIZE);
        let verifier = Verifier::new(&heap).with_referrer(holder);

        match self {
            Scenario::Healthy => healthy(&heap, verifier, interior),
            Scenario::OutsideHeap => {
                verifier.verify_in_heap(ObjectHandle::from_raw(0xdead_0000), Some(interior))
            }
            Scenario::SameRegionForward => {
                let obj = heap.allocate(1, 4, "Pair");
                let neighbour = heap.allocate(1, 4, "Pair");
                heap.set_forwardee(obj, neighbour);
                verifier.verify_correct(obj, Some(interior))
            }
            Scenario::MultipleForwardings => {
                let obj = heap.allocate(1, 4, "Pair");
                let copy = heap.evacuate(obj, 2);
                heap.evacuate(copy, 3);
                verifier.verify_correct(obj, Some(interior))
            }
            Scenario::NotForwarded => {
                let obj = heap.allocate(1, 4, "Pair");
                heap.add_to_collection_set(1);
                verifier.verify_forwarded(obj, Some(interior))
            }
            Scenario::HumongousGap => {
                let words = 2 * heap.region_size_bytes() / HEAP_WORD_SIZE + 16;
                let obj = heap.allocate_humongous(words, "BigArray");
                let start = heap.region_index_containing(obj.address());
                heap.set_region_flags(start + 2, RegionFlags::ACTIVE);
                verifier.verify_in_correct_region(obj, Some(interior))
            }
            Scenario::ClosureInstalled => {
                heap.install_liveness_closure(heap.canonical_liveness_closure());
                verifier.verify_reference_processor_not_installed()
            }
            Scenario::InCollectionSet => {
                let obj = heap.allocate(4, 4, "Pair");
                heap.mark(MarkGeneration::Complete, obj);
                heap.add_to_collection_set(4);
                heap.connect(0, 4);
                verifier.verify_not_in_collection_set(obj, Some(interior))
            }
            Scenario::Unmarked => {
                let obj = heap.allocate(1, 4, "Pair");
                heap.mark(MarkGeneration::Next, obj);
                verifier.verify_marked_complete(obj, Some(interior))
            }
            Scenario::FullGcForward => {
                let obj = heap.allocate(1, 4, "Pair");
                heap.evacuate(obj, 2);
                heap.set_full_gc_move_in_progress(true);
                verifier.verify_correct(obj, Some(interior))
            }
        }
    }

    /// Like [`Scenario::verify`], but terminates through the fatal path on
    /// failure.
    #[track_caller]
    pub fn run(self, matrix: bool) {
        if let Err(failure) = self.verify(matrix) {
            report::fail(failure);
        }
    }
}

fn healthy(
    heap: &SnapshotHeap,
    verifier: Verifier<'_, SnapshotHeap>,
    field: Address,
) -> VerifyResult {
    let interior = Some(field);

    let obj = heap.allocate(1, 4, "Pair");
    heap.add_to_collection_set(1);
    let copy = heap.evacuate(obj, 2);
    for generation in MarkGeneration::ALL {
        heap.mark(generation, copy);
    }
    heap.connect(0, 1);
    heap.connect(0, 2);

    verifier.verify_in_heap(obj, interior)?;
    verifier.verify_correct(obj, interior)?;
    verifier.verify_forwarded(obj, interior)?;
    verifier.verify_not_forwarded(copy, interior)?;
    verifier.verify_in_correct_region(copy, interior)?;
    verifier.verify_marked_complete(copy, interior)?;
    verifier.verify_marked_next(copy, interior)?;
    verifier.verify_not_in_collection_set(copy, interior)?;
    verifier.verify_not_in_collection_set_loc(field)?;

    let words = heap.region_size_bytes() / HEAP_WORD_SIZE + 8;
    let big = heap.allocate_humongous(words, "BigArray");
    verifier.verify_in_correct_region(big, interior)?;

    verifier.verify_reference_processor_not_installed()?;
    heap.install_liveness_closure(heap.canonical_liveness_closure());
    verifier.verify_reference_processor_installed()?;
    heap.uninstall_liveness_closure();
    Ok(())
}
