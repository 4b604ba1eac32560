//! Heap invariant checks.
//!
//! Each check comes in two forms. `verify_*` returns the failure as data and
//! is what tests and tooling call. `check_*` is the assertion form used by
//! collector code: on a violation it reports and terminates, so it only ever
//! returns when the invariant holds.
//!
//! Stronger checks re-run [`Verifier::verify_correct`] first and rely on it
//! before touching region or mark state.

use crate::{
    Address, Failure, Forwarding, HeapModel, MarkGeneration, ObjectHandle, ReferenceProcessor,
    Region, SafetyTier, Section, SourceLocation, Subject, VerifyResult, Violation,
    forwarding::resolve_raw,
    model::{allocation_bytes, allocation_words},
    report,
};

const CHECK_IN_HEAP: &str = "check_in_heap failed";
const CHECK_CORRECT: &str = "check_correct failed";
const CHECK_IN_CORRECT_REGION: &str = "check_in_correct_region failed";
const CHECK_FORWARDED: &str = "check_forwarded failed";
const CHECK_NOT_FORWARDED: &str = "check_not_forwarded failed";
const CHECK_MARKED_COMPLETE: &str = "check_marked_complete failed";
const CHECK_MARKED_NEXT: &str = "check_marked_next failed";
const CHECK_NOT_IN_CSET: &str = "check_not_in_collection_set failed";
const CHECK_NOT_IN_CSET_LOC: &str = "check_not_in_collection_set_loc failed";
const CHECK_RP_INSTALLED: &str = "check_reference_processor_installed failed";
const CHECK_RP_NOT_INSTALLED: &str = "check_reference_processor_not_installed failed";

/// Runs invariant checks against one heap.
///
/// The heap is passed in explicitly; there is no global heap. A verifier is
/// cheap to create and holds no state besides the optional referrer.
#[derive(Debug)]
pub struct Verifier<'h, H: HeapModel + ?Sized> {
    heap: &'h H,
    referrer: Option<ObjectHandle>,
}

impl<H: HeapModel + ?Sized> Clone for Verifier<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: HeapModel + ?Sized> Copy for Verifier<'_, H> {}

impl<'h, H: HeapModel + ?Sized> Verifier<'h, H> {
    pub fn new(heap: &'h H) -> Self {
        Self {
            heap,
            referrer: None,
        }
    }

    /// Records the object holding the interior locations passed to later
    /// checks. Enables the referrer object block and matrix diagnostics.
    pub fn with_referrer(self, referrer: ObjectHandle) -> Self {
        Self {
            referrer: Some(referrer),
            ..self
        }
    }

    #[track_caller]
    fn failure(
        &self,
        tier: SafetyTier,
        violation: Violation,
        obj: Option<ObjectHandle>,
        interior: Option<Address>,
        phase: &str,
    ) -> Box<Failure> {
        let subject = Subject {
            obj,
            interior,
            referrer: self.referrer,
        };
        let report = report::build(
            self.heap,
            tier,
            subject,
            phase,
            &violation.to_string(),
            SourceLocation::caller(),
        );
        Box::new(Failure {
            violation,
            tier,
            report,
        })
    }

    // ── verify_* ──────────────────────────────────────────────────────

    #[track_caller]
    pub fn verify_in_heap(&self, obj: ObjectHandle, interior: Option<Address>) -> VerifyResult {
        if !self.heap.is_in(obj.address()) {
            return Err(self.failure(
                SafetyTier::Unknown,
                Violation::ObjectOutsideHeap,
                Some(obj),
                interior,
                CHECK_IN_HEAP,
            ));
        }
        Ok(())
    }

    /// Heap membership of the object and its forwardee, then forwarding
    /// sanity: another region, not during a full GC move, one hop only.
    #[track_caller]
    pub fn verify_correct(&self, obj: ObjectHandle, interior: Option<Address>) -> VerifyResult {
        let heap = self.heap;

        // After this, region lookups for obj are safe.
        if !heap.is_in(obj.address()) {
            return Err(self.failure(
                SafetyTier::Unknown,
                Violation::ObjectOutsideHeap,
                Some(obj),
                interior,
                CHECK_CORRECT,
            ));
        }

        let fwd = resolve_raw(heap, obj);
        if !heap.is_in(fwd.address()) {
            return Err(self.failure(
                SafetyTier::ObjectSafe,
                Violation::ForwardeeOutsideHeap,
                Some(obj),
                interior,
                CHECK_CORRECT,
            ));
        }

        if fwd == obj {
            log::trace!("check_correct ok: {obj}");
            return Ok(());
        }

        // Full GC moves objects without forwarding words, only self-forwarding is legal.
        if heap.is_full_gc_move_in_progress() {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::ForwardedDuringFullGcMove,
                Some(obj),
                interior,
                CHECK_CORRECT,
            ));
        }

        let obj_region = heap.region_index_containing(obj.address());
        if heap.region_index_containing(fwd.address()) == obj_region {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::ForwardeeInSameRegion,
                Some(obj),
                interior,
                CHECK_CORRECT,
            ));
        }

        if resolve_raw(heap, fwd) != fwd {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::MultipleForwardings,
                Some(obj),
                interior,
                CHECK_CORRECT,
            ));
        }

        log::trace!("check_correct ok: {obj} -> {fwd}");
        Ok(())
    }

    /// Active region, and for humongous objects the exact start and
    /// continuation pattern over the whole span.
    #[track_caller]
    pub fn verify_in_correct_region(
        &self,
        obj: ObjectHandle,
        interior: Option<Address>,
    ) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        let heap = self.heap;

        let region = match heap.region_containing(obj.address()) {
            Some(region) if region.is_active() => region,
            _ => {
                return Err(self.failure(
                    SafetyTier::Unknown,
                    Violation::InactiveRegion,
                    Some(obj),
                    interior,
                    CHECK_IN_CORRECT_REGION,
                ));
            }
        };

        // The size comes from the object header and may be garbage.
        let Some(alloc_words) = allocation_words(heap, obj) else {
            return Err(self.span_overflow(obj, interior, region));
        };
        if alloc_words <= heap.humongous_threshold_words() {
            return Ok(());
        }

        let start = region.index();
        let Some((count, end)) = humongous_extent(heap, start, alloc_words) else {
            return Err(self.span_overflow(obj, interior, region));
        };
        for index in start..end {
            let chain = heap.region_at(index);
            if index == start {
                if !chain.is_some_and(|r| r.is_humongous_start()) {
                    let mut failure = self.failure(
                        SafetyTier::Unknown,
                        Violation::NotHumongousStart,
                        Some(obj),
                        interior,
                        CHECK_IN_CORRECT_REGION,
                    );
                    failure.report.push(humongous_span(
                        start,
                        end,
                        count,
                        index,
                        chain,
                        "humongous start",
                    ));
                    return Err(failure);
                }
            } else if !chain.is_some_and(|r| r.is_humongous_continuation()) {
                let mut failure = self.failure(
                    SafetyTier::ObjectSafe,
                    Violation::BadHumongousContinuation { region: index },
                    Some(obj),
                    interior,
                    CHECK_IN_CORRECT_REGION,
                );
                failure.report.push(humongous_span(
                    start,
                    end,
                    count,
                    index,
                    chain,
                    "humongous continuation",
                ));
                return Err(failure);
            }
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_forwarded(&self, obj: ObjectHandle, interior: Option<Address>) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        if !Forwarding::of(self.heap, obj).is_forwarded() {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::NotForwarded,
                Some(obj),
                interior,
                CHECK_FORWARDED,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_not_forwarded(
        &self,
        obj: ObjectHandle,
        interior: Option<Address>,
    ) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        if Forwarding::of(self.heap, obj).is_forwarded() {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::Forwarded,
                Some(obj),
                interior,
                CHECK_NOT_FORWARDED,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_marked_complete(
        &self,
        obj: ObjectHandle,
        interior: Option<Address>,
    ) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        if !self.heap.is_marked(MarkGeneration::Complete, obj) {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::NotMarkedComplete,
                Some(obj),
                interior,
                CHECK_MARKED_COMPLETE,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_marked_next(&self, obj: ObjectHandle, interior: Option<Address>) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        if !self.heap.is_marked(MarkGeneration::Next, obj) {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::NotMarkedNext,
                Some(obj),
                interior,
                CHECK_MARKED_NEXT,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_not_in_collection_set(
        &self,
        obj: ObjectHandle,
        interior: Option<Address>,
    ) -> VerifyResult {
        self.verify_correct(obj, interior)?;
        if self.heap.in_collection_set(obj.address()) {
            return Err(self.failure(
                SafetyTier::AllSafe,
                Violation::ObjectInCollectionSet,
                Some(obj),
                interior,
                CHECK_NOT_IN_CSET,
            ));
        }
        Ok(())
    }

    /// Collection-set test on a bare location. Nothing about `interior` is
    /// assumed, so forwarding state is not consulted.
    #[track_caller]
    pub fn verify_not_in_collection_set_loc(&self, interior: Address) -> VerifyResult {
        if self.heap.in_collection_set(interior) {
            return Err(self.failure(
                SafetyTier::Unknown,
                Violation::LocationInCollectionSet,
                None,
                Some(interior),
                CHECK_NOT_IN_CSET_LOC,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_reference_processor_installed(&self) -> VerifyResult {
        let actual = self.heap.reference_processor().active_liveness_closure();
        let expected = Some(self.heap.canonical_liveness_closure());
        if actual != expected {
            return Err(self.rp_failure(
                Violation::LivenessClosureMissing,
                actual,
                expected,
                CHECK_RP_INSTALLED,
            ));
        }
        Ok(())
    }

    #[track_caller]
    pub fn verify_reference_processor_not_installed(&self) -> VerifyResult {
        let actual = self.heap.reference_processor().active_liveness_closure();
        if actual.is_some() {
            return Err(self.rp_failure(
                Violation::LivenessClosureInstalled,
                actual,
                None,
                CHECK_RP_NOT_INSTALLED,
            ));
        }
        Ok(())
    }

    /// The object reports a size whose span cannot even be computed.
    #[track_caller]
    fn span_overflow(
        &self,
        obj: ObjectHandle,
        interior: Option<Address>,
        region: &H::Region,
    ) -> Box<Failure> {
        let start = region.index();
        let mut failure = self.failure(
            SafetyTier::ObjectSafe,
            Violation::BadHumongousContinuation {
                region: start.saturating_add(1),
            },
            Some(obj),
            interior,
            CHECK_IN_CORRECT_REGION,
        );
        let mut section = Section::new("Humongous span");
        section
            .line(format!(
                "  object size {} words overflows the address space",
                self.heap.object_size_words(obj)
            ))
            .line(format!("  region: {}", region.summary()));
        failure.report.push(section);
        failure
    }

    #[track_caller]
    fn rp_failure(
        &self,
        violation: Violation,
        actual: Option<crate::ClosureId>,
        expected: Option<crate::ClosureId>,
        phase: &str,
    ) -> Box<Failure> {
        let report = report::build_reference_processor(
            self.heap,
            phase,
            &violation.to_string(),
            actual,
            expected,
            SourceLocation::caller(),
        );
        Box::new(Failure {
            violation,
            tier: SafetyTier::Unknown,
            report,
        })
    }

    // ── check_* ───────────────────────────────────────────────────────

    #[track_caller]
    pub fn check_in_heap(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_in_heap(obj, interior));
    }

    #[track_caller]
    pub fn check_correct(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_correct(obj, interior));
    }

    #[track_caller]
    pub fn check_in_correct_region(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_in_correct_region(obj, interior));
    }

    #[track_caller]
    pub fn check_forwarded(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_forwarded(obj, interior));
    }

    #[track_caller]
    pub fn check_not_forwarded(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_not_forwarded(obj, interior));
    }

    #[track_caller]
    pub fn check_marked_complete(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_marked_complete(obj, interior));
    }

    #[track_caller]
    pub fn check_marked_next(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_marked_next(obj, interior));
    }

    #[track_caller]
    pub fn check_not_in_collection_set(&self, obj: ObjectHandle, interior: Option<Address>) {
        enforce(self.verify_not_in_collection_set(obj, interior));
    }

    #[track_caller]
    pub fn check_not_in_collection_set_loc(&self, interior: Address) {
        enforce(self.verify_not_in_collection_set_loc(interior));
    }

    #[track_caller]
    pub fn check_reference_processor_installed(&self) {
        enforce(self.verify_reference_processor_installed());
    }

    #[track_caller]
    pub fn check_reference_processor_not_installed(&self) {
        enforce(self.verify_reference_processor_not_installed());
    }
}

#[track_caller]
#[inline]
fn enforce(result: VerifyResult) {
    if let Err(failure) = result {
        report::fail(failure);
    }
}

/// Region count and exclusive end index of a humongous span, or `None`
/// when either overflows.
fn humongous_extent<H: HeapModel + ?Sized>(
    heap: &H,
    start: usize,
    alloc_words: usize,
) -> Option<(usize, usize)> {
    let count = heap.required_regions(allocation_bytes(alloc_words)?);
    Some((count, start.checked_add(count)?))
}

fn humongous_span<R: Region>(
    start: usize,
    end: usize,
    count: usize,
    index: usize,
    chain: Option<&R>,
    expected: &str,
) -> Section {
    let mut section = Section::new("Humongous span");
    section
        .line(format!("  regions {start}..{end} ({count} regions)"))
        .line(format!("  region {index}: expected {expected}"));
    match chain {
        Some(region) => section.line(format!("  region: {}", region.summary())),
        None => section.line("  region: missing from region table"),
    };
    section
}
